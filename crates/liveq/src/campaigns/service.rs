//! Campaign creation service.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use log::{info, warn};
use thiserror::Error;

use crate::auth::Viewer;
use crate::bus::QueryBus;
use crate::datastore::{Datastore, NewCampaign, NewQuery};
use crate::targets::{CampaignTarget, HostFilter, ResolveError, TargetResolver, TargetSpec, TargetType};

use super::models::{Campaign, CampaignStatus, Query};

/// Failure modes of campaign creation, ordered roughly by the step that
/// raises them.
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("live queries are disabled")]
    Disabled,

    #[error("query not found")]
    QueryNotFound,

    #[error("query or query_id is required")]
    MissingQuery,

    #[error("{0}")]
    Forbidden(String),

    #[error("unknown labels: {}", .0.join(", "))]
    UnknownLabels(Vec<String>),

    #[error("no hosts targeted")]
    NoHostsTargeted,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ResolveError> for CampaignError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnknownLabels(names) => CampaignError::UnknownLabels(names),
            ResolveError::Datastore(err) => CampaignError::Internal(err),
        }
    }
}

/// What to run and against whom.
#[derive(Debug, Clone, Default)]
pub struct CampaignSpec {
    pub query_sql: Option<String>,
    pub query_id: Option<u64>,
    pub targets: TargetSpec,
}

/// Orchestrates campaign creation end to end.
#[derive(Clone)]
pub struct CampaignService {
    datastore: Arc<dyn Datastore>,
    resolver: TargetResolver,
    bus: Arc<QueryBus>,
    enabled: bool,
}

impl CampaignService {
    pub fn new(datastore: Arc<dyn Datastore>, bus: Arc<QueryBus>, enabled: bool) -> Self {
        let resolver = TargetResolver::new(datastore.clone());
        Self {
            datastore,
            resolver,
            bus,
            enabled,
        }
    }

    /// Create a campaign from an explicit target spec.
    ///
    /// Steps run in order and any failure aborts the whole call. The
    /// campaign row, target rows, and bus registration are not one
    /// transaction: a failure after the campaign row exists leaves it
    /// Waiting forever and still queryable. That gap is deliberate and
    /// observable rather than silently cleaned up.
    pub async fn create_campaign(
        &self,
        viewer: &Viewer,
        spec: CampaignSpec,
    ) -> Result<Campaign, CampaignError> {
        if !self.enabled {
            return Err(CampaignError::Disabled);
        }

        let query = self.materialize_query(viewer, &spec).await?;
        self.authorize_run(viewer, &query)?;

        let campaign = self
            .datastore
            .create_campaign(NewCampaign {
                query_id: query.id,
                status: CampaignStatus::Waiting,
                user_id: viewer.id,
            })
            .await
            .context("creating campaign")?;

        self.persist_targets(campaign.id, &spec.targets).await?;

        let filter = HostFilter {
            team_id: viewer.team_id,
            observer_can_run: query.observer_can_run,
        };
        let hosts = self.resolver.resolve_hosts(&filter, &spec.targets).await?;
        if hosts.is_empty() {
            return Err(CampaignError::NoHostsTargeted);
        }

        let metrics = self
            .resolver
            .count_membership(&filter, &hosts, Utc::now())
            .await
            .map_err(|err| {
                CampaignError::Internal(anyhow::Error::from(err).context("counting targeted hosts"))
            })?;
        let campaign = self
            .datastore
            .update_campaign_metrics(campaign.id, metrics)
            .await
            .context("attaching campaign metrics")?;

        let topic = campaign.id.to_string();
        let host_ids: Vec<u64> = hosts.into_iter().collect();
        if let Err(err) = self.bus.publish(&topic, &query.sql, &host_ids) {
            // The campaign row exists but will never receive results.
            warn!(
                "campaign {} created but bus registration failed: {}",
                campaign.id, err
            );
            return Err(CampaignError::Internal(
                anyhow::Error::from(err).context("registering query with the bus"),
            ));
        }

        info!(
            "campaign {} created for query {} targeting {} hosts",
            campaign.id,
            query.id,
            host_ids.len()
        );
        Ok(campaign)
    }

    /// Create a campaign from hostnames/UUIDs/serials plus label names.
    ///
    /// Label names that do not exist fail with one aggregated error;
    /// unmatched host identifiers are silently dropped.
    pub async fn create_campaign_by_identifiers(
        &self,
        viewer: &Viewer,
        query_sql: Option<String>,
        query_id: Option<u64>,
        hosts: &[String],
        labels: &[String],
    ) -> Result<Campaign, CampaignError> {
        let filter = HostFilter {
            team_id: viewer.team_id,
            observer_can_run: false,
        };
        let host_ids = self.resolver.resolve_identifiers(&filter, hosts).await?;
        let label_ids = self.resolver.resolve_label_names(labels).await?;

        self.create_campaign(
            viewer,
            CampaignSpec {
                query_sql,
                query_id,
                targets: TargetSpec {
                    host_ids,
                    label_ids,
                    team_ids: Vec::new(),
                },
            },
        )
        .await
    }

    /// Load the stored query, or persist a new ad-hoc one. When a query id
    /// is given, any literal SQL in the request is ignored.
    async fn materialize_query(
        &self,
        viewer: &Viewer,
        spec: &CampaignSpec,
    ) -> Result<Query, CampaignError> {
        if let Some(query_id) = spec.query_id {
            return self
                .datastore
                .load_query(query_id)
                .await
                .context("loading query")?
                .ok_or(CampaignError::QueryNotFound);
        }

        let sql = spec.query_sql.as_deref().map(str::trim).unwrap_or("");
        if sql.is_empty() {
            return Err(CampaignError::MissingQuery);
        }
        if !viewer.role.can_run_new_query() {
            return Err(CampaignError::Forbidden(
                "observers cannot run new queries".to_string(),
            ));
        }

        // Nanosecond suffix keeps concurrent ad-hoc campaigns by the same
        // user from colliding on name.
        let name = format!(
            "distributed_{}_{}",
            viewer.username,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        let query = self
            .datastore
            .create_query(NewQuery {
                name,
                sql: sql.to_string(),
                author_id: viewer.id,
                saved: false,
                observer_can_run: false,
            })
            .await
            .context("creating ad-hoc query")?;
        Ok(query)
    }

    fn authorize_run(&self, viewer: &Viewer, query: &Query) -> Result<(), CampaignError> {
        if viewer.role == crate::auth::Role::Observer && !query.observer_can_run {
            return Err(CampaignError::Forbidden(
                "query is not visible to observers".to_string(),
            ));
        }
        Ok(())
    }

    /// One target row per distinct id per bucket. Each insertion is
    /// independent; the first failure aborts with its cause, leaving a
    /// partially-targeted campaign row behind.
    async fn persist_targets(
        &self,
        campaign_id: u64,
        targets: &TargetSpec,
    ) -> Result<(), CampaignError> {
        let buckets = [
            (TargetType::Host, &targets.host_ids),
            (TargetType::Label, &targets.label_ids),
            (TargetType::Team, &targets.team_ids),
        ];
        for (target_type, ids) in buckets {
            let mut seen = HashSet::new();
            for &target_id in ids {
                if !seen.insert(target_id) {
                    continue;
                }
                self.datastore
                    .create_campaign_target(CampaignTarget {
                        target_type,
                        campaign_id,
                        target_id,
                    })
                    .await
                    .with_context(|| {
                        format!("creating campaign {} target {}", target_type, target_id)
                    })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::datastore::{HostRecord, MemDatastore};
    use chrono::Duration;

    fn viewer(role: Role) -> Viewer {
        Viewer {
            id: 1,
            username: "op".to_string(),
            role,
            team_id: None,
        }
    }

    fn seeded_service(enabled: bool) -> (Arc<MemDatastore>, Arc<QueryBus>, CampaignService) {
        let ds = Arc::new(MemDatastore::new());
        let now = Utc::now();
        for id in [1u64, 2, 3] {
            ds.add_host(HostRecord {
                id,
                hostname: format!("host{}", id),
                uuid: format!("uuid-{}", id),
                hardware_serial: format!("serial-{}", id),
                team_id: None,
                seen_at: now - Duration::minutes(1),
                created_at: now - Duration::days(2),
            });
        }
        ds.add_label(10, "all", [1, 2, 3]);
        let bus = Arc::new(QueryBus::new());
        let service = CampaignService::new(ds.clone() as Arc<dyn Datastore>, bus.clone(), enabled);
        (ds, bus, service)
    }

    fn adhoc(targets: TargetSpec) -> CampaignSpec {
        CampaignSpec {
            query_sql: Some("select 1;".to_string()),
            query_id: None,
            targets,
        }
    }

    #[tokio::test]
    async fn test_disabled_subsystem_rejects_creation() {
        let (_ds, _bus, service) = seeded_service(false);
        let err = service
            .create_campaign(
                &viewer(Role::Admin),
                adhoc(TargetSpec {
                    host_ids: vec![1],
                    ..Default::default()
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::Disabled));
    }

    #[tokio::test]
    async fn test_blank_sql_is_rejected() {
        let (_ds, _bus, service) = seeded_service(true);
        let err = service
            .create_campaign(
                &viewer(Role::Admin),
                CampaignSpec {
                    query_sql: Some("   ".to_string()),
                    query_id: None,
                    targets: TargetSpec {
                        host_ids: vec![1],
                        ..Default::default()
                    },
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::MissingQuery));
    }

    #[tokio::test]
    async fn test_unknown_query_id() {
        let (_ds, _bus, service) = seeded_service(true);
        let err = service
            .create_campaign(
                &viewer(Role::Admin),
                CampaignSpec {
                    query_sql: None,
                    query_id: Some(404),
                    targets: TargetSpec {
                        host_ids: vec![1],
                        ..Default::default()
                    },
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::QueryNotFound));
    }

    #[tokio::test]
    async fn test_observer_cannot_create_adhoc_campaign() {
        let (_ds, _bus, service) = seeded_service(true);
        let err = service
            .create_campaign(
                &viewer(Role::Observer),
                adhoc(TargetSpec {
                    host_ids: vec![1],
                    ..Default::default()
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_observer_can_run_widened_saved_query() {
        let (ds, _bus, service) = seeded_service(true);
        let query = ds
            .create_query(NewQuery {
                name: "widened".to_string(),
                sql: "select 1;".to_string(),
                author_id: 2,
                saved: true,
                observer_can_run: true,
            })
            .await
            .unwrap();

        let campaign = service
            .create_campaign(
                &viewer(Role::Observer),
                CampaignSpec {
                    query_sql: None,
                    query_id: Some(query.id),
                    targets: TargetSpec {
                        host_ids: vec![1],
                        ..Default::default()
                    },
                },
            )
            .await
            .unwrap();
        assert_eq!(campaign.query_id, query.id);
    }

    #[tokio::test]
    async fn test_empty_resolution_fails_and_never_reports_zero_hosts() {
        let (_ds, _bus, service) = seeded_service(true);
        let err = service
            .create_campaign(&viewer(Role::Admin), adhoc(TargetSpec::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::NoHostsTargeted));

        // Nonexistent hosts resolve to nothing as well.
        let err = service
            .create_campaign(
                &viewer(Role::Admin),
                adhoc(TargetSpec {
                    host_ids: vec![404],
                    ..Default::default()
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::NoHostsTargeted));
    }

    #[tokio::test]
    async fn test_successful_creation_attaches_metrics_and_registers_query() {
        let (ds, bus, service) = seeded_service(true);
        let campaign = service
            .create_campaign(
                &viewer(Role::Admin),
                adhoc(TargetSpec {
                    host_ids: vec![1, 1],
                    label_ids: vec![10],
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

        assert_eq!(campaign.status, CampaignStatus::Waiting);
        let metrics = campaign.metrics.expect("metrics attached");
        assert_eq!(metrics.total_hosts, 3);
        assert!(metrics.total_hosts > 0);

        // Duplicate host id collapses to one target row.
        let targets = ds.campaign_targets(campaign.id);
        let host_targets: Vec<_> = targets
            .iter()
            .filter(|t| t.target_type == TargetType::Host)
            .collect();
        assert_eq!(host_targets.len(), 1);

        // All three hosts got an inbox entry.
        for host_id in [1, 2, 3] {
            let pending = bus.pending_for_host(host_id);
            assert_eq!(pending.len(), 1, "host {}", host_id);
            assert_eq!(pending[0].campaign_id, campaign.id);
            assert_eq!(pending[0].sql, "select 1;");
        }
    }

    #[tokio::test]
    async fn test_identifier_creation_matches_direct_creation() {
        let (_ds, _bus, service) = seeded_service(true);

        let direct = service
            .create_campaign(
                &viewer(Role::Admin),
                adhoc(TargetSpec {
                    host_ids: vec![1],
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

        let by_identifier = service
            .create_campaign_by_identifiers(
                &viewer(Role::Admin),
                Some("select 1;".to_string()),
                None,
                &["host1".to_string()],
                &[],
            )
            .await
            .unwrap();

        assert_eq!(direct.metrics, by_identifier.metrics);
    }

    #[tokio::test]
    async fn test_identifier_creation_aggregates_unknown_labels() {
        let (_ds, _bus, service) = seeded_service(true);
        let err = service
            .create_campaign_by_identifiers(
                &viewer(Role::Admin),
                Some("select 1;".to_string()),
                None,
                &[],
                &["a".to_string(), "b".to_string()],
            )
            .await
            .unwrap_err();
        match err {
            CampaignError::UnknownLabels(names) => {
                assert_eq!(names, vec!["a".to_string(), "b".to_string()])
            }
            other => panic!("expected UnknownLabels, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_adhoc_query_names_are_distinct() {
        let (ds, _bus, service) = seeded_service(true);
        let spec = || {
            adhoc(TargetSpec {
                host_ids: vec![1],
                ..Default::default()
            })
        };
        let a = service
            .create_campaign(&viewer(Role::Admin), spec())
            .await
            .unwrap();
        let b = service
            .create_campaign(&viewer(Role::Admin), spec())
            .await
            .unwrap();

        let qa = ds.load_query(a.query_id).await.unwrap().unwrap();
        let qb = ds.load_query(b.query_id).await.unwrap().unwrap();
        assert_ne!(qa.name, qb.name);
        assert!(qa.name.starts_with("distributed_op_"));
        assert!(!qa.saved);
    }
}
