//! In-memory datastore.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::campaigns::{Campaign, CampaignMetrics, Query};
use crate::targets::{CampaignTarget, HostFilter, TargetSpec};

use super::{Datastore, NewCampaign, NewQuery};

/// Hosts seen within this window of the snapshot clock count as online.
const ONLINE_WINDOW: Duration = Duration::minutes(10);

/// Hosts unseen for this long count as missing in action.
const MIA_WINDOW: Duration = Duration::days(30);

/// Hosts enrolled within this window count as new.
const NEW_WINDOW: Duration = Duration::hours(24);

/// A managed endpoint as the datastore knows it.
#[derive(Debug, Clone)]
pub struct HostRecord {
    pub id: u64,
    pub hostname: String,
    pub uuid: String,
    pub hardware_serial: String,
    pub team_id: Option<u64>,
    pub seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct LabelRecord {
    name: String,
    members: HashSet<u64>,
}

/// Map-backed [`Datastore`]. Safe for concurrent use; ids are assigned
/// from atomic counters so no two creation calls can race on the same id.
#[derive(Debug, Default)]
pub struct MemDatastore {
    queries: DashMap<u64, Query>,
    campaigns: DashMap<u64, Campaign>,
    campaign_targets: DashMap<u64, Vec<CampaignTarget>>,
    hosts: DashMap<u64, HostRecord>,
    labels: DashMap<u64, LabelRecord>,
    next_query_id: AtomicU64,
    next_campaign_id: AtomicU64,
}

impl MemDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a host. Test/dev helper.
    pub fn add_host(&self, host: HostRecord) {
        self.hosts.insert(host.id, host);
    }

    /// Seed a label with its member host ids. Test/dev helper.
    pub fn add_label(&self, id: u64, name: &str, members: impl IntoIterator<Item = u64>) {
        self.labels.insert(
            id,
            LabelRecord {
                name: name.to_string(),
                members: members.into_iter().collect(),
            },
        );
    }

    /// Targets recorded for a campaign, in insertion order.
    pub fn campaign_targets(&self, campaign_id: u64) -> Vec<CampaignTarget> {
        self.campaign_targets
            .get(&campaign_id)
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    fn visible(&self, filter: &HostFilter, host: &HostRecord) -> bool {
        match filter.team_id {
            Some(team_id) => host.team_id == Some(team_id),
            None => true,
        }
    }
}

#[async_trait]
impl Datastore for MemDatastore {
    async fn load_query(&self, id: u64) -> Result<Option<Query>> {
        Ok(self.queries.get(&id).map(|q| q.clone()))
    }

    async fn create_query(&self, query: NewQuery) -> Result<Query> {
        let id = self.next_query_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let row = Query {
            id,
            name: query.name,
            sql: query.sql,
            author_id: query.author_id,
            saved: query.saved,
            observer_can_run: query.observer_can_run,
            created_at: now,
            updated_at: now,
        };
        self.queries.insert(id, row.clone());
        Ok(row)
    }

    async fn create_campaign(&self, campaign: NewCampaign) -> Result<Campaign> {
        let id = self.next_campaign_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let row = Campaign {
            id,
            query_id: campaign.query_id,
            status: campaign.status,
            user_id: campaign.user_id,
            created_at: now,
            updated_at: now,
            metrics: None,
        };
        self.campaigns.insert(id, row.clone());
        Ok(row)
    }

    async fn create_campaign_target(&self, target: CampaignTarget) -> Result<()> {
        if !self.campaigns.contains_key(&target.campaign_id) {
            return Err(anyhow!("campaign {} not found", target.campaign_id));
        }
        self.campaign_targets
            .entry(target.campaign_id)
            .or_default()
            .push(target);
        Ok(())
    }

    async fn update_campaign_metrics(
        &self,
        campaign_id: u64,
        metrics: CampaignMetrics,
    ) -> Result<Campaign> {
        let mut campaign = self
            .campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| anyhow!("campaign {} not found", campaign_id))?;
        campaign.metrics = Some(metrics);
        campaign.updated_at = Utc::now();
        Ok(campaign.clone())
    }

    async fn load_campaign(&self, id: u64) -> Result<Option<Campaign>> {
        Ok(self.campaigns.get(&id).map(|c| c.clone()))
    }

    async fn resolve_host_ids(&self, filter: &HostFilter, spec: &TargetSpec) -> Result<Vec<u64>> {
        let mut ids = Vec::new();

        for &host_id in &spec.host_ids {
            if let Some(host) = self.hosts.get(&host_id) {
                if self.visible(filter, &host) {
                    ids.push(host_id);
                }
            }
        }

        for &label_id in &spec.label_ids {
            if let Some(label) = self.labels.get(&label_id) {
                for &member in &label.members {
                    if let Some(host) = self.hosts.get(&member) {
                        if self.visible(filter, &host) {
                            ids.push(member);
                        }
                    }
                }
            }
        }

        for &team_id in &spec.team_ids {
            for host in self.hosts.iter() {
                if host.team_id == Some(team_id) && self.visible(filter, &host) {
                    ids.push(host.id);
                }
            }
        }

        Ok(ids)
    }

    async fn count_host_membership(
        &self,
        _filter: &HostFilter,
        hosts: &HashSet<u64>,
        as_of: DateTime<Utc>,
    ) -> Result<CampaignMetrics> {
        let mut metrics = CampaignMetrics::default();
        for host_id in hosts {
            let Some(host) = self.hosts.get(host_id) else {
                continue;
            };
            metrics.total_hosts += 1;
            if as_of - host.seen_at <= ONLINE_WINDOW {
                metrics.online_hosts += 1;
            } else {
                metrics.offline_hosts += 1;
                if as_of - host.seen_at >= MIA_WINDOW {
                    metrics.missing_in_action_hosts += 1;
                }
            }
            if as_of - host.created_at <= NEW_WINDOW {
                metrics.new_hosts += 1;
            }
        }
        Ok(metrics)
    }

    async fn resolve_host_ids_by_identifier(
        &self,
        filter: &HostFilter,
        identifiers: &[String],
    ) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for identifier in identifiers {
            for host in self.hosts.iter() {
                if !self.visible(filter, &host) {
                    continue;
                }
                if host.hostname == *identifier
                    || host.uuid == *identifier
                    || host.hardware_serial == *identifier
                {
                    ids.push(host.id);
                }
            }
        }
        Ok(ids)
    }

    async fn resolve_label_ids_by_name(&self, names: &[String]) -> Result<HashMap<String, u64>> {
        let mut resolved = HashMap::new();
        for entry in self.labels.iter() {
            if names.contains(&entry.name) {
                resolved.insert(entry.name.clone(), *entry.key());
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaigns::CampaignStatus;

    fn host(id: u64, hostname: &str, seen_ago: Duration, age: Duration) -> HostRecord {
        let now = Utc::now();
        HostRecord {
            id,
            hostname: hostname.to_string(),
            uuid: format!("uuid-{}", id),
            hardware_serial: format!("serial-{}", id),
            team_id: None,
            seen_at: now - seen_ago,
            created_at: now - age,
        }
    }

    #[tokio::test]
    async fn test_membership_counts_with_fixed_clock() {
        let ds = MemDatastore::new();
        ds.add_host(host(1, "online", Duration::minutes(1), Duration::days(3)));
        ds.add_host(host(2, "offline", Duration::hours(2), Duration::days(3)));
        ds.add_host(host(3, "mia", Duration::days(45), Duration::days(60)));
        ds.add_host(host(4, "fresh", Duration::minutes(1), Duration::hours(1)));

        let hosts: HashSet<u64> = [1, 2, 3, 4].into_iter().collect();
        let metrics = ds
            .count_host_membership(&HostFilter::default(), &hosts, Utc::now())
            .await
            .unwrap();

        assert_eq!(metrics.total_hosts, 4);
        assert_eq!(metrics.online_hosts, 2);
        assert_eq!(metrics.offline_hosts, 2);
        assert_eq!(metrics.missing_in_action_hosts, 1);
        assert_eq!(metrics.new_hosts, 1);
    }

    #[tokio::test]
    async fn test_identifier_lookup_matches_all_three_identities() {
        let ds = MemDatastore::new();
        ds.add_host(host(7, "host7", Duration::minutes(1), Duration::days(1)));

        let filter = HostFilter::default();
        for identifier in ["host7", "uuid-7", "serial-7"] {
            let ids = ds
                .resolve_host_ids_by_identifier(&filter, &[identifier.to_string()])
                .await
                .unwrap();
            assert_eq!(ids, vec![7], "identifier {}", identifier);
        }

        // Unmatched identifiers drop out silently.
        let ids = ds
            .resolve_host_ids_by_identifier(&filter, &["nope".to_string()])
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_team_filter_scopes_resolution() {
        let ds = MemDatastore::new();
        let mut scoped = host(1, "a", Duration::minutes(1), Duration::days(1));
        scoped.team_id = Some(5);
        ds.add_host(scoped);
        ds.add_host(host(2, "b", Duration::minutes(1), Duration::days(1)));

        let spec = TargetSpec {
            host_ids: vec![1, 2],
            ..Default::default()
        };
        let ids = ds
            .resolve_host_ids(
                &HostFilter {
                    team_id: Some(5),
                    observer_can_run: false,
                },
                &spec,
            )
            .await
            .unwrap();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn test_campaign_ids_are_distinct() {
        let ds = MemDatastore::new();
        let new_campaign = || NewCampaign {
            query_id: 1,
            status: CampaignStatus::Waiting,
            user_id: 1,
        };
        let a = ds.create_campaign(new_campaign()).await.unwrap();
        let b = ds.create_campaign(new_campaign()).await.unwrap();
        assert_ne!(a.id, b.id);
    }
}
