//! Union-resolution of target specs against the datastore.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::campaigns::CampaignMetrics;
use crate::datastore::Datastore;

use super::{HostFilter, TargetSpec};

/// Resolution failures.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Every unknown label name from one request, reported together.
    #[error("unknown labels: {}", .0.join(", "))]
    UnknownLabels(Vec<String>),

    #[error(transparent)]
    Datastore(#[from] anyhow::Error),
}

/// Stateless resolver over the datastore's membership queries.
#[derive(Clone)]
pub struct TargetResolver {
    datastore: Arc<dyn Datastore>,
}

impl TargetResolver {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self { datastore }
    }

    /// Resolve a spec into a deduplicated host set.
    ///
    /// A spec with no selectors yields an empty set, not an error; the
    /// caller rejects empties after the full union so multi-source specs
    /// compose.
    pub async fn resolve_hosts(
        &self,
        filter: &HostFilter,
        spec: &TargetSpec,
    ) -> Result<HashSet<u64>, ResolveError> {
        let ids = self.datastore.resolve_host_ids(filter, spec).await?;
        Ok(ids.into_iter().collect())
    }

    /// Look up hosts by hostname, UUID, or hardware serial. Unmatched
    /// identifiers are dropped without error; callers wanting completeness
    /// diff the input against the result themselves.
    pub async fn resolve_identifiers(
        &self,
        filter: &HostFilter,
        identifiers: &[String],
    ) -> Result<Vec<u64>, ResolveError> {
        let ids = self
            .datastore
            .resolve_host_ids_by_identifier(filter, identifiers)
            .await?;
        Ok(ids)
    }

    /// Map label names to ids, failing with one aggregated error naming
    /// every label that does not exist.
    pub async fn resolve_label_names(&self, names: &[String]) -> Result<Vec<u64>, ResolveError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let resolved = self.datastore.resolve_label_ids_by_name(names).await?;
        let unknown: Vec<String> = names
            .iter()
            .filter(|name| !resolved.contains_key(*name))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ResolveError::UnknownLabels(unknown));
        }
        Ok(names.iter().map(|name| resolved[name]).collect())
    }

    /// Membership counts among `hosts` as of an explicit snapshot clock.
    pub async fn count_membership(
        &self,
        filter: &HostFilter,
        hosts: &HashSet<u64>,
        as_of: DateTime<Utc>,
    ) -> Result<CampaignMetrics, ResolveError> {
        let metrics = self
            .datastore
            .count_host_membership(filter, hosts, as_of)
            .await?;
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{HostRecord, MemDatastore};
    use chrono::Duration;

    fn seeded() -> (Arc<MemDatastore>, TargetResolver) {
        let ds = Arc::new(MemDatastore::new());
        let now = Utc::now();
        for (id, hostname) in [(1, "alpha"), (2, "beta"), (3, "gamma")] {
            ds.add_host(HostRecord {
                id,
                hostname: hostname.to_string(),
                uuid: format!("uuid-{}", id),
                hardware_serial: format!("serial-{}", id),
                team_id: if id == 3 { Some(9) } else { None },
                seen_at: now - Duration::minutes(1),
                created_at: now - Duration::days(2),
            });
        }
        ds.add_label(10, "all", [1, 2, 3]);
        ds.add_label(11, "pair", [1, 2]);
        let resolver = TargetResolver::new(ds.clone() as Arc<dyn Datastore>);
        (ds, resolver)
    }

    #[tokio::test]
    async fn test_union_collapses_duplicates() {
        let (_ds, resolver) = seeded();
        let spec = TargetSpec {
            host_ids: vec![1, 2],
            label_ids: vec![10, 11],
            team_ids: vec![9],
        };
        let hosts = resolver
            .resolve_hosts(&HostFilter::default(), &spec)
            .await
            .unwrap();
        assert_eq!(hosts, [1, 2, 3].into_iter().collect());
    }

    #[tokio::test]
    async fn test_empty_spec_is_empty_set_not_error() {
        let (_ds, resolver) = seeded();
        let hosts = resolver
            .resolve_hosts(&HostFilter::default(), &TargetSpec::default())
            .await
            .unwrap();
        assert!(hosts.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_label_names_aggregate() {
        let (_ds, resolver) = seeded();
        let err = resolver
            .resolve_label_names(&[
                "all".to_string(),
                "a".to_string(),
                "b".to_string(),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown labels: a, b");
        match err {
            ResolveError::UnknownLabels(names) => {
                assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected UnknownLabels, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_label_names_resolve_in_input_order() {
        let (_ds, resolver) = seeded();
        let ids = resolver
            .resolve_label_names(&["pair".to_string(), "all".to_string()])
            .await
            .unwrap();
        assert_eq!(ids, vec![11, 10]);
    }
}
