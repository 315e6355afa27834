//! Datastore contract consumed by the campaign subsystem.
//!
//! Persistence itself is an external collaborator; this module defines the
//! seam plus an in-memory implementation used by the server binary and the
//! tests.

mod mem;

pub use mem::{HostRecord, MemDatastore};

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::campaigns::{Campaign, CampaignMetrics, CampaignStatus, Query};
use crate::targets::{CampaignTarget, HostFilter, TargetSpec};

/// Fields for a query row to be created.
#[derive(Debug, Clone)]
pub struct NewQuery {
    pub name: String,
    pub sql: String,
    pub author_id: u64,
    pub saved: bool,
    pub observer_can_run: bool,
}

/// Fields for a campaign row to be created. The id is assigned atomically
/// by the datastore.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub query_id: u64,
    pub status: CampaignStatus,
    pub user_id: u64,
}

/// Storage operations the campaign subsystem depends on.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn load_query(&self, id: u64) -> Result<Option<Query>>;

    async fn create_query(&self, query: NewQuery) -> Result<Query>;

    async fn create_campaign(&self, campaign: NewCampaign) -> Result<Campaign>;

    async fn create_campaign_target(&self, target: CampaignTarget) -> Result<()>;

    /// Attach creation-time metrics to an existing campaign and return the
    /// updated row.
    async fn update_campaign_metrics(
        &self,
        campaign_id: u64,
        metrics: CampaignMetrics,
    ) -> Result<Campaign>;

    async fn load_campaign(&self, id: u64) -> Result<Option<Campaign>>;

    /// Resolve an explicit target spec into host ids. Duplicates across
    /// buckets are fine; callers dedup.
    async fn resolve_host_ids(&self, filter: &HostFilter, spec: &TargetSpec) -> Result<Vec<u64>>;

    /// Count membership among `hosts` as of the given snapshot clock.
    async fn count_host_membership(
        &self,
        filter: &HostFilter,
        hosts: &HashSet<u64>,
        as_of: DateTime<Utc>,
    ) -> Result<CampaignMetrics>;

    /// Look up hosts by hostname, UUID, or hardware serial. Unmatched
    /// identifiers are dropped, not reported.
    async fn resolve_host_ids_by_identifier(
        &self,
        filter: &HostFilter,
        identifiers: &[String],
    ) -> Result<Vec<u64>>;

    /// Map label names to ids. Unknown names are simply absent from the
    /// returned map; callers decide whether that is an error.
    async fn resolve_label_ids_by_name(&self, names: &[String]) -> Result<HashMap<String, u64>>;
}
