//! Domain models for live query campaigns.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Created, waiting for results.
    #[default]
    Waiting,
    /// At least one agent has picked up the query.
    Running,
    /// No further results are expected.
    Complete,
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Waiting => write!(f, "waiting"),
            CampaignStatus::Running => write!(f, "running"),
            CampaignStatus::Complete => write!(f, "complete"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "waiting" => Ok(CampaignStatus::Waiting),
            "running" => Ok(CampaignStatus::Running),
            "complete" => Ok(CampaignStatus::Complete),
            _ => Err(format!("unknown campaign status: {}", s)),
        }
    }
}

/// Host-membership counts computed once at campaign creation time,
/// against an explicit snapshot clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignMetrics {
    pub total_hosts: u64,
    pub online_hosts: u64,
    pub offline_hosts: u64,
    pub missing_in_action_hosts: u64,
    pub new_hosts: u64,
}

/// One query-distribution job: a query plus a resolved host set.
///
/// Campaigns are only mutated to attach metrics after creation; retention
/// is an external concern and nothing here ever deletes one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: u64,
    /// Owning query; always set, even for ad-hoc SQL.
    pub query_id: u64,
    pub status: CampaignStatus,
    /// Creator.
    pub user_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CampaignMetrics>,
}

/// A saved or ad-hoc query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: u64,
    pub name: String,
    pub sql: String,
    pub author_id: u64,
    /// Ad-hoc campaign queries are persisted with `saved == false`.
    pub saved: bool,
    /// Widens run visibility to observers.
    pub observer_can_run: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Minimal host identity attached to each result frame. Never a full
/// host record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultHost {
    pub id: u64,
    pub hostname: String,
}

/// One host's query output: rows or an error, keyed by campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedQueryResult {
    #[serde(rename = "distributed_query_campaign_id")]
    pub campaign_id: u64,
    pub host: ResultHost,
    /// Row order is the order the agent posted them in.
    pub rows: Vec<BTreeMap<String, String>>,
    /// Serialized as `null` when absent; viewers rely on the field
    /// being present.
    pub error: Option<String>,
}
