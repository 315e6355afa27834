//! Campaign lifecycle: query materialization, authorization, target
//! persistence, host resolution, metrics, and hand-off to the bus.

mod models;
mod service;

pub use models::{
    Campaign, CampaignMetrics, CampaignStatus, DistributedQueryResult, Query, ResultHost,
};
pub use service::{CampaignError, CampaignService, CampaignSpec};
