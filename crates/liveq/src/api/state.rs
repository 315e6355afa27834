//! Application state shared across handlers.

use std::sync::Arc;

use crate::auth::AuthState;
use crate::bus::QueryBus;
use crate::campaigns::CampaignService;
use crate::config::ServerConfig;
use crate::datastore::Datastore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Datastore the campaign subsystem persists through.
    pub datastore: Arc<dyn Datastore>,
    /// Query broker shared by campaign creation, agent ingestion, and the
    /// stream protocol. A capability, not a singleton.
    pub bus: Arc<QueryBus>,
    /// Campaign creation orchestration.
    pub campaigns: Arc<CampaignService>,
    /// Session token store.
    pub auth: AuthState,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Create new application state.
    pub fn new(datastore: Arc<dyn Datastore>, auth: AuthState, config: ServerConfig) -> Self {
        let bus = Arc::new(QueryBus::new());
        let campaigns = Arc::new(CampaignService::new(
            datastore.clone(),
            bus.clone(),
            config.live_query_enabled,
        ));

        Self {
            datastore,
            bus,
            campaigns,
            auth,
            config: Arc::new(config),
        }
    }
}
