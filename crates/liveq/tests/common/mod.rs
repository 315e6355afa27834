//! Shared test server setup.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::net::TcpListener;

use liveq::api::{AppState, create_router};
use liveq::auth::{AuthState, Role, Viewer};
use liveq::config::ServerConfig;
use liveq::datastore::{HostRecord, MemDatastore};

/// A running server on an ephemeral port, with handles into its state.
pub struct TestServer {
    pub addr: SocketAddr,
    pub datastore: Arc<MemDatastore>,
    pub state: AppState,
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/api/v1/results/websocket", self.addr)
    }

    /// Mint a session token for a viewer with the given role.
    pub fn token_for(&self, role: Role) -> String {
        self.state.auth.issue_token(Viewer {
            id: 1,
            username: "op".to_string(),
            role,
            team_id: None,
        })
    }
}

/// Boot a server with three online hosts (ids 1-3) and an "all" label.
pub async fn spawn_server() -> TestServer {
    spawn_server_with(|_| {}).await
}

/// Boot a server, letting the caller tweak the config first.
pub async fn spawn_server_with(mutate: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let datastore = Arc::new(MemDatastore::new());
    let now = Utc::now();
    for id in [1u64, 2, 3] {
        datastore.add_host(HostRecord {
            id,
            hostname: format!("host{}", id),
            uuid: format!("uuid-{}", id),
            hardware_serial: format!("serial-{}", id),
            team_id: None,
            seen_at: now - Duration::minutes(1),
            created_at: now - Duration::days(2),
        });
    }
    datastore.add_label(10, "all", [1, 2, 3]);

    let mut config = ServerConfig::default();
    mutate(&mut config);

    let state = AppState::new(datastore.clone(), AuthState::new(), config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        addr,
        datastore,
        state,
    }
}
