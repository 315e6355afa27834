//! Server configuration.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Top-level server configuration, loaded from an optional TOML file with
/// a `LIVEQ_` environment overlay (e.g. `LIVEQ_ADDRESS`,
/// `LIVEQ_WEBSOCKET__PING_INTERVAL_SECS`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub address: String,
    /// Global kill switch for the live query subsystem.
    pub live_query_enabled: bool,
    /// Allowed CORS origins; empty means any.
    pub cors_origins: Vec<String>,
    pub websocket: WebsocketConfig,
    /// Users seeded into the session store at startup.
    pub users: Vec<UserConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8412".to_string(),
            live_query_enabled: true,
            cors_origins: Vec::new(),
            websocket: WebsocketConfig::default(),
            users: Vec::new(),
        }
    }
}

/// Result stream tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebsocketConfig {
    /// How long a connection may sit unauthenticated.
    pub auth_timeout_secs: u64,
    /// Keepalive ping cadence.
    pub ping_interval_secs: u64,
    /// Hard per-connection lifetime, independent of client timeouts.
    pub session_timeout_secs: u64,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            auth_timeout_secs: 10,
            ping_interval_secs: 30,
            session_timeout_secs: 8 * 60 * 60,
        }
    }
}

/// A login-capable user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub role: crate::auth::Role,
    #[serde(default)]
    pub team_id: Option<u64>,
}

/// Load configuration from the given file (if any) plus the environment.
pub fn load(path: Option<&Path>) -> Result<ServerConfig> {
    let mut builder = Config::builder();

    builder = match path {
        Some(path) => builder.add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(true),
        ),
        None => builder.add_source(File::with_name("liveq").required(false)),
    };

    let settings = builder
        .add_source(Environment::with_prefix("LIVEQ").separator("__"))
        .build()
        .context("loading configuration")?;

    settings
        .try_deserialize()
        .context("parsing configuration")
}
