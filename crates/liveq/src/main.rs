use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, debug, info};
use tokio::net::TcpListener;

use liveq::api::{AppState, create_router};
use liveq::auth::{AuthState, Viewer};
use liveq::config::{ServerConfig, load as load_config};
use liveq::datastore::MemDatastore;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common);

    let config = load_config(cli.common.config.as_deref())?;
    debug!("resolved config: {:#?}", config);

    match cli.command {
        Command::Serve(cmd) => async_serve(config, cmd),
    }
}

#[tokio::main]
async fn async_serve(config: ServerConfig, cmd: ServeCommand) -> Result<()> {
    handle_serve(config, cmd).await
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Liveq - live distributed query orchestration server.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
}

impl CommonOpts {
    fn effective_log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else if self.trace {
            LevelFilter::Trace
        } else {
            match self.verbose {
                0 => LevelFilter::Info,
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeCommand),
}

#[derive(Debug, Args)]
struct ServeCommand {
    /// Override the configured listen address
    #[arg(long, value_name = "ADDR")]
    address: Option<String>,
}

fn init_logging(common: &CommonOpts) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = common.effective_log_level();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("liveq={level},tower_http={level}")));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok();

    // Also init env_logger for log-crate users.
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_level(level);
    builder.try_init().ok();
}

async fn handle_serve(mut config: ServerConfig, cmd: ServeCommand) -> Result<()> {
    if let Some(address) = cmd.address {
        config.address = address;
    }

    let auth = AuthState::new();
    for (index, user) in config.users.iter().enumerate() {
        auth.add_user(
            &user.password,
            Viewer {
                id: index as u64 + 1,
                username: user.username.clone(),
                role: user.role,
                team_id: user.team_id,
            },
        );
    }
    if config.users.is_empty() {
        info!("no users configured; REST calls will not authenticate");
    }

    let datastore = Arc::new(MemDatastore::new());
    let address = config.address.clone();
    let state = AppState::new(datastore, auth, config);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {}", address))?;
    info!("listening on {}", address);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
