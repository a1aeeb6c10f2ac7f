//! NFT staking service.
//!
//! Loads pools from config, replays the position journal and serves the
//! staking API until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nft_staking::api::{self, AppState};
use nft_staking::config::ServiceConfig;
use nft_staking::{Clock, PoolRegistry, PositionStore, StakingCoordinator, SystemClock};

#[derive(Debug, Parser)]
#[command(name = "nft-staking", version, about = "NFT staking ledger and rewards service")]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "NFT_STAKING_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides [server].bind_addr
    #[arg(long, env = "NFT_STAKING_BIND")]
    bind: Option<String>,

    /// Journal file, overrides [ledger].journal_path
    #[arg(long, env = "NFT_STAKING_JOURNAL")]
    journal: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "NFT_STAKING_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            warn!("No config file given; starting with defaults and no pools");
            ServiceConfig::default()
        }
    };
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(journal) = args.journal {
        config.ledger.journal_path = Some(journal);
    }
    config.validate().context("Invalid configuration")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let registry = Arc::new(PoolRegistry::new());
    config
        .register_pools(&registry, clock.unix_timestamp())
        .context("Failed to register pools")?;

    let store = match &config.ledger.journal_path {
        Some(path) => PositionStore::open(path)
            .with_context(|| format!("Failed to open journal {}", path.display()))?,
        None => {
            warn!("No journal configured; positions are kept in memory only");
            PositionStore::in_memory()
        }
    };
    let store = Arc::new(store);
    registry.restore_counters(&store);

    let coordinator = Arc::new(StakingCoordinator::new(
        registry,
        store,
        clock,
        Duration::from_millis(config.ledger.lock_timeout_ms),
    ));

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(
        pools = coordinator.registry().len(),
        positions = coordinator.store().len(),
        "NFT staking service starting"
    );

    let app = api::router(AppState::new(coordinator), &config.server);
    api::serve(listener, app, shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
