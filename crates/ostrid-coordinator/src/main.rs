//! Ostrid coordinator binary
//!
//! Runs the coordinator against the in-memory ledger gateway and loopback
//! channel. Usage: `ostrid-coordinator [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use prometheus::Registry;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ostrid_common::VERSION;
use ostrid_coordinator::{
    CoordinatorConfig, InMemoryLedgerGateway, LoopbackChannel, TaskMarketplace,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = CoordinatorConfig::load(config_path.as_deref())?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ostrid coordinator v{}", VERSION);
    info!("Loaded configuration: {:?}", config);

    let marketplace = Arc::new(
        TaskMarketplace::builder(config)
            .gateway(Arc::new(InMemoryLedgerGateway::new()))
            .channel(Arc::new(LoopbackChannel::new()))
            .build()?,
    );

    let registry = Registry::new();
    marketplace.metrics().register(&registry)?;

    let inbound = marketplace.start_inbound().await?;
    let monitor = Arc::new(marketplace.timeout_monitor());
    let sweeps = monitor.clone().start();

    info!("Ostrid coordinator started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    monitor.stop();
    inbound.abort();
    let _ = sweeps.await;

    let snapshot = marketplace.snapshot();
    info!(
        jobs = snapshot.jobs.len(),
        metric_families = registry.gather().len(),
        "Coordinator stopped"
    );

    Ok(())
}
