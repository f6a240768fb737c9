//! berth control plane
//!
//! Owns application revision ledgers and channels, keeps every channel's
//! active revision resolved and hands changed channels to the scheduler
//! queue. A background worker repairs any drift left by interrupted edits.

use std::sync::Arc;

use anyhow::Result;
use berth_control_plane::{config, db::Database, edit_service, scheduler::RepairWorker};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to BERTH_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting berth control plane");
    info!(
        repair_interval_secs = config.repair_interval.as_secs(),
        port_range_start = config.port_range_start,
        "Configuration loaded"
    );

    let db = match Database::connect(&config.database).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    // Run migrations in dev mode
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    db.health_check().await?;

    let service = Arc::new(edit_service(&db, &config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let repair_worker = RepairWorker::new(service, config.repair_interval);
    let repair_handle = tokio::spawn(async move {
        repair_worker.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, repair_handle).await {
        warn!(error = %e, "Repair worker did not shut down in time");
    }

    info!("Control plane shutdown complete");
    Ok(())
}
