//! Mimir AIP - self-hosted data platform execution core
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (./mimir.toml if present)
//! cargo run --release
//!
//! # Explicit config and bind address
//! cargo run --release -- --config deploy/mimir.toml --addr 0.0.0.0:9090
//! ```
//!
//! # Environment Variables
//!
//! - `MIMIR_CONFIG`: path to the TOML config file
//! - `MIMIR_SERVER_PORT`, `MIMIR_SCHEDULER_MAX_JOBS`, ...: per-key overrides
//! - `RUST_LOG`: logging level (default: info)
//! - `RESET_DB`: set to "true" to wipe all persistent data on startup

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mimir_aip::api::{create_app, ApiState};
use mimir_aip::config::AppConfig;
use mimir_aip::monitoring::MonitoringExecutor;
use mimir_aip::pipeline::PipelineExecutor;
use mimir_aip::plugins::{register_builtins, PluginRegistry};
use mimir_aip::scheduler::Scheduler;
use mimir_aip::storage::Store;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "mimir-aip")]
#[command(about = "Mimir AIP execution core")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (overrides MIMIR_CONFIG and ./mimir.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the server bind address (default from config, "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Reset all persistent data (jobs, executions, alerts, twins) on startup.
    /// WARNING: This is destructive and cannot be undone!
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long)]
    reset_db: bool,
}

/// Check if database reset is requested via CLI flag or environment variable.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    if let Ok(val) = std::env::var("RESET_DB") {
        let val_lower = val.to_lowercase();
        return val_lower == "true" || val_lower == "1" || val_lower == "yes";
    }
    false
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = CliArgs::parse();
    let config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;

    if should_reset_db(args.reset_db) {
        let path = &config.persistence.database_path;
        if path.exists() {
            warn!(path = %path.display(), "RESET_DB requested — wiping persistent data");
            std::fs::remove_dir_all(path).context("resetting database directory")?;
        }
    }

    // Persistence opens first; everything else hangs off it.
    let store = Store::open(&config.persistence.database_path).context("opening store")?;

    // Populate the plugin catalog, then seal it: anything later goes
    // through the admin registration path.
    let registry = Arc::new(PluginRegistry::new());
    register_builtins(&registry).context("registering built-in plugins")?;
    if config.plugins.auto_discovery {
        // external plugin loading is an integration concern; the directories
        // are acknowledged so operators see their config was read
        for dir in &config.plugins.directories {
            info!(dir = %dir.display(), "Plugin directory configured (external loading not active)");
        }
    }
    registry.seal();

    let cancel = CancellationToken::new();
    let executor = Arc::new(PipelineExecutor::new(
        Arc::clone(&registry),
        Arc::clone(&store),
        config.plugins.step_timeout(),
    ));
    let monitoring = Arc::new(MonitoringExecutor::new(Arc::clone(&store)));

    // Scheduler recovers before its tick loop starts, so the orphan sweep
    // can never race a fresh dispatch.
    let scheduler = if config.scheduler.enabled {
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&executor),
            Arc::clone(&monitoring),
            config.scheduler.clone(),
            cancel.child_token(),
        );
        scheduler
            .recover()
            .await
            .context("scheduler recovery")?;
        tokio::spawn(Arc::clone(&scheduler).run());
        Some(scheduler)
    } else {
        info!("Scheduler disabled by configuration");
        None
    };

    let maintenance = tokio::spawn(maintenance_loop(
        Arc::clone(&store),
        config.persistence.checkpoint_interval(),
        config.persistence.retention_days,
        cancel.child_token(),
    ));

    let state = ApiState {
        store: Arc::clone(&store),
        registry,
        executor,
        monitoring,
        scheduler: scheduler.clone(),
        simulation: config.simulation.clone(),
        llm: None,
        cancel: cancel.child_token(),
    };
    let app = create_app(state);

    let addr = args.addr.unwrap_or_else(|| config.server.bind_addr());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "Mimir AIP listening");

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_cancel.cancel();
        })
        .await
        .context("serving HTTP")?;

    // Graceful shutdown: drain the scheduler, then checkpoint and back up.
    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    maintenance.abort();
    if let Err(e) = store.checkpoint() {
        warn!(error = %e, "Final checkpoint failed");
    }
    if let Err(e) = store.backup_to(&config.persistence.backup_path) {
        warn!(error = %e, "Shutdown backup failed");
    }
    info!("Shutdown complete");
    Ok(())
}

/// Periodic flush and retention purge until cancelled.
async fn maintenance_loop(
    store: Arc<Store>,
    interval: std::time::Duration,
    retention_days: u32,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = store.checkpoint() {
                    warn!(error = %e, "Periodic checkpoint failed");
                }
                if let Err(e) = store.purge_retained(retention_days) {
                    warn!(error = %e, "Retention purge failed");
                }
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
