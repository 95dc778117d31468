pub mod adapters;
pub mod budget;
pub mod builder;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod in_flight;
pub mod kpi;
pub mod lifecycle;
pub mod metrics_store;
pub mod models;
pub mod redaction;
pub mod retry;
pub mod scheduler;
pub mod sync;
pub mod vocabulary;

use crate::config::ServiceConfig;
use crate::engine::EngineCore;
use anyhow::Context;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Runs the service until Ctrl-C: loads config, opens the database, starts the sync scheduler.
pub async fn run() -> anyhow::Result<()> {
    let config = ServiceConfig::load().context("failed to load service configuration")?;
    std::fs::create_dir_all(config.data_dir())
        .with_context(|| format!("failed to create data directory {}", config.data_dir().display()))?;
    init_tracing(&config.log_dir()).map_err(anyhow::Error::msg)?;

    let engine = EngineCore::from_config(&config).context("failed to initialise engine")?;
    tracing::info!(
        database = %config.database_path().display(),
        graph_base_url = %config.graph_base_url,
        "creativity engine starting"
    );
    engine.start_scheduler().await;

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");
    engine.shutdown().await;
    Ok(())
}

fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "engine.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
