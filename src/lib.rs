//! TestOps -- test-execution telemetry aggregator.
//!
//! This crate records simulated API, UI and JMeter test runs in a local
//! key/value store, aggregates them into daily and 7-day statistics, and
//! serves both along with a mock test-plan API over HTTP.

pub mod api;
pub mod config;
pub mod plans;
pub mod report;
pub mod runner;
pub mod storage;
pub mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{Config, StorageConfig};
use crate::storage::{SqliteStore, StorageArea};
use crate::telemetry::ExecutionStore;

/// Open the SQLite-backed storage area described by `cfg`.
pub fn open_storage(cfg: &StorageConfig) -> Result<(StorageArea, SqliteStore)> {
    tracing::info!(path = %cfg.path, "opening storage");
    let pool = storage::open_pool(&cfg.path)
        .with_context(|| format!("failed to open database at {}", cfg.path))?;
    let backend = SqliteStore::new(pool);
    let area = StorageArea::new(Arc::new(backend.clone()));
    Ok((area, backend))
}

/// Start the TestOps service: storage watcher, report refresh and API server.
pub async fn serve(config: Config) -> Result<()> {
    // 1. Storage, plus the watcher for other processes' writes
    let (area, backend) = open_storage(&config.storage)?;
    let watcher =
        storage::watch::spawn_external_watcher(backend, area.clone(), config.storage.watch_interval());

    // 2. Writer context for the API and simulator, separate reader context for the report
    let executions = ExecutionStore::new(area.context());
    let report = Arc::new(report::ReportView::new(ExecutionStore::new(area.context())));
    let _auto_refresh = config
        .report
        .auto_refresh
        .then(|| report.start(config.report.refresh_interval()));

    let state = api::state::AppState {
        plans: Arc::new(plans::TestPlanService::default()),
        simulator: runner::Simulator::new(executions.clone(), config.simulation.timings()),
        executions,
        report,
    };

    // 3. API server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind))?;
    let app = api::router(state);

    tracing::info!(%addr, "TestOps listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    let result = axum::serve(listener, app).await;

    watcher.abort();
    result?;
    Ok(())
}
