//! `prometheus-arena` binary.
//!
//! Loads configuration from the environment, starts both worker pools with
//! the in-process collaborators, and serves the HTTP API until Ctrl-C.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use prometheus_arena::builders::OrchestratorBuilder;
use prometheus_arena::config::OrchestratorConfig;
use prometheus_arena::runtime::server::{ctrl_c, serve};
use prometheus_arena::util::init_tracing;
use prometheus_arena::util::metrics::init_metrics;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = OrchestratorConfig::from_env().map_err(|e| anyhow!(e))?;
    if init_metrics().is_none() {
        tracing::warn!("metrics endpoint will report 503");
    }

    let addr = config.server.bind_addr.clone();
    tracing::info!(
        task_workers = config.task_pool.workers,
        competition_workers = config.competition_pool.workers,
        "building orchestrator"
    );
    let orchestrator = Arc::new(OrchestratorBuilder::new(config).build()?);

    serve(orchestrator, &addr, ctrl_c()).await?;
    tracing::info!("arena stopped");
    Ok(())
}
