//! HTTP server lifecycle.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use crate::core::AppResult;
use crate::runtime::api::router;
use crate::runtime::orchestrator::Orchestrator;

/// Bind `addr` and serve the API until `shutdown` resolves, then drain
/// both worker pools.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve<F>(orchestrator: Arc<Orchestrator>, addr: &str, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    let local = listener.local_addr().context("listener has no local address")?;
    tracing::info!(addr = %local, "starting arena API server");

    axum::serve(listener, router(Arc::clone(&orchestrator)))
        .with_graceful_shutdown(shutdown)
        .await
        .context("server error")?;

    orchestrator.shutdown().await;
    Ok(())
}

/// Resolves on Ctrl-C.
pub async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received Ctrl-C, shutting down"),
        Err(err) => {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}
