//! HTTP server for galaxyd

use crate::daemon::Daemon;
use crate::routes;
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Serve until `shutdown` resolves, then clean up every worker before the
/// listener stops accepting.
///
/// Log streams and live channel sessions observe the daemon's shutdown flag,
/// so open connections drain once cleanup has run.
pub async fn run<F>(daemon: Arc<Daemon>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = daemon.config().listen_addr.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("  Listening on http://{}", addr);

    serve(listener, daemon, shutdown).await
}

/// Serve on an already bound listener; once `shutdown` resolves the daemon
/// is shut down and in-flight connections drain
pub async fn serve<F>(listener: TcpListener, daemon: Arc<Daemon>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = routes::router(Arc::clone(&daemon));
    let cleanup = async move {
        shutdown.await;
        daemon.shutdown().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(cleanup)
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}
