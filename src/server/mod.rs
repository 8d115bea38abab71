//! HTTP surface for the batch pipeline
//!
//! Serves the page-at-a-time analysis API via axum. The client drives an
//! analysis by posting successive `batchIndex` values and polling the status
//! endpoint between calls.

mod routes;

pub use routes::router;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::AnalysisPipeline;

/// Shared handler state
pub struct AppState {
    pub pipeline: Arc<AnalysisPipeline>,
    /// Cancelled on shutdown; every in-flight batch runs under a child of it
    pub shutdown: CancellationToken,
}

/// Bind `bind` and serve until `shutdown` is cancelled
pub async fn serve(
    pipeline: Arc<AnalysisPipeline>,
    bind: &str,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    let addr = listener.local_addr()?;
    eprintln!("   Listening on http://{}", addr);
    eprintln!("   Backend: {}", pipeline.model_name());

    serve_listener(listener, pipeline, shutdown).await
}

/// Serve on an already-bound listener
pub async fn serve_listener(
    listener: TcpListener,
    pipeline: Arc<AnalysisPipeline>,
    shutdown: CancellationToken,
) -> Result<()> {
    let interval = Duration::from_secs(pipeline.config().server.cleanup_interval_secs.max(1));
    let janitor = tokio::spawn(cleanup_loop(
        Arc::clone(&pipeline),
        interval,
        shutdown.child_token(),
    ));

    let state = Arc::new(AppState {
        pipeline,
        shutdown: shutdown.clone(),
    });
    let app = router(state);

    info!("HTTP server started on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    janitor.abort();
    info!("HTTP server stopped");
    Ok(())
}

/// Periodically drop expired workspaces
async fn cleanup_loop(pipeline: Arc<AnalysisPipeline>, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    // First tick fires immediately; skip it so startup stays fast
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match pipeline.cleanup_expired().await {
            Ok(0) => debug!("No expired workspaces"),
            Ok(n) => info!("Removed {} expired workspaces", n),
            Err(e) => warn!("Workspace cleanup failed: {}", e),
        }
    }
}
