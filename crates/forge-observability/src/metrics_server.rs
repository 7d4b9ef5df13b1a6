//! HTTP server exposing Prometheus metrics for scraping.
//!
//! Gated behind the `metrics-server` feature since most deployments run the
//! orchestrator behind an existing ingress and only need the `/metrics`
//! route, not a whole extra listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;

use crate::error::Result;
use crate::metrics::MetricsRegistry;

/// Start the metrics server on `port` and run until the process exits.
/// Use `port = 0` to let the OS assign one (tests only; a real deployment
/// names a fixed port so scrape configs can target it).
pub async fn serve_metrics(port: u16) -> Result<()> {
    let (_, server_future) = serve_metrics_with_addr(port).await?;
    server_future.await
}

/// Start the metrics server and return its bound address alongside the
/// future that runs it, so callers binding to port 0 can discover the
/// actual port before awaiting.
pub async fn serve_metrics_with_addr(
    port: u16,
) -> Result<(SocketAddr, impl std::future::Future<Output = Result<()>>)> {
    let registry = MetricsRegistry::global();

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(registry);

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::error::Error::Metrics(format!("failed to bind to {addr}: {e}")))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| crate::error::Error::Metrics(format!("failed to read local addr: {e}")))?;

    tracing::info!(%local_addr, "metrics server listening");

    let server_future = async move {
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::Error::Metrics(format!("server error: {e}")))?;
        Ok(())
    };

    Ok((local_addr, server_future))
}

async fn metrics_handler(State(registry): State<Arc<MetricsRegistry>>) -> Response {
    match registry.export() {
        Ok(metrics) => (StatusCode::OK, metrics).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to export metrics: {e}"),
        )
            .into_response(),
    }
}

async fn health_handler() -> Response {
    (StatusCode::OK, "OK").into_response()
}
