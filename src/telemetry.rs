//! Operator telemetry: Prometheus metrics and health endpoints.

pub mod health;
pub mod metrics;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tracing::info;

/// Serve `/metrics` on the given port.
pub async fn serve_metrics(port: u16, registry: Arc<Registry>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(registry);
    serve(port, app, "metrics").await
}

/// Serve `/healthz` and `/readyz` on the given port.
pub async fn serve_health(port: u16, state: health::HealthState) -> anyhow::Result<()> {
    serve(port, health::router(state), "health").await
}

async fn serve(port: u16, app: Router, server: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port, server, "HTTP server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
