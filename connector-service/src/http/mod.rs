//! HTTP endpoints for the connector.
//!
//! Provides a health check and Prometheus metrics.

pub mod health;
mod metrics;

use crate::metrics::ConnectorMetrics;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;
use tokio::sync::watch;

pub use health::{init_start_time, HealthStatus};

/// Build the HTTP router with all endpoints.
pub fn build_router(metrics: Arc<ConnectorMetrics>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(metrics))
}

/// Serve the endpoints on `bind_address` until `shutdown` turns true.
pub async fn serve(
    bind_address: &str,
    metrics: Arc<ConnectorMetrics>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    init_start_time();
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "http endpoints listening");

    axum::serve(listener, build_router(metrics))
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::atomic::Ordering;
    use tower::util::ServiceExt;

    fn healthy_metrics() -> Arc<ConnectorMetrics> {
        let metrics = Arc::new(ConnectorMetrics::default());
        metrics.target_reachable.store(true, Ordering::Relaxed);
        metrics
    }

    async fn get(app: Router, uri: &str) -> axum::response::Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let response = get(build_router(healthy_metrics()), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_endpoint_reports_failed_cycle() {
        let metrics = healthy_metrics();
        metrics.last_cycle_failed.store(true, Ordering::Relaxed);

        let response = get(build_router(metrics), "/health").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_endpoint_reports_unreachable_target() {
        let metrics = Arc::new(ConnectorMetrics::default());
        let response = get(build_router(metrics), "/health").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_text() {
        let metrics = healthy_metrics();
        metrics.accepted_total.store(7, Ordering::Relaxed);

        let response = get(build_router(metrics), "/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("allisa_connector_records_accepted_total 7"));
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let response = get(build_router(healthy_metrics()), "/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
