//! Health check endpoint.

use crate::metrics::ConnectorMetrics;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `ok` or `degraded`.
    pub status: String,
    /// Connector version.
    pub version: String,
    /// Committed watermark.
    pub watermark: u64,
    /// Whether the last cycle failed.
    pub last_cycle_failed: bool,
    /// Whether Allisa answered the last connectivity check.
    pub target_reachable: bool,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler. Answers 503 while degraded.
pub async fn health_handler(
    Extension(metrics): Extension<Arc<ConnectorMetrics>>,
) -> (StatusCode, Json<HealthStatus>) {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    let healthy = metrics.is_healthy();
    let status = HealthStatus {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        watermark: metrics.watermark.load(Ordering::Relaxed),
        last_cycle_failed: metrics.last_cycle_failed.load(Ordering::Relaxed),
        target_reachable: metrics.target_reachable.load(Ordering::Relaxed),
        uptime_seconds: uptime,
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}
