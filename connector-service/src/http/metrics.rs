//! Prometheus metrics endpoint.

use crate::metrics::ConnectorMetrics;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Counters are monotonic since startup; gauges reflect the last cycle.
pub async fn metrics_handler(
    Extension(metrics): Extension<Arc<ConnectorMetrics>>,
) -> impl IntoResponse {
    let m = &metrics;

    let cycles = m.cycles_total.load(Ordering::Relaxed);
    let aborted = m.cycles_aborted_total.load(Ordering::Relaxed);
    let fetched = m.postings_fetched_total.load(Ordering::Relaxed);
    let accepted = m.accepted_total.load(Ordering::Relaxed);
    let permanent = m.rejected_permanent_total.load(Ordering::Relaxed);
    let retryable = m.rejected_retryable_total.load(Ordering::Relaxed);
    let dead_lettered = m.dead_lettered_total.load(Ordering::Relaxed);
    let tags = m.tags_upserted_total.load(Ordering::Relaxed);

    let watermark = m.watermark.load(Ordering::Relaxed);
    let last_failed = u8::from(m.last_cycle_failed.load(Ordering::Relaxed));
    let reachable = u8::from(m.target_reachable.load(Ordering::Relaxed));

    let body = format!(
        r#"# HELP allisa_connector_info Connector information
# TYPE allisa_connector_info gauge
allisa_connector_info{{version="{version}"}} 1

# HELP allisa_connector_cycles_total Cycles run to completion
# TYPE allisa_connector_cycles_total counter
allisa_connector_cycles_total {cycles}

# HELP allisa_connector_cycles_aborted_total Cycles aborted before completion
# TYPE allisa_connector_cycles_aborted_total counter
allisa_connector_cycles_aborted_total {aborted}

# HELP allisa_connector_postings_fetched_total Postings fetched from WiseTime
# TYPE allisa_connector_postings_fetched_total counter
allisa_connector_postings_fetched_total {fetched}

# HELP allisa_connector_records_accepted_total Records accepted by Allisa
# TYPE allisa_connector_records_accepted_total counter
allisa_connector_records_accepted_total {accepted}

# HELP allisa_connector_records_rejected_permanent_total Records rejected permanently
# TYPE allisa_connector_records_rejected_permanent_total counter
allisa_connector_records_rejected_permanent_total {permanent}

# HELP allisa_connector_records_rejected_retryable_total Records left retryable at cycle end
# TYPE allisa_connector_records_rejected_retryable_total counter
allisa_connector_records_rejected_retryable_total {retryable}

# HELP allisa_connector_records_dead_lettered_total Postings dead-lettered by validation
# TYPE allisa_connector_records_dead_lettered_total counter
allisa_connector_records_dead_lettered_total {dead_lettered}

# HELP allisa_connector_tags_upserted_total Tags upserted by the tag sync job
# TYPE allisa_connector_tags_upserted_total counter
allisa_connector_tags_upserted_total {tags}

# HELP allisa_connector_watermark Committed watermark
# TYPE allisa_connector_watermark gauge
allisa_connector_watermark {watermark}

# HELP allisa_connector_last_cycle_failed Whether the last cycle failed
# TYPE allisa_connector_last_cycle_failed gauge
allisa_connector_last_cycle_failed {last_failed}

# HELP allisa_connector_target_reachable Whether Allisa answered the last check
# TYPE allisa_connector_target_reachable gauge
allisa_connector_target_reachable {reachable}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
