//! Connector metrics.
//!
//! Plain atomics, read by the `/metrics` and `/health` handlers and written
//! by the engine and the runner.

use connector_core::OutcomeSummary;
use connector_types::Watermark;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Metrics for observability.
#[derive(Debug, Default)]
pub struct ConnectorMetrics {
    /// Cycles run to completion (committed or held).
    pub cycles_total: AtomicU64,
    /// Cycles aborted (source errors, deadline, store errors).
    pub cycles_aborted_total: AtomicU64,
    /// Postings fetched from WiseTime.
    pub postings_fetched_total: AtomicU64,
    /// Records accepted by Allisa.
    pub accepted_total: AtomicU64,
    /// Records rejected permanently.
    pub rejected_permanent_total: AtomicU64,
    /// Records left retryable at the end of a cycle.
    pub rejected_retryable_total: AtomicU64,
    /// Postings dead-lettered.
    pub dead_lettered_total: AtomicU64,
    /// Tags upserted by the tag sync job.
    pub tags_upserted_total: AtomicU64,
    /// Current committed watermark.
    pub watermark: AtomicU64,
    /// Whether the last cycle failed.
    pub last_cycle_failed: AtomicBool,
    /// Whether Allisa answered the last connectivity check.
    pub target_reachable: AtomicBool,
}

impl ConnectorMetrics {
    /// Add the outcomes of a dispatched batch.
    pub fn record_summary(&self, summary: &OutcomeSummary) {
        self.accepted_total
            .fetch_add(summary.accepted as u64, Ordering::Relaxed);
        self.rejected_permanent_total
            .fetch_add(summary.rejected_permanent as u64, Ordering::Relaxed);
        self.rejected_retryable_total
            .fetch_add(summary.rejected_retryable as u64, Ordering::Relaxed);
        self.dead_lettered_total
            .fetch_add(summary.dead_lettered as u64, Ordering::Relaxed);
    }

    /// Record the end of a cycle.
    pub fn record_cycle(&self, watermark: Watermark, failed: bool) {
        if failed {
            self.cycles_aborted_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cycles_total.fetch_add(1, Ordering::Relaxed);
        }
        self.watermark.store(watermark.value(), Ordering::Relaxed);
        self.last_cycle_failed.store(failed, Ordering::Relaxed);
    }

    /// Whether the connector looks healthy.
    pub fn is_healthy(&self) -> bool {
        !self.last_cycle_failed.load(Ordering::Relaxed)
            && self.target_reachable.load(Ordering::Relaxed)
    }
}
