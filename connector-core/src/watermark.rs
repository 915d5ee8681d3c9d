//! Sync state carried from one cycle to the next.
//!
//! The watermark is the last WiseTime stream position whose postings all
//! reached a terminal outcome. It only moves forward, except through an
//! explicit operator reset.

use connector_types::{InstanceId, Watermark};

/// Error type for watermark transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatermarkError {
    /// A commit would move the watermark backwards.
    #[error("watermark regression: {current} -> {proposed}")]
    Regression {
        /// The current watermark.
        current: Watermark,
        /// The rejected watermark.
        proposed: Watermark,
    },

    /// A reset would move the watermark back without being forced.
    #[error(
        "moving the watermark back from {current} to {proposed} posts the time in between again"
    )]
    Rewind {
        /// The current watermark.
        current: Watermark,
        /// The requested watermark.
        proposed: Watermark,
    },
}

/// State passed into and out of each cycle.
///
/// The connector owns no hidden globals: a cycle receives a `SyncState`,
/// and returns the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// Connector instance this state belongs to.
    pub instance_id: InstanceId,
    /// Last committed watermark.
    pub watermark: Watermark,
    /// Cycles that ran to completion.
    pub cycles_completed: u64,
    /// Cycles in a row that failed before dispatch (source down, store error).
    pub consecutive_failures: u32,
}

impl SyncState {
    /// Create state resuming from a persisted watermark.
    pub fn new(instance_id: InstanceId, watermark: Watermark) -> Self {
        Self {
            instance_id,
            watermark,
            cycles_completed: 0,
            consecutive_failures: 0,
        }
    }

    /// State after a committed batch.
    pub fn committed(self, to: Watermark) -> Result<Self, WatermarkError> {
        if to < self.watermark {
            return Err(WatermarkError::Regression {
                current: self.watermark,
                proposed: to,
            });
        }
        Ok(Self {
            watermark: to,
            cycles_completed: self.cycles_completed + 1,
            consecutive_failures: 0,
            ..self
        })
    }

    /// State after a batch that kept the watermark (retryable records).
    pub fn held(self) -> Self {
        Self {
            cycles_completed: self.cycles_completed + 1,
            consecutive_failures: 0,
            ..self
        }
    }

    /// State after a cycle that aborted before finishing.
    pub fn failed(self) -> Self {
        Self {
            consecutive_failures: self.consecutive_failures.saturating_add(1),
            ..self
        }
    }

    /// Operator reset to an arbitrary position.
    ///
    /// Delivery records at or below the committed watermark are pruned, so
    /// the next cycle posts everything after `to` again. Moving back
    /// therefore needs `force`.
    pub fn reset(self, to: Watermark, force: bool) -> Result<Self, WatermarkError> {
        if to < self.watermark && !force {
            return Err(WatermarkError::Rewind {
                current: self.watermark,
                proposed: to,
            });
        }
        Ok(Self {
            watermark: to,
            consecutive_failures: 0,
            ..self
        })
    }
}
