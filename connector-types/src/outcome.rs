//! Per-record delivery outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of delivering one mapped record to Allisa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Allisa accepted the record (or there was nothing to post).
    Accepted,
    /// Allisa rejected the record and retrying will not help.
    RejectedPermanent {
        /// Why the record was rejected.
        reason: String,
    },
    /// Delivery failed transiently and retries were exhausted for this cycle.
    RejectedRetryable {
        /// Last error seen.
        reason: String,
    },
}

impl DeliveryOutcome {
    /// Create a permanent rejection.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::RejectedPermanent {
            reason: reason.into(),
        }
    }

    /// Create a retryable rejection.
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::RejectedRetryable {
            reason: reason.into(),
        }
    }

    /// Terminal outcomes allow the watermark to move past the record.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::RejectedRetryable { .. })
    }

    /// Check if the record was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// The outcome class without its reason.
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Accepted => OutcomeKind::Accepted,
            Self::RejectedPermanent { .. } => OutcomeKind::RejectedPermanent,
            Self::RejectedRetryable { .. } => OutcomeKind::RejectedRetryable,
        }
    }

    /// Rejection reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Accepted => None,
            Self::RejectedPermanent { reason } | Self::RejectedRetryable { reason } => {
                Some(reason)
            }
        }
    }
}

/// Outcome classes, including the engine-level dead-letter class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Accepted by Allisa.
    Accepted,
    /// Rejected permanently by Allisa.
    RejectedPermanent,
    /// Rejected transiently; blocks the watermark.
    RejectedRetryable,
    /// Failed mapping and was set aside.
    DeadLettered,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Accepted => "accepted",
            Self::RejectedPermanent => "rejected_permanent",
            Self::RejectedRetryable => "rejected_retryable",
            Self::DeadLettered => "dead_lettered",
        };
        f.write_str(label)
    }
}
