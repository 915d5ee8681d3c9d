//! Error taxonomy for the connector.

use thiserror::Error;

/// Errors that abort a sync cycle.
///
/// Record-level failures never surface here: they end as a
/// [`DeliveryOutcome`](crate::DeliveryOutcome) or a dead letter. An aborted
/// cycle keeps the watermark and is retried on the next tick.
/// [`SyncError::StateStore`] is the only fatal class.
#[derive(Debug, Error)]
pub enum SyncError {
    /// WiseTime could not be reached (transport, auth, 5xx, timeout).
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// WiseTime returned a payload that cannot be trusted.
    #[error("source data error: {0}")]
    SourceData(String),

    /// Allisa failed transiently.
    #[error("target retryable error: {0}")]
    TargetRetryable(String),

    /// The watermark store failed. Watermark integrity is not guaranteed.
    #[error("state store error: {0}")]
    StateStore(String),
}

impl SyncError {
    /// Only state store failures stop the connector.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StateStore(_))
    }
}

/// Reasons a posting cannot be mapped to an Allisa time entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The posting has no source id.
    #[error("posting has no source id")]
    MissingSourceId,

    /// The posting has no time rows.
    #[error("cannot post time group with no time rows")]
    NoTimeRows,

    /// The user has no external id.
    #[error("external user id is required in order to post to Allisa")]
    MissingActor,

    /// Allisa user ids are numeric.
    #[error("external user id must be numeric: {external_id}")]
    NonNumericActor {
        /// The offending external id.
        external_id: String,
    },

    /// Durations add up beyond what can be represented.
    #[error("time row durations are too large")]
    DurationOverflow,

    /// All rows of a posting must share one activity code.
    #[error("expected only one activity type, but got {}: {}", codes.len(), codes.join(", "))]
    MixedActivityCodes {
        /// Distinct activity codes found.
        codes: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::SourceUnavailable("connection refused".into());
        assert_eq!(err.to_string(), "source unavailable: connection refused");
    }

    #[test]
    fn only_state_store_is_fatal() {
        assert!(SyncError::StateStore("disk full".into()).is_fatal());
        assert!(!SyncError::SourceUnavailable("x".into()).is_fatal());
        assert!(!SyncError::TargetRetryable("x".into()).is_fatal());
    }

    #[test]
    fn mixed_activity_codes_message() {
        let err = ValidationError::MixedActivityCodes {
            codes: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "expected only one activity type, but got 2: a, b");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }
}
