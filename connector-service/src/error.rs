//! Error types for the connector service.

use connector_types::SyncError;
use std::path::PathBuf;

/// Main error type for service operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// State store error.
    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    /// Client construction error.
    #[error("client error: {0}")]
    Client(#[from] connector_client::ClientError),

    /// A watermark change was refused.
    #[error("watermark error: {0}")]
    Watermark(#[from] connector_core::WatermarkError),

    /// A cycle failed in a way that stops the connector.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// State store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// State file could not be read or written.
    #[error("state file {path}: {source}")]
    File {
        /// Path of the state file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// State could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data violates an invariant.
    #[error("corrupt state: {0}")]
    Corrupt(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::StateStore(err.to_string())
    }
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_fatal_sync_errors() {
        let err: SyncError = StoreError::Corrupt("watermark is negative".into()).into();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("watermark is negative"));
    }
}
