//! Durable connector state.
//!
//! Everything the connector must remember between runs, keyed by instance id:
//! the watermark, the delivery ledger (per-case keys already accepted by
//! Allisa), dead letters, per-record exhausted-cycle counts and the tag sync
//! cursors.

mod file;
mod sqlite;

pub use file::FileStore;
pub use sqlite::SqliteStore;

use crate::config::{StorageConfig, StoreBackend};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use connector_types::{IdempotencyKey, InstanceId, OutcomeKind, Watermark};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A posting that was set aside instead of delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Idempotency key of the posting.
    pub idempotency_key: IdempotencyKey,
    /// WiseTime time group id.
    pub source_id: String,
    /// Stream position of the posting.
    pub watermark: Watermark,
    /// Why it was set aside (dead-lettered or rejected permanently).
    pub kind: OutcomeKind,
    /// Human-readable reason.
    pub reason: String,
    /// When the record was set aside.
    pub recorded_at: DateTime<Utc>,
}

/// Trait for state store backends.
///
/// Every write must be durable once the call returns; the watermark is only
/// saved after the batch it covers is terminal.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// The stored watermark, `None` if the instance never committed.
    async fn load_watermark(&self, instance: &InstanceId) -> StoreResult<Option<Watermark>>;

    /// Persist the watermark.
    async fn save_watermark(&self, instance: &InstanceId, watermark: Watermark)
        -> StoreResult<()>;

    /// Remember that `delivery_key` was accepted by Allisa.
    async fn record_delivery(
        &self,
        instance: &InstanceId,
        delivery_key: &str,
        watermark: Watermark,
    ) -> StoreResult<()>;

    /// Whether `delivery_key` was accepted earlier.
    async fn is_delivered(&self, instance: &InstanceId, delivery_key: &str) -> StoreResult<bool>;

    /// Forget deliveries at or below `up_to`. Returns the number removed.
    async fn prune_deliveries(&self, instance: &InstanceId, up_to: Watermark) -> StoreResult<u64>;

    /// Record a dead letter. Recording the same key again replaces it.
    async fn record_dead_letter(&self, instance: &InstanceId, letter: &DeadLetter)
        -> StoreResult<()>;

    /// Most recent dead letters first.
    async fn dead_letters(&self, instance: &InstanceId, limit: usize)
        -> StoreResult<Vec<DeadLetter>>;

    /// Count one more cycle in which the record exhausted its retries.
    /// Returns the new count.
    async fn increment_exhausted(
        &self,
        instance: &InstanceId,
        key: &IdempotencyKey,
    ) -> StoreResult<u32>;

    /// Reset the exhausted-cycle count of a record.
    async fn clear_exhausted(&self, instance: &InstanceId, key: &IdempotencyKey)
        -> StoreResult<()>;

    /// A named counter (tag sync cursors).
    async fn get_counter(&self, instance: &InstanceId, name: &str) -> StoreResult<Option<u64>>;

    /// Set a named counter.
    async fn put_counter(&self, instance: &InstanceId, name: &str, value: u64)
        -> StoreResult<()>;
}

/// Open the configured store backend.
pub async fn open(config: &StorageConfig) -> StoreResult<Arc<dyn StateStore>> {
    match config.backend {
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::new(&config.path).await?)),
        StoreBackend::File => Ok(Arc::new(FileStore::open(&config.path).await?)),
    }
}

fn parse_kind(value: &str) -> StoreResult<OutcomeKind> {
    match value {
        "accepted" => Ok(OutcomeKind::Accepted),
        "rejected_permanent" => Ok(OutcomeKind::RejectedPermanent),
        "rejected_retryable" => Ok(OutcomeKind::RejectedRetryable),
        "dead_lettered" => Ok(OutcomeKind::DeadLettered),
        other => Err(StoreError::Corrupt(format!("unknown outcome kind {other:?}"))),
    }
}

/// Behaviour shared by every backend.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;

    fn instance(name: &str) -> InstanceId {
        InstanceId::new(name).unwrap()
    }

    fn letter(source_id: &str, seq: u64) -> DeadLetter {
        DeadLetter {
            idempotency_key: IdempotencyKey::derive(source_id),
            source_id: source_id.to_string(),
            watermark: Watermark::new(seq),
            kind: OutcomeKind::DeadLettered,
            reason: "external user id is required".into(),
            recorded_at: Utc::now(),
        }
    }

    pub(crate) async fn watermark_round_trip(store: &dyn StateStore) {
        let a = instance("a");
        assert_eq!(store.load_watermark(&a).await.unwrap(), None);

        store.save_watermark(&a, Watermark::new(103)).await.unwrap();
        store.save_watermark(&a, Watermark::new(105)).await.unwrap();
        assert_eq!(
            store.load_watermark(&a).await.unwrap(),
            Some(Watermark::new(105))
        );
    }

    pub(crate) async fn instances_are_isolated(store: &dyn StateStore) {
        let a = instance("a");
        let b = instance("b");
        store.save_watermark(&a, Watermark::new(7)).await.unwrap();
        store.record_delivery(&a, "k-1", Watermark::new(7)).await.unwrap();

        assert_eq!(store.load_watermark(&b).await.unwrap(), None);
        assert!(!store.is_delivered(&b, "k-1").await.unwrap());
    }

    pub(crate) async fn deliveries_prune_by_watermark(store: &dyn StateStore) {
        let a = instance("a");
        store.record_delivery(&a, "k-101", Watermark::new(101)).await.unwrap();
        store.record_delivery(&a, "k-102", Watermark::new(102)).await.unwrap();
        store.record_delivery(&a, "k-102", Watermark::new(102)).await.unwrap();

        assert!(store.is_delivered(&a, "k-101").await.unwrap());
        assert_eq!(
            store.prune_deliveries(&a, Watermark::new(101)).await.unwrap(),
            1
        );
        assert!(!store.is_delivered(&a, "k-101").await.unwrap());
        assert!(store.is_delivered(&a, "k-102").await.unwrap());
    }

    pub(crate) async fn watermarks_above_i64_range(store: &dyn StateStore) {
        let a = instance("a");
        let high = Watermark::new(1 << 63);
        store.save_watermark(&a, high).await.unwrap();
        assert_eq!(store.load_watermark(&a).await.unwrap(), Some(high));

        store.record_delivery(&a, "k-low", Watermark::new(5)).await.unwrap();
        store.record_delivery(&a, "k-high", high).await.unwrap();
        store
            .record_delivery(&a, "k-max", Watermark::new(u64::MAX))
            .await
            .unwrap();
        assert_eq!(store.prune_deliveries(&a, high).await.unwrap(), 2);
        assert!(store.is_delivered(&a, "k-max").await.unwrap());

        store.record_dead_letter(&a, &letter("g-max", u64::MAX)).await.unwrap();
        let letters = store.dead_letters(&a, 10).await.unwrap();
        assert_eq!(letters[0].watermark, Watermark::new(u64::MAX));
    }

    pub(crate) async fn dead_letters_replace_and_order(store: &dyn StateStore) {
        let a = instance("a");
        let mut first = letter("g-1", 101);
        first.recorded_at = Utc::now() - chrono::Duration::seconds(10);
        store.record_dead_letter(&a, &first).await.unwrap();
        store.record_dead_letter(&a, &letter("g-2", 102)).await.unwrap();

        let mut replaced = letter("g-1", 101);
        replaced.kind = OutcomeKind::RejectedPermanent;
        replaced.reason = "can't find Allisa case".into();
        replaced.recorded_at = Utc::now() + chrono::Duration::seconds(10);
        store.record_dead_letter(&a, &replaced).await.unwrap();

        let letters = store.dead_letters(&a, 10).await.unwrap();
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[0].source_id, "g-1");
        assert_eq!(letters[0].kind, OutcomeKind::RejectedPermanent);
        assert_eq!(store.dead_letters(&a, 1).await.unwrap().len(), 1);
    }

    pub(crate) async fn exhausted_counts(store: &dyn StateStore) {
        let a = instance("a");
        let key = IdempotencyKey::derive("g-1");
        assert_eq!(store.increment_exhausted(&a, &key).await.unwrap(), 1);
        assert_eq!(store.increment_exhausted(&a, &key).await.unwrap(), 2);
        store.clear_exhausted(&a, &key).await.unwrap();
        assert_eq!(store.increment_exhausted(&a, &key).await.unwrap(), 1);
    }

    pub(crate) async fn counters(store: &dyn StateStore) {
        let a = instance("a");
        assert_eq!(store.get_counter(&a, "tag_sync.page").await.unwrap(), None);
        store.put_counter(&a, "tag_sync.page", 3).await.unwrap();
        store.put_counter(&a, "tag_sync.page", 4).await.unwrap();
        assert_eq!(
            store.get_counter(&a, "tag_sync.page").await.unwrap(),
            Some(4)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_parse_back() {
        for kind in [
            OutcomeKind::Accepted,
            OutcomeKind::RejectedPermanent,
            OutcomeKind::RejectedRetryable,
            OutcomeKind::DeadLettered,
        ] {
            assert_eq!(parse_kind(&kind.to_string()).unwrap(), kind);
        }
        assert!(parse_kind("lost").is_err());
    }

    #[tokio::test]
    async fn open_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StoreBackend::File,
            path: dir.path().join("state.json"),
        };
        let store = open(&config).await.unwrap();
        let a = InstanceId::new("a").unwrap();
        store.save_watermark(&a, Watermark::new(3)).await.unwrap();
        assert!(config.path.exists());
    }
}
