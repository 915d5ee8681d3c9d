//! Per-batch outcome ledger.
//!
//! Every posting of a fetched batch is registered in the ledger and stays
//! pending until it receives an outcome:
//! 1. `register()` - the posting is part of the batch
//! 2. `record()` - the dispatcher delivered (or failed to deliver) it
//! 3. `dead_letter()` - mapping failed and the posting was set aside
//!
//! The watermark may only advance once the ledger is complete and holds no
//! retryable outcome. [`OutcomeLedger::decision`] enforces that rule.

use connector_types::{DeliveryOutcome, IdempotencyKey, OutcomeKind, Watermark};
use std::collections::HashMap;
use std::fmt;

/// Error type for ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Two postings of one batch derive the same key.
    #[error("duplicate posting in batch: {source_id}")]
    DuplicateKey {
        /// Source id of the repeated posting.
        source_id: String,
    },

    /// Outcome for a key that was never registered.
    #[error("outcome for unknown record {0}")]
    UnknownKey(IdempotencyKey),

    /// A decision was requested while records were still pending.
    #[error("batch incomplete: {pending} records pending")]
    Incomplete {
        /// Records without an outcome.
        pending: usize,
    },
}

/// Status of one registered posting.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryStatus {
    /// No outcome yet.
    Pending,
    /// Dispatch finished with this outcome.
    Delivered(DeliveryOutcome),
    /// Mapping failed; the posting will not be delivered.
    DeadLettered,
}

impl EntryStatus {
    fn kind(&self) -> Option<OutcomeKind> {
        match self {
            Self::Pending => None,
            Self::Delivered(outcome) => Some(outcome.kind()),
            Self::DeadLettered => Some(OutcomeKind::DeadLettered),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    source_id: String,
    watermark: Watermark,
    status: EntryStatus,
}

/// Counts of outcomes in a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeSummary {
    /// Accepted by Allisa (including no-op records).
    pub accepted: usize,
    /// Rejected permanently by Allisa.
    pub rejected_permanent: usize,
    /// Retryable failures left after this cycle's retries.
    pub rejected_retryable: usize,
    /// Postings that failed mapping.
    pub dead_lettered: usize,
}

impl OutcomeSummary {
    /// Count one outcome.
    pub fn add(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Accepted => self.accepted += 1,
            OutcomeKind::RejectedPermanent => self.rejected_permanent += 1,
            OutcomeKind::RejectedRetryable => self.rejected_retryable += 1,
            OutcomeKind::DeadLettered => self.dead_lettered += 1,
        }
    }

    /// Whether every record reached a terminal outcome.
    pub fn all_terminal(&self) -> bool {
        self.rejected_retryable == 0
    }
}

impl fmt::Display for OutcomeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepted={} rejected_permanent={} rejected_retryable={} dead_lettered={}",
            self.accepted, self.rejected_permanent, self.rejected_retryable, self.dead_lettered
        )
    }
}

/// Where the watermark goes after a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDecision {
    /// Every record is terminal; commit the batch's next watermark.
    Commit(Watermark),
    /// At least one record is retryable; keep the previous watermark.
    Hold(Watermark),
}

impl BatchDecision {
    /// The watermark to persist.
    pub fn watermark(&self) -> Watermark {
        match self {
            Self::Commit(w) | Self::Hold(w) => *w,
        }
    }
}

/// Ledger of outcomes for one fetched batch.
#[derive(Debug, Clone)]
pub struct OutcomeLedger {
    since: Watermark,
    next: Watermark,
    order: Vec<IdempotencyKey>,
    entries: HashMap<IdempotencyKey, Entry>,
}

impl OutcomeLedger {
    /// Create a ledger for a batch fetched after `since` whose next watermark is `next`.
    pub fn new(since: Watermark, next: Watermark) -> Self {
        Self {
            since,
            next,
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    /// Register a posting of the batch.
    pub fn register(
        &mut self,
        key: IdempotencyKey,
        source_id: impl Into<String>,
        watermark: Watermark,
    ) -> Result<(), LedgerError> {
        let source_id = source_id.into();
        if self.entries.contains_key(&key) {
            return Err(LedgerError::DuplicateKey { source_id });
        }
        self.order.push(key.clone());
        self.entries.insert(
            key,
            Entry {
                source_id,
                watermark,
                status: EntryStatus::Pending,
            },
        );
        Ok(())
    }

    /// Record a dispatch outcome.
    pub fn record(
        &mut self,
        key: &IdempotencyKey,
        outcome: DeliveryOutcome,
    ) -> Result<(), LedgerError> {
        self.set_status(key, EntryStatus::Delivered(outcome))
    }

    /// Mark a posting as dead-lettered.
    pub fn dead_letter(&mut self, key: &IdempotencyKey) -> Result<(), LedgerError> {
        self.set_status(key, EntryStatus::DeadLettered)
    }

    fn set_status(&mut self, key: &IdempotencyKey, status: EntryStatus) -> Result<(), LedgerError> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| LedgerError::UnknownKey(key.clone()))?;
        entry.status = status;
        Ok(())
    }

    /// Number of postings without an outcome.
    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.status == EntryStatus::Pending)
            .count()
    }

    /// Outcome counts so far.
    pub fn summary(&self) -> OutcomeSummary {
        let mut summary = OutcomeSummary::default();
        for kind in self.entries.values().filter_map(|e| e.status.kind()) {
            summary.add(kind);
        }
        summary
    }

    /// Source ids of records that ended the cycle retryable, in batch order.
    pub fn retryable(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key))
            .filter(|entry| {
                matches!(
                    entry.status,
                    EntryStatus::Delivered(DeliveryOutcome::RejectedRetryable { .. })
                )
            })
            .map(|entry| entry.source_id.as_str())
            .collect()
    }

    /// Stream position of the first record that blocks the watermark.
    pub fn first_blocking(&self) -> Option<Watermark> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key))
            .filter(|e| match &e.status {
                EntryStatus::Pending => true,
                EntryStatus::Delivered(outcome) => !outcome.is_terminal(),
                EntryStatus::DeadLettered => false,
            })
            .map(|e| e.watermark)
            .min()
    }

    /// Decide where the watermark goes.
    ///
    /// The batch is all-or-nothing: a single retryable record holds the
    /// watermark at `since`, even if later records were accepted.
    pub fn decision(&self) -> Result<BatchDecision, LedgerError> {
        let pending = self.pending_count();
        if pending > 0 {
            return Err(LedgerError::Incomplete { pending });
        }
        if self.summary().all_terminal() {
            Ok(BatchDecision::Commit(self.next))
        } else {
            Ok(BatchDecision::Hold(self.since))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> IdempotencyKey {
        IdempotencyKey::derive(id)
    }

    fn ledger_with(ids: &[(&str, u64)]) -> OutcomeLedger {
        let mut ledger = OutcomeLedger::new(Watermark::new(100), Watermark::new(103));
        for (id, seq) in ids {
            ledger.register(key(id), *id, Watermark::new(*seq)).unwrap();
        }
        ledger
    }

    #[test]
    fn empty_ledger_commits() {
        let ledger = OutcomeLedger::new(Watermark::zero(), Watermark::zero());
        assert_eq!(ledger.pending_count(), 0);
        assert_eq!(ledger.summary(), OutcomeSummary::default());
        assert_eq!(
            ledger.decision().unwrap(),
            BatchDecision::Commit(Watermark::zero())
        );
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut ledger = ledger_with(&[("a", 101)]);
        let err = ledger
            .register(key("a"), "a", Watermark::new(102))
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::DuplicateKey {
                source_id: "a".into()
            }
        );
    }

    #[test]
    fn unknown_key_rejected() {
        let mut ledger = ledger_with(&[("a", 101)]);
        let err = ledger
            .record(&key("zzz"), DeliveryOutcome::Accepted)
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownKey(_)));
    }

    #[test]
    fn decision_requires_complete_batch() {
        let mut ledger = ledger_with(&[("a", 101), ("b", 102)]);
        ledger.record(&key("a"), DeliveryOutcome::Accepted).unwrap();

        assert_eq!(
            ledger.decision().unwrap_err(),
            LedgerError::Incomplete { pending: 1 }
        );
    }

    #[test]
    fn all_terminal_commits_next_watermark() {
        let mut ledger = ledger_with(&[("a", 101), ("b", 102), ("c", 103)]);
        ledger.record(&key("a"), DeliveryOutcome::Accepted).unwrap();
        ledger
            .record(&key("b"), DeliveryOutcome::permanent("400"))
            .unwrap();
        ledger.dead_letter(&key("c")).unwrap();

        assert_eq!(
            ledger.decision().unwrap(),
            BatchDecision::Commit(Watermark::new(103))
        );
        let summary = ledger.summary();
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected_permanent, 1);
        assert_eq!(summary.dead_lettered, 1);
        assert!(ledger.retryable().is_empty());
    }

    #[test]
    fn retryable_holds_watermark() {
        let mut ledger = ledger_with(&[("a", 101), ("b", 102), ("c", 103)]);
        ledger.record(&key("a"), DeliveryOutcome::Accepted).unwrap();
        ledger
            .record(&key("b"), DeliveryOutcome::retryable("503"))
            .unwrap();
        ledger.record(&key("c"), DeliveryOutcome::Accepted).unwrap();

        assert_eq!(
            ledger.decision().unwrap(),
            BatchDecision::Hold(Watermark::new(100))
        );
        assert_eq!(ledger.first_blocking(), Some(Watermark::new(102)));
        assert_eq!(ledger.retryable(), vec!["b"]);
    }

    #[test]
    fn later_outcome_replaces_earlier() {
        let mut ledger = ledger_with(&[("a", 101)]);
        assert_eq!(ledger.pending_count(), 1);

        ledger
            .record(&key("a"), DeliveryOutcome::retryable("503"))
            .unwrap();
        ledger.record(&key("a"), DeliveryOutcome::Accepted).unwrap();
        assert_eq!(ledger.pending_count(), 0);
        assert_eq!(ledger.summary().accepted, 1);
        assert_eq!(ledger.first_blocking(), None);
    }

    #[test]
    fn summary_display() {
        let summary = OutcomeSummary {
            accepted: 2,
            rejected_retryable: 1,
            ..Default::default()
        };
        assert_eq!(
            summary.to_string(),
            "accepted=2 rejected_permanent=0 rejected_retryable=1 dead_lettered=0"
        );
        assert!(!summary.all_terminal());
    }
}
