//! Batch state machine for one sync cycle.
//!
//! This module provides a pure, side-effect-free state machine for the
//! lifecycle of a fetched batch:
//!
//! ```text
//! Idle -> Fetched -> Mapped -> Dispatching -> Committed
//!                                          \-> PartiallyFailed
//! ```
//!
//! Any non-terminal state moves to `Aborted` when the cycle is cut short.
//! The engine in `connector-service` feeds events in and performs the
//! returned actions. Only `Committed` ever moves the watermark.

use crate::ledger::{BatchDecision, OutcomeSummary};
use connector_types::Watermark;

/// Batch state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchState {
    /// No batch in progress.
    Idle,
    /// A batch was fetched from WiseTime.
    Fetched {
        /// Watermark the batch was fetched after.
        since: Watermark,
        /// Watermark to commit once the batch is terminal.
        next: Watermark,
        /// Number of postings in the batch.
        postings: usize,
    },
    /// Postings were mapped; invalid ones were dead-lettered.
    Mapped {
        /// Watermark the batch was fetched after.
        since: Watermark,
        /// Watermark to commit once the batch is terminal.
        next: Watermark,
        /// Records to dispatch.
        records: usize,
    },
    /// Records are being delivered to Allisa.
    Dispatching {
        /// Watermark the batch was fetched after.
        since: Watermark,
        /// Watermark to commit once the batch is terminal.
        next: Watermark,
        /// Records being delivered.
        records: usize,
    },
    /// Every record was terminal and the watermark advanced.
    Committed {
        /// The committed watermark.
        watermark: Watermark,
    },
    /// Some records stayed retryable; the watermark was kept.
    PartiallyFailed {
        /// The unchanged watermark.
        watermark: Watermark,
        /// Outcome counts of the batch.
        summary: OutcomeSummary,
    },
    /// The cycle was cut short (deadline or shutdown).
    Aborted {
        /// The unchanged watermark.
        watermark: Watermark,
    },
}

impl BatchState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller is responsible
    /// for executing the returned actions.
    pub fn on_event(self, event: BatchEvent) -> (Self, Vec<BatchAction>) {
        match (self, event) {
            // From Idle
            (
                Self::Idle,
                BatchEvent::Fetched {
                    since,
                    next,
                    postings: 0,
                },
            ) => {
                // Nothing to deliver; the source may still have skipped ahead.
                let watermark = next.max(since);
                let mut actions = Vec::new();
                if watermark > since {
                    actions.push(BatchAction::CommitWatermark { watermark });
                }
                actions.push(BatchAction::EmitEvent(CycleEvent::BatchEmpty { watermark }));
                (Self::Committed { watermark }, actions)
            }
            (
                Self::Idle,
                BatchEvent::Fetched {
                    since,
                    next,
                    postings,
                },
            ) => (
                Self::Fetched {
                    since,
                    next,
                    postings,
                },
                vec![BatchAction::MapPostings],
            ),

            // From Fetched
            (
                Self::Fetched { since, next, .. },
                BatchEvent::Mapped {
                    records,
                    dead_lettered,
                },
            ) => {
                let mut actions = Vec::new();
                if dead_lettered > 0 {
                    actions.push(BatchAction::RecordDeadLetters {
                        count: dead_lettered,
                    });
                }
                actions.push(BatchAction::DispatchRecords { count: records });
                (
                    Self::Mapped {
                        since,
                        next,
                        records,
                    },
                    actions,
                )
            }

            // From Mapped
            (
                Self::Mapped {
                    since,
                    next,
                    records,
                },
                BatchEvent::DispatchStarted,
            ) => (
                Self::Dispatching {
                    since,
                    next,
                    records,
                },
                vec![],
            ),

            // From Dispatching
            (
                Self::Dispatching { since, .. },
                BatchEvent::DispatchCompleted { decision, summary },
            ) => match decision {
                BatchDecision::Commit(watermark) => (
                    Self::Committed { watermark },
                    vec![
                        BatchAction::CommitWatermark { watermark },
                        BatchAction::EmitEvent(CycleEvent::Committed {
                            from: since,
                            to: watermark,
                            summary,
                        }),
                    ],
                ),
                BatchDecision::Hold(watermark) => (
                    Self::PartiallyFailed { watermark, summary },
                    vec![
                        BatchAction::KeepWatermark { watermark },
                        BatchAction::EmitEvent(CycleEvent::PartiallyFailed { watermark, summary }),
                    ],
                ),
            },

            // Abort from any in-flight state
            (
                Self::Fetched { since, .. }
                | Self::Mapped { since, .. }
                | Self::Dispatching { since, .. },
                BatchEvent::Aborted { reason },
            ) => (
                Self::Aborted { watermark: since },
                vec![
                    BatchAction::KeepWatermark { watermark: since },
                    BatchAction::EmitEvent(CycleEvent::Aborted {
                        watermark: since,
                        reason,
                    }),
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the batch reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Committed { .. } | Self::PartiallyFailed { .. } | Self::Aborted { .. }
        )
    }

    /// Short state name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetched { .. } => "fetched",
            Self::Mapped { .. } => "mapped",
            Self::Dispatching { .. } => "dispatching",
            Self::Committed { .. } => "committed",
            Self::PartiallyFailed { .. } => "partially_failed",
            Self::Aborted { .. } => "aborted",
        }
    }
}

impl Default for BatchState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur while processing a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    /// The poller returned a batch.
    Fetched {
        /// Watermark the batch was fetched after.
        since: Watermark,
        /// Watermark reported by the source.
        next: Watermark,
        /// Number of postings.
        postings: usize,
    },
    /// Mapping finished.
    Mapped {
        /// Records ready to dispatch.
        records: usize,
        /// Postings that failed validation.
        dead_lettered: usize,
    },
    /// Dispatch began.
    DispatchStarted,
    /// Every record has an outcome.
    DispatchCompleted {
        /// Where the ledger says the watermark goes.
        decision: BatchDecision,
        /// Outcome counts (dead letters included).
        summary: OutcomeSummary,
    },
    /// The cycle was cut short.
    Aborted {
        /// Why the cycle stopped.
        reason: String,
    },
}

/// Actions to be executed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchAction {
    /// Map the fetched postings.
    MapPostings,
    /// Persist dead letters for postings that failed mapping.
    RecordDeadLetters {
        /// Number of dead letters.
        count: usize,
    },
    /// Deliver mapped records.
    DispatchRecords {
        /// Number of records.
        count: usize,
    },
    /// Persist the new watermark.
    CommitWatermark {
        /// The watermark to persist.
        watermark: Watermark,
    },
    /// Leave the persisted watermark untouched.
    KeepWatermark {
        /// The current watermark.
        watermark: Watermark,
    },
    /// Emit an event to the logs.
    EmitEvent(CycleEvent),
}

/// Events emitted when a batch finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleEvent {
    /// Nothing was fetched.
    BatchEmpty {
        /// Watermark after the cycle.
        watermark: Watermark,
    },
    /// The batch was committed.
    Committed {
        /// Watermark before the batch.
        from: Watermark,
        /// Watermark after the batch.
        to: Watermark,
        /// Outcome counts.
        summary: OutcomeSummary,
    },
    /// The batch held the watermark.
    PartiallyFailed {
        /// The unchanged watermark.
        watermark: Watermark,
        /// Outcome counts.
        summary: OutcomeSummary,
    },
    /// The cycle was cut short.
    Aborted {
        /// The unchanged watermark.
        watermark: Watermark,
        /// Why the cycle stopped.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(since: u64, next: u64, postings: usize) -> BatchEvent {
        BatchEvent::Fetched {
            since: Watermark::new(since),
            next: Watermark::new(next),
            postings,
        }
    }

    fn dispatching(since: u64, next: u64) -> BatchState {
        BatchState::Dispatching {
            since: Watermark::new(since),
            next: Watermark::new(next),
            records: 3,
        }
    }

    #[test]
    fn starts_idle() {
        assert!(matches!(BatchState::new(), BatchState::Idle));
    }

    #[test]
    fn empty_batch_commits_without_write() {
        let (state, actions) = BatchState::Idle.on_event(fetched(100, 100, 0));

        assert_eq!(
            state,
            BatchState::Committed {
                watermark: Watermark::new(100)
            }
        );
        assert!(!actions
            .iter()
            .any(|a| matches!(a, BatchAction::CommitWatermark { .. })));
    }

    #[test]
    fn empty_batch_with_skipped_positions_commits() {
        let (state, actions) = BatchState::Idle.on_event(fetched(100, 105, 0));

        assert_eq!(
            state,
            BatchState::Committed {
                watermark: Watermark::new(105)
            }
        );
        assert!(actions.contains(&BatchAction::CommitWatermark {
            watermark: Watermark::new(105)
        }));
    }

    #[test]
    fn fetched_batch_requests_mapping() {
        let (state, actions) = BatchState::Idle.on_event(fetched(100, 103, 3));

        assert!(matches!(state, BatchState::Fetched { postings: 3, .. }));
        assert_eq!(actions, vec![BatchAction::MapPostings]);
    }

    #[test]
    fn mapping_with_dead_letters() {
        let (state, _) = BatchState::Idle.on_event(fetched(100, 103, 3));
        let (state, actions) = state.on_event(BatchEvent::Mapped {
            records: 2,
            dead_lettered: 1,
        });

        assert!(matches!(state, BatchState::Mapped { records: 2, .. }));
        assert_eq!(
            actions,
            vec![
                BatchAction::RecordDeadLetters { count: 1 },
                BatchAction::DispatchRecords { count: 2 },
            ]
        );
    }

    #[test]
    fn all_terminal_commits() {
        let summary = OutcomeSummary {
            accepted: 2,
            rejected_permanent: 1,
            ..Default::default()
        };
        let (state, actions) = dispatching(100, 103).on_event(BatchEvent::DispatchCompleted {
            decision: BatchDecision::Commit(Watermark::new(103)),
            summary,
        });

        assert_eq!(
            state,
            BatchState::Committed {
                watermark: Watermark::new(103)
            }
        );
        assert!(actions.contains(&BatchAction::CommitWatermark {
            watermark: Watermark::new(103)
        }));
    }

    #[test]
    fn retryable_keeps_watermark() {
        let summary = OutcomeSummary {
            accepted: 2,
            rejected_retryable: 1,
            ..Default::default()
        };
        let (state, actions) = dispatching(100, 103).on_event(BatchEvent::DispatchCompleted {
            decision: BatchDecision::Hold(Watermark::new(100)),
            summary,
        });

        assert_eq!(
            state,
            BatchState::PartiallyFailed {
                watermark: Watermark::new(100),
                summary
            }
        );
        assert!(!actions
            .iter()
            .any(|a| matches!(a, BatchAction::CommitWatermark { .. })));
    }

    #[test]
    fn abort_keeps_watermark() {
        let (state, actions) = dispatching(100, 103).on_event(BatchEvent::Aborted {
            reason: "cycle deadline exceeded".into(),
        });

        assert_eq!(
            state,
            BatchState::Aborted {
                watermark: Watermark::new(100)
            }
        );
        assert!(actions.contains(&BatchAction::KeepWatermark {
            watermark: Watermark::new(100)
        }));
    }

    #[test]
    fn invalid_transition_is_ignored() {
        let (state, actions) = BatchState::Idle.on_event(BatchEvent::DispatchStarted);
        assert_eq!(state, BatchState::Idle);
        assert!(actions.is_empty());

        let committed = BatchState::Committed {
            watermark: Watermark::new(1),
        };
        let (state, _) = committed.clone().on_event(BatchEvent::Aborted {
            reason: "late".into(),
        });
        assert_eq!(state, committed);
    }

    #[test]
    fn full_lifecycle() {
        let (state, _) = BatchState::Idle.on_event(fetched(0, 2, 2));
        let (state, _) = state.on_event(BatchEvent::Mapped {
            records: 2,
            dead_lettered: 0,
        });
        let (state, _) = state.on_event(BatchEvent::DispatchStarted);
        assert_eq!(state.name(), "dispatching");
        assert!(!state.is_terminal());

        let (state, _) = state.on_event(BatchEvent::DispatchCompleted {
            decision: BatchDecision::Commit(Watermark::new(2)),
            summary: OutcomeSummary {
                accepted: 2,
                ..Default::default()
            },
        });
        assert!(state.is_terminal());
        assert_eq!(
            state,
            BatchState::Committed {
                watermark: Watermark::new(2)
            }
        );
    }
}
