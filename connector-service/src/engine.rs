//! One sync cycle: poll, map, dispatch, commit.
//!
//! The engine feeds events into the pure [`BatchState`] machine and performs
//! the actions it returns. The watermark is written in exactly one place,
//! the `CommitWatermark` action, which the machine only emits once every
//! record of the batch is terminal.

use crate::config::{Config, ConfigError};
use crate::dispatcher::Dispatcher;
use crate::metrics::ConnectorMetrics;
use crate::poller::Poller;
use crate::store::{DeadLetter, StateStore};
use chrono::Utc;
use connector_client::{SourceApi, TargetApi};
use connector_core::{
    BatchAction, BatchDecision, BatchEvent, BatchState, CycleEvent, FieldMapping, LedgerError,
    Mapper, OutcomeLedger, OutcomeSummary, RetryPolicy, SyncState,
};
use connector_types::{
    CycleId, DeliveryOutcome, IdempotencyKey, InstanceId, MappedRecord, OutcomeKind, SyncError,
    TimePosting, Watermark,
};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::Instrument;

/// Tunables of a cycle.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Postings per batch.
    pub batch_size: usize,
    /// Records delivered concurrently.
    pub dispatch_concurrency: usize,
    /// Per-record retry policy within a cycle.
    pub retry: RetryPolicy,
    /// Cycles a record may end retryable before it is given up on.
    pub escalate_after_cycles: u32,
    /// Upper bound of a cycle.
    pub cycle_deadline: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            dispatch_concurrency: 4,
            retry: RetryPolicy::default(),
            escalate_after_cycles: 5,
            cycle_deadline: Duration::from_secs(300),
        }
    }
}

/// What happened in a cycle that ran to completion.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Correlation id of the cycle.
    pub cycle_id: CycleId,
    /// Watermark the cycle started from.
    pub since: Watermark,
    /// Watermark after the cycle.
    pub watermark: Watermark,
    /// Postings fetched.
    pub postings: usize,
    /// Outcomes of the batch.
    pub summary: OutcomeSummary,
    /// Final state of the batch machine.
    pub state: BatchState,
    /// Events emitted by the batch machine.
    pub events: Vec<CycleEvent>,
}

impl CycleReport {
    /// Whether the watermark moved.
    pub fn advanced(&self) -> bool {
        self.watermark > self.since
    }
}

/// Working set of one cycle.
struct Cycle {
    postings: Vec<TimePosting>,
    ledger: OutcomeLedger,
    records: Vec<MappedRecord>,
    dead_letters: Vec<DeadLetter>,
    committed: Option<Watermark>,
    abort: Option<SyncError>,
}

/// Runs sync cycles for one connector instance.
pub struct Engine {
    instance: InstanceId,
    poller: Poller,
    mapper: Mapper,
    dispatcher: Dispatcher,
    store: Arc<dyn StateStore>,
    metrics: Arc<ConnectorMetrics>,
    settings: EngineSettings,
}

impl Engine {
    /// Create an engine from its parts.
    pub fn new(
        instance: InstanceId,
        source: Arc<dyn SourceApi>,
        target: Arc<dyn TargetApi>,
        store: Arc<dyn StateStore>,
        mapper: Mapper,
        field_mapping: FieldMapping,
        settings: EngineSettings,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            target,
            store.clone(),
            instance.clone(),
            field_mapping,
            settings.retry,
            settings.dispatch_concurrency,
        );
        Self {
            poller: Poller::new(source, settings.batch_size),
            instance,
            mapper,
            dispatcher,
            store,
            metrics: Arc::new(ConnectorMetrics::default()),
            settings,
        }
    }

    /// Create an engine from validated configuration.
    pub fn from_config(
        config: &Config,
        source: Arc<dyn SourceApi>,
        target: Arc<dyn TargetApi>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, ConfigError> {
        let settings = EngineSettings {
            batch_size: config.sync.batch_size,
            dispatch_concurrency: config.sync.dispatch_concurrency,
            retry: config.retry_policy(),
            escalate_after_cycles: config.sync.escalate_after_cycles,
            cycle_deadline: config.cycle_deadline(),
        };
        Ok(Self::new(
            config.instance_id()?,
            source,
            target,
            store,
            Mapper::new(config.mapper_config()?),
            config.field_mapping()?,
            settings,
        ))
    }

    /// Share a metrics registry with the HTTP endpoints.
    pub fn with_metrics(mut self, metrics: Arc<ConnectorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The metrics this engine writes.
    pub fn metrics(&self) -> &Arc<ConnectorMetrics> {
        &self.metrics
    }

    /// The instance this engine syncs.
    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// State to resume from: the persisted watermark, or zero.
    pub async fn load_state(&self) -> Result<SyncState, SyncError> {
        let watermark = self
            .store
            .load_watermark(&self.instance)
            .await?
            .unwrap_or_default();
        self.metrics
            .watermark
            .store(watermark.value(), Ordering::Relaxed);
        Ok(SyncState::new(self.instance.clone(), watermark))
    }

    /// Run one cycle starting from `state`.
    ///
    /// Always returns the next state. On error the watermark is unchanged
    /// and the failure is counted.
    pub async fn run_cycle(&self, state: SyncState) -> (SyncState, Result<CycleReport, SyncError>) {
        let cycle_id = CycleId::new();
        let span = tracing::info_span!(
            "cycle",
            %cycle_id,
            instance = %self.instance,
            since = %state.watermark
        );

        match self.cycle(cycle_id, &state).instrument(span).await {
            Ok((next, report)) => {
                self.metrics.record_summary(&report.summary);
                self.metrics.record_cycle(next.watermark, false);
                (next, Ok(report))
            }
            Err(e) => {
                self.metrics.record_cycle(state.watermark, true);
                (state.failed(), Err(e))
            }
        }
    }

    async fn cycle(
        &self,
        cycle_id: CycleId,
        state: &SyncState,
    ) -> Result<(SyncState, CycleReport), SyncError> {
        let deadline = Instant::now() + self.settings.cycle_deadline;
        let since = state.watermark;

        let batch = timeout_at(deadline, self.poller.fetch_batch(since))
            .await
            .map_err(|_| {
                SyncError::SourceUnavailable("cycle deadline elapsed while polling".into())
            })??;
        self.metrics
            .postings_fetched_total
            .fetch_add(batch.len() as u64, Ordering::Relaxed);

        let mut machine = BatchState::new();
        let mut report = CycleReport {
            cycle_id,
            since,
            watermark: since,
            postings: batch.len(),
            summary: OutcomeSummary::default(),
            state: BatchState::new(),
            events: Vec::new(),
        };
        let mut cycle = Cycle {
            ledger: OutcomeLedger::new(since, batch.next_watermark),
            postings: batch.postings,
            records: Vec::new(),
            dead_letters: Vec::new(),
            committed: None,
            abort: None,
        };

        let mut actions: VecDeque<BatchAction> = step(
            &mut machine,
            BatchEvent::Fetched {
                since,
                next: batch.next_watermark,
                postings: report.postings,
            },
        )
        .into();

        while let Some(action) = actions.pop_front() {
            let event = match action {
                BatchAction::MapPostings => Some(self.map_postings(&mut cycle)),
                BatchAction::RecordDeadLetters { count } => {
                    self.record_dead_letters(&mut cycle, count).await?;
                    None
                }
                BatchAction::DispatchRecords { count } => {
                    actions.extend(step(&mut machine, BatchEvent::DispatchStarted));
                    tracing::debug!(records = count, "dispatching");
                    Some(self.dispatch(&mut cycle, deadline).await)
                }
                BatchAction::CommitWatermark { watermark } => {
                    self.commit(state, watermark).await?;
                    cycle.committed = Some(watermark);
                    None
                }
                BatchAction::KeepWatermark { watermark } => {
                    tracing::debug!(watermark = %watermark, "watermark kept");
                    None
                }
                BatchAction::EmitEvent(event) => {
                    log_event(&event);
                    report.events.push(event);
                    None
                }
            };
            if let Some(event) = event {
                actions.extend(step(&mut machine, event));
            }
        }

        if let Some(error) = cycle.abort {
            return Err(error);
        }

        if !machine.is_terminal() {
            return Err(SyncError::StateStore(format!(
                "cycle ended in unexpected state {}",
                machine.name()
            )));
        }
        report.summary = cycle.ledger.summary();
        let next = match cycle.committed {
            Some(watermark) => state
                .clone()
                .committed(watermark)
                .map_err(|e| SyncError::StateStore(e.to_string()))?,
            None => state.clone().held(),
        };
        report.watermark = next.watermark;
        report.state = machine;
        Ok((next, report))
    }

    /// Map every posting, registering each in the ledger.
    fn map_postings(&self, cycle: &mut Cycle) -> BatchEvent {
        let mapped = self.map_into(&cycle.postings, &mut cycle.ledger, &mut cycle.dead_letters);
        match mapped {
            Ok(records) => {
                let event = BatchEvent::Mapped {
                    records: records.len(),
                    dead_lettered: cycle.dead_letters.len(),
                };
                cycle.records = records;
                event
            }
            Err(e) => abort(cycle, e),
        }
    }

    fn map_into(
        &self,
        postings: &[TimePosting],
        ledger: &mut OutcomeLedger,
        dead_letters: &mut Vec<DeadLetter>,
    ) -> Result<Vec<MappedRecord>, SyncError> {
        let mut records = Vec::with_capacity(postings.len());
        for posting in postings {
            let key = ledger_key(posting);
            ledger
                .register(key.clone(), posting.id.clone(), posting.watermark())
                .map_err(ledger_error)?;

            for tag in self.mapper.foreign_tags(posting) {
                tracing::debug!(
                    source_id = %posting.id,
                    tag = %tag.name,
                    path = %tag.path,
                    "ignoring tag not created by the connector"
                );
            }

            match self.mapper.map(posting) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(source_id = %posting.id, error = %e, "dead-lettering posting");
                    ledger.dead_letter(&key).map_err(ledger_error)?;
                    dead_letters.push(DeadLetter {
                        idempotency_key: key,
                        source_id: posting.id.clone(),
                        watermark: posting.watermark(),
                        kind: OutcomeKind::DeadLettered,
                        reason: e.to_string(),
                        recorded_at: Utc::now(),
                    });
                }
            }
        }
        Ok(records)
    }

    async fn record_dead_letters(&self, cycle: &mut Cycle, count: usize) -> Result<(), SyncError> {
        for letter in cycle.dead_letters.drain(..) {
            self.store
                .record_dead_letter(&self.instance, &letter)
                .await?;
        }
        tracing::info!(count, "recorded dead letters");
        Ok(())
    }

    /// Deliver the mapped records and settle their outcomes in the ledger.
    async fn dispatch(&self, cycle: &mut Cycle, deadline: Instant) -> BatchEvent {
        let records = std::mem::take(&mut cycle.records);
        let outcomes = match timeout_at(deadline, self.dispatcher.dispatch_all(records)).await {
            Ok(Ok(outcomes)) => outcomes,
            Ok(Err(e)) => return abort(cycle, e.into()),
            Err(_) => {
                return abort(
                    cycle,
                    SyncError::TargetRetryable("cycle deadline elapsed during dispatch".into()),
                )
            }
        };

        for (key, outcome) in outcomes {
            let outcome = match self.settle(cycle, &key, outcome).await {
                Ok(outcome) => outcome,
                Err(e) => return abort(cycle, e),
            };
            if let Err(e) = cycle.ledger.record(&key, outcome) {
                return abort(cycle, ledger_error(e));
            }
        }

        match cycle.ledger.decision() {
            Ok(decision) => {
                if let BatchDecision::Hold(watermark) = decision {
                    tracing::warn!(
                        watermark = %watermark,
                        first_blocking = %cycle.ledger.first_blocking().unwrap_or(watermark),
                        source_ids = ?cycle.ledger.retryable(),
                        "records left retryable"
                    );
                }
                BatchEvent::DispatchCompleted {
                    decision,
                    summary: cycle.ledger.summary(),
                }
            }
            Err(e) => abort(cycle, ledger_error(e)),
        }
    }

    /// Escalate records stuck retryable for too many cycles and record
    /// permanent rejections as dead letters.
    async fn settle(
        &self,
        cycle: &Cycle,
        key: &IdempotencyKey,
        outcome: DeliveryOutcome,
    ) -> Result<DeliveryOutcome, SyncError> {
        let outcome = match outcome {
            DeliveryOutcome::RejectedRetryable { reason } => {
                let cycles = self.store.increment_exhausted(&self.instance, key).await?;
                if cycles < self.settings.escalate_after_cycles {
                    return Ok(DeliveryOutcome::RejectedRetryable { reason });
                }
                tracing::error!(
                    idempotency_key = %key,
                    cycles,
                    reason = %reason,
                    "giving up on record after repeated retryable failures"
                );
                DeliveryOutcome::permanent(format!(
                    "gave up after {cycles} cycles of retryable failures: {reason}"
                ))
            }
            other => other,
        };

        self.store.clear_exhausted(&self.instance, key).await?;
        if let DeliveryOutcome::RejectedPermanent { reason } = &outcome {
            let (source_id, watermark) = cycle
                .postings
                .iter()
                .find(|p| ledger_key(p) == *key)
                .map(|p| (p.id.clone(), p.watermark()))
                .unwrap_or_default();
            self.store
                .record_dead_letter(
                    &self.instance,
                    &DeadLetter {
                        idempotency_key: key.clone(),
                        source_id,
                        watermark,
                        kind: OutcomeKind::RejectedPermanent,
                        reason: reason.clone(),
                        recorded_at: Utc::now(),
                    },
                )
                .await?;
        }
        Ok(outcome)
    }

    async fn commit(&self, state: &SyncState, watermark: Watermark) -> Result<(), SyncError> {
        if watermark < state.watermark {
            return Err(SyncError::StateStore(format!(
                "refusing to move watermark back from {} to {}",
                state.watermark, watermark
            )));
        }
        self.store
            .save_watermark(&self.instance, watermark)
            .await?;
        let pruned = self
            .store
            .prune_deliveries(&self.instance, watermark)
            .await?;
        tracing::debug!(watermark = %watermark, pruned, "watermark committed");
        Ok(())
    }
}

/// Feed an event into the machine, returning the actions to perform.
fn step(machine: &mut BatchState, event: BatchEvent) -> Vec<BatchAction> {
    let (next, actions) = std::mem::take(machine).on_event(event);
    *machine = next;
    actions
}

fn abort(cycle: &mut Cycle, error: SyncError) -> BatchEvent {
    let reason = error.to_string();
    cycle.abort = Some(error);
    BatchEvent::Aborted { reason }
}

fn ledger_error(err: LedgerError) -> SyncError {
    SyncError::SourceData(err.to_string())
}

/// Ledger key of a posting. Postings without an id are keyed by position so
/// they can still be dead-lettered.
fn ledger_key(posting: &TimePosting) -> IdempotencyKey {
    if posting.id.trim().is_empty() {
        IdempotencyKey::derive(&format!("#{}", posting.sequence))
    } else {
        IdempotencyKey::derive(&posting.id)
    }
}

fn log_event(event: &CycleEvent) {
    match event {
        CycleEvent::BatchEmpty { watermark } => {
            tracing::debug!(watermark = %watermark, "no new posted time");
        }
        CycleEvent::Committed { from, to, summary } => {
            tracing::info!(from = %from, to = %to, %summary, "batch committed");
        }
        CycleEvent::PartiallyFailed { watermark, summary } => {
            tracing::warn!(
                watermark = %watermark,
                %summary,
                "batch has retryable failures, watermark kept"
            );
        }
        CycleEvent::Aborted { watermark, reason } => {
            tracing::warn!(watermark = %watermark, reason = %reason, "cycle aborted");
        }
    }
}
