//! Delivers mapped records to Allisa.
//!
//! A record is posted once per Allisa case, with the idempotency key scoped
//! by case id. Cases already in the delivery ledger are skipped, so sending
//! a record again after a partial failure only posts what is missing.

use crate::error::StoreError;
use crate::store::StateStore;
use connector_client::{ClientError, TargetApi, TimePost};
use connector_core::{FieldMapping, RetryPolicy};
use connector_types::{DeliveryOutcome, IdempotencyKey, InstanceId, MappedRecord};
use futures_util::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for a server supplied `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Sends mapped records with bounded retries and bounded concurrency.
#[derive(Clone)]
pub struct Dispatcher {
    target: Arc<dyn TargetApi>,
    store: Arc<dyn StateStore>,
    instance: InstanceId,
    field_mapping: FieldMapping,
    retry: RetryPolicy,
    concurrency: usize,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        target: Arc<dyn TargetApi>,
        store: Arc<dyn StateStore>,
        instance: InstanceId,
        field_mapping: FieldMapping,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            target,
            store,
            instance,
            field_mapping,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    /// Deliver one record. Safe to call repeatedly for the same record.
    ///
    /// Only state store failures are returned as errors; everything the
    /// target does is expressed as a [`DeliveryOutcome`].
    pub async fn send(&self, record: &MappedRecord) -> Result<DeliveryOutcome, StoreError> {
        if record.is_noop() {
            tracing::debug!(source_id = %record.source_id, "nothing to post");
            return Ok(DeliveryOutcome::Accepted);
        }

        for reference in &record.case_references {
            let case = match self
                .with_retry("find case", || self.target.find_case(reference))
                .await
            {
                Ok(Some(case)) => case,
                Ok(None) => {
                    return Ok(DeliveryOutcome::permanent(format!(
                        "can't find Allisa case for tag {reference}"
                    )))
                }
                Err(e) => return Ok(outcome_for(e)),
            };

            let delivery_key = record.idempotency_key.scoped(case.case_id);
            if self.store.is_delivered(&self.instance, &delivery_key).await? {
                tracing::debug!(
                    source_id = %record.source_id,
                    case_id = case.case_id,
                    "already delivered, skipping"
                );
                continue;
            }

            let post = TimePost {
                idempotency_key: delivery_key,
                fields: self.field_mapping.form_fields(record, case.case_id),
            };
            match self
                .with_retry("post time", || self.target.post_time(&post))
                .await
            {
                Ok(()) => {
                    self.store
                        .record_delivery(&self.instance, &post.idempotency_key, record.watermark)
                        .await?;
                    tracing::info!(
                        source_id = %record.source_id,
                        case_id = case.case_id,
                        case_reference = %case.case_reference,
                        "posted time"
                    );
                }
                Err(e) => return Ok(outcome_for(e)),
            }
        }

        Ok(DeliveryOutcome::Accepted)
    }

    /// Deliver records concurrently, at most `concurrency` at a time.
    ///
    /// Outcomes come back in completion order, keyed by idempotency key.
    pub async fn dispatch_all(
        &self,
        records: Vec<MappedRecord>,
    ) -> Result<Vec<(IdempotencyKey, DeliveryOutcome)>, StoreError> {
        let results: Vec<Result<(IdempotencyKey, DeliveryOutcome), StoreError>> =
            stream::iter(records)
                .map(|record| async move {
                    let outcome = self.send(&record).await?;
                    if let Some(reason) = outcome.reason() {
                        tracing::warn!(
                            source_id = %record.source_id,
                            outcome = %outcome.kind(),
                            reason,
                            "record not delivered"
                        );
                    }
                    Ok((record.idempotency_key, outcome))
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        results.into_iter().collect()
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = e
                        .retry_after()
                        .map(|d| d.min(MAX_RETRY_AFTER))
                        .unwrap_or_else(|| self.retry.delay_for(attempt));
                    tracing::warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "{what} failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn outcome_for(err: ClientError) -> DeliveryOutcome {
    if err.is_auth() {
        // Rejected credentials say nothing about the record; hold it until
        // the API key is fixed.
        tracing::error!(error = %err, "Allisa rejected the API key");
        DeliveryOutcome::retryable(err.to_string())
    } else if err.is_retryable() {
        DeliveryOutcome::retryable(err.to_string())
    } else {
        DeliveryOutcome::permanent(err.to_string())
    }
}
