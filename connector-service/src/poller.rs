//! Fetches posted time from WiseTime and checks the page can be trusted.

use connector_client::{ClientError, PostedTimePage, SourceApi};
use connector_types::{SourceBatch, SyncError, Watermark};
use std::sync::Arc;

/// Pulls batches of postings strictly after a watermark.
#[derive(Clone)]
pub struct Poller {
    source: Arc<dyn SourceApi>,
    batch_size: usize,
}

impl Poller {
    /// Create a poller requesting at most `batch_size` postings per batch.
    pub fn new(source: Arc<dyn SourceApi>, batch_size: usize) -> Self {
        Self { source, batch_size }
    }

    /// Fetch the next batch after `since`.
    ///
    /// Transport failures map to [`SyncError::SourceUnavailable`]; pages that
    /// break the ordering contract map to [`SyncError::SourceData`].
    pub async fn fetch_batch(&self, since: Watermark) -> Result<SourceBatch, SyncError> {
        let page = self
            .source
            .fetch_posted_time(since, self.batch_size)
            .await
            .map_err(classify)?;

        let batch = validate_page(since, page)?;
        tracing::debug!(
            since = %since,
            next = %batch.next_watermark,
            postings = batch.len(),
            "fetched batch"
        );
        Ok(batch)
    }
}

fn classify(err: ClientError) -> SyncError {
    match err {
        ClientError::Decode(reason) => {
            SyncError::SourceData(format!("undecodable posted time page: {reason}"))
        }
        other => SyncError::SourceUnavailable(other.to_string()),
    }
}

fn validate_page(since: Watermark, page: PostedTimePage) -> Result<SourceBatch, SyncError> {
    let mut previous = since;
    for posting in &page.postings {
        let position = posting.watermark();
        if position <= since {
            return Err(SyncError::SourceData(format!(
                "posting {} at {} is not after watermark {}",
                posting.id, position, since
            )));
        }
        if position <= previous {
            return Err(SyncError::SourceData(format!(
                "posting {} at {} is out of order (previous {})",
                posting.id, position, previous
            )));
        }
        previous = position;
    }

    let next_watermark = match page.next_watermark {
        Some(declared) if declared < previous => {
            return Err(SyncError::SourceData(format!(
                "declared next watermark {declared} is below last posting {previous}"
            )));
        }
        Some(declared) => declared,
        None => previous,
    };

    Ok(SourceBatch {
        postings: page.postings,
        next_watermark,
    })
}
