//! WiseTime side of the connector.
//!
//! # Design
//!
//! The source is read-only for posted time and paginated by watermark:
//! - `fetch_posted_time()` returns postings strictly after a watermark
//! - `upsert_tags()` creates or updates WiseTime tags for Allisa cases
//!
//! Validation of the returned page (ordering, watermark bounds) is the
//! poller's job, not the client's.

mod mock;
mod wisetime;

pub use mock::MockSource;
pub use wisetime::{WiseTimeClient, WiseTimeClientConfig};

use crate::ClientError;
use async_trait::async_trait;
use connector_types::{TimePosting, Watermark};
use serde::{Deserialize, Serialize};

/// One page of posted time as returned by WiseTime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedTimePage {
    /// Postings after the requested watermark.
    #[serde(default)]
    pub postings: Vec<TimePosting>,
    /// Server-declared position to resume from, if any.
    #[serde(default)]
    pub next_watermark: Option<Watermark>,
}

/// A WiseTime tag to create or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertTagRequest {
    /// Tag name (the Allisa case reference).
    pub name: String,
    /// Tag description.
    #[serde(default)]
    pub description: String,
    /// Tag path.
    pub path: String,
    /// Link back to the Allisa case.
    pub url: String,
}

/// Source API used by the poller and the tag sync job.
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// Fetch up to `limit` postings strictly after `after`.
    async fn fetch_posted_time(
        &self,
        after: Watermark,
        limit: usize,
    ) -> Result<PostedTimePage, ClientError>;

    /// Create or update a batch of tags.
    async fn upsert_tags(&self, tags: &[UpsertTagRequest]) -> Result<(), ClientError>;
}
