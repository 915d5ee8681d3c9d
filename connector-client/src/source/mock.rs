//! Mock source for testing.
//!
//! Serves a fixed stream of postings by watermark, and captures upserted tags.

use super::{PostedTimePage, SourceApi, UpsertTagRequest};
use crate::ClientError;
use async_trait::async_trait;
use connector_types::{TimePosting, Watermark};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Mock source for testing.
///
/// By default pages are cut from `stream` (postings with a sequence greater
/// than the requested watermark). Queued pages take precedence and are
/// returned verbatim, which allows serving malformed pages.
#[derive(Debug, Default)]
pub struct MockSource {
    inner: Arc<Mutex<MockSourceInner>>,
}

#[derive(Debug, Default)]
struct MockSourceInner {
    stream: Vec<TimePosting>,
    queued_pages: VecDeque<PostedTimePage>,
    requests: Vec<(Watermark, usize)>,
    upserted: Vec<UpsertTagRequest>,
    fail_next_fetch: Option<ClientError>,
    fail_next_upsert: Option<ClientError>,
}

impl MockSource {
    /// Create an empty mock source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock serving the given postings.
    pub fn with_postings(postings: Vec<TimePosting>) -> Self {
        let source = Self::new();
        source.push_postings(postings);
        source
    }

    /// Append postings to the stream.
    pub fn push_postings(&self, postings: Vec<TimePosting>) {
        let mut inner = self.inner.lock().unwrap();
        inner.stream.extend(postings);
        inner.stream.sort_by_key(|p| p.sequence);
    }

    /// Queue a page to be returned verbatim by the next fetch.
    pub fn queue_page(&self, page: PostedTimePage) {
        let mut inner = self.inner.lock().unwrap();
        inner.queued_pages.push_back(page);
    }

    /// Cause the next fetch to fail with the given error.
    pub fn fail_next_fetch(&self, error: ClientError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_fetch = Some(error);
    }

    /// Cause the next tag upsert to fail with the given error.
    pub fn fail_next_upsert(&self, error: ClientError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_upsert = Some(error);
    }

    /// All fetch requests as `(after, limit)`.
    pub fn requests(&self) -> Vec<(Watermark, usize)> {
        let inner = self.inner.lock().unwrap();
        inner.requests.clone()
    }

    /// All tags upserted so far.
    pub fn upserted_tags(&self) -> Vec<UpsertTagRequest> {
        let inner = self.inner.lock().unwrap();
        inner.upserted.clone()
    }
}

impl Clone for MockSource {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl SourceApi for MockSource {
    async fn fetch_posted_time(
        &self,
        after: Watermark,
        limit: usize,
    ) -> Result<PostedTimePage, ClientError> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push((after, limit));

        if let Some(error) = inner.fail_next_fetch.take() {
            return Err(error);
        }
        if let Some(page) = inner.queued_pages.pop_front() {
            return Ok(page);
        }

        let postings: Vec<TimePosting> = inner
            .stream
            .iter()
            .filter(|p| p.sequence > after.value())
            .take(limit)
            .cloned()
            .collect();
        let next_watermark = postings.last().map(TimePosting::watermark);
        Ok(PostedTimePage {
            postings,
            next_watermark,
        })
    }

    async fn upsert_tags(&self, tags: &[UpsertTagRequest]) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_upsert.take() {
            return Err(error);
        }
        inner.upserted.extend_from_slice(tags);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connector_types::Actor;

    fn posting(sequence: u64) -> TimePosting {
        TimePosting {
            id: format!("g-{sequence}"),
            sequence,
            narrative: String::new(),
            total_duration_secs: 0,
            user: Actor {
                name: "Pat".into(),
                external_id: None,
                experience_weighting_percent: 100,
            },
            tags: vec![],
            time_rows: vec![],
            duration_split_strategy: Default::default(),
        }
    }

    #[tokio::test]
    async fn serves_postings_after_watermark() {
        let source = MockSource::with_postings((1..=5).map(posting).collect());

        let page = source
            .fetch_posted_time(Watermark::new(2), 2)
            .await
            .unwrap();

        let ids: Vec<&str> = page.postings.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["g-3", "g-4"]);
        assert_eq!(page.next_watermark, Some(Watermark::new(4)));
        assert_eq!(source.requests(), vec![(Watermark::new(2), 2)]);
    }

    #[tokio::test]
    async fn queued_page_takes_precedence() {
        let source = MockSource::with_postings(vec![posting(1)]);
        source.queue_page(PostedTimePage {
            postings: vec![posting(9), posting(8)],
            next_watermark: None,
        });

        let page = source.fetch_posted_time(Watermark::zero(), 10).await.unwrap();
        assert_eq!(page.postings[0].sequence, 9);

        let page = source.fetch_posted_time(Watermark::zero(), 10).await.unwrap();
        assert_eq!(page.postings[0].sequence, 1);
    }

    #[tokio::test]
    async fn forced_failure_is_one_shot() {
        let source = MockSource::new();
        source.fail_next_fetch(ClientError::Timeout);

        assert!(source.fetch_posted_time(Watermark::zero(), 1).await.is_err());
        assert!(source.fetch_posted_time(Watermark::zero(), 1).await.is_ok());
    }

    #[tokio::test]
    async fn captures_upserted_tags() {
        let source = MockSource::new();
        let tag = UpsertTagRequest {
            name: "CASE-1".into(),
            description: String::new(),
            path: "/Allisa/".into(),
            url: "u".into(),
        };
        source.upsert_tags(&[tag.clone()]).await.unwrap();
        assert_eq!(source.upserted_tags(), vec![tag]);
    }
}
