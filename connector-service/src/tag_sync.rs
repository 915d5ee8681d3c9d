//! Keeps WiseTime tags in step with Allisa cases.
//!
//! Two loops share one job:
//! - `sync_new_cases` pages forward through cases with an id above the last
//!   synced one and upserts a tag for each.
//! - `refresh_cases` walks every case again, one page per run, so renamed
//!   cases reach WiseTime. Its cursor wraps to the start on an empty page.

use crate::config::TagSyncConfig;
use crate::error::Result;
use crate::metrics::ConnectorMetrics;
use crate::store::StateStore;
use connector_client::{AllisaCase, SourceApi, TargetApi, UpsertTagRequest};
use connector_types::InstanceId;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

const SYNC_LAST_CASE_ID: &str = "tag_sync.last_case_id";
const SYNC_PAGE: &str = "tag_sync.page";
const REFRESH_LAST_CASE_ID: &str = "tag_refresh.last_case_id";
const REFRESH_PAGE: &str = "tag_refresh.page";

/// Upserts WiseTime tags for Allisa cases.
pub struct TagSync {
    instance: InstanceId,
    source: Arc<dyn SourceApi>,
    target: Arc<dyn TargetApi>,
    store: Arc<dyn StateStore>,
    tag_path: String,
    url_prefix: String,
    batch_size: u64,
    metrics: Arc<ConnectorMetrics>,
}

impl TagSync {
    /// Create the job. `url_prefix` is the Allisa base URL used in tag links.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance: InstanceId,
        source: Arc<dyn SourceApi>,
        target: Arc<dyn TargetApi>,
        store: Arc<dyn StateStore>,
        tag_path: impl Into<String>,
        url_prefix: impl Into<String>,
        batch_size: u64,
        metrics: Arc<ConnectorMetrics>,
    ) -> Self {
        Self {
            instance,
            source,
            target,
            store,
            tag_path: tag_path.into(),
            url_prefix: url_prefix.into(),
            batch_size: batch_size.max(1),
            metrics,
        }
    }

    /// Upsert tags for every case not synced yet. Returns the number of tags.
    ///
    /// The page cursor points at the last page that returned cases, since it
    /// may fill up later. When it comes back empty the next page is checked
    /// once before giving up.
    pub async fn sync_new_cases(&self) -> Result<usize> {
        let mut check_next_page = true;
        let mut upserted = 0;
        loop {
            let last_case_id = self.counter(SYNC_LAST_CASE_ID).await?.unwrap_or(0);
            let page = self.counter(SYNC_PAGE).await?.unwrap_or(1).max(1);

            let cases = self.cases_after(last_case_id, page).await?;
            if cases.is_empty() {
                if check_next_page {
                    check_next_page = false;
                    tracing::debug!(page, "empty case page, checking the next one");
                    self.put_counter(SYNC_PAGE, page + 1).await?;
                    continue;
                }
                tracing::info!(last_case_id, "no new cases");
                self.put_counter(SYNC_PAGE, page.saturating_sub(1).max(1))
                    .await?;
                return Ok(upserted);
            }

            self.upsert(&cases, "new").await?;
            upserted += cases.len();

            let last = cases.last().map(|c| c.case_id).unwrap_or(last_case_id);
            self.put_counter(SYNC_LAST_CASE_ID, last).await?;
            self.put_counter(SYNC_PAGE, page + 1).await?;
            check_next_page = false;
            tracing::info!(last_case_id = last, page, "synced case tags");
        }
    }

    /// Refresh the tags of one page of already known cases.
    pub async fn refresh_cases(&self) -> Result<usize> {
        let last_case_id = self.counter(REFRESH_LAST_CASE_ID).await?.unwrap_or(0);
        let page = self.counter(REFRESH_PAGE).await?.unwrap_or(0) + 1;

        let cases = self.cases_after(last_case_id, page).await?;
        if cases.is_empty() {
            tracing::debug!("refresh reached the last case, starting over");
            self.put_counter(REFRESH_LAST_CASE_ID, 0).await?;
            self.put_counter(REFRESH_PAGE, 0).await?;
            return Ok(0);
        }

        self.upsert(&cases, "refreshed").await?;
        let last = cases.last().map(|c| c.case_id).unwrap_or(last_case_id);
        self.put_counter(REFRESH_LAST_CASE_ID, last).await?;
        self.put_counter(REFRESH_PAGE, page).await?;
        tracing::info!(last_case_id = last, page, "refreshed case tags");
        Ok(cases.len())
    }

    async fn cases_after(&self, last_case_id: u64, page: u64) -> Result<Vec<AllisaCase>> {
        let cases = self.target.list_cases(page, self.batch_size).await?;
        Ok(cases
            .into_iter()
            .filter(|c| c.case_id > last_case_id)
            .collect())
    }

    async fn upsert(&self, cases: &[AllisaCase], what: &str) -> Result<()> {
        let tags: Vec<UpsertTagRequest> = cases
            .iter()
            .map(|c| c.to_upsert_tag(&self.tag_path, &self.url_prefix))
            .collect();
        let ids: Vec<String> = cases.iter().map(|c| c.case_id.to_string()).collect();
        tracing::info!(count = tags.len(), case_ids = %ids.join(", "), "upserting {what} tags");

        self.source.upsert_tags(&tags).await?;
        self.metrics
            .tags_upserted_total
            .fetch_add(tags.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn counter(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.store.get_counter(&self.instance, name).await?)
    }

    async fn put_counter(&self, name: &str, value: u64) -> Result<()> {
        Ok(self.store.put_counter(&self.instance, name, value).await?)
    }
}

/// Spawn the tag sync job.
///
/// Returns a handle that can be used to abort the task. The task ends when
/// `shutdown` turns true.
pub fn spawn_tag_sync_task(
    job: Arc<TagSync>,
    config: TagSyncConfig,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("tag sync disabled");
            return;
        }

        tracing::info!(
            interval_secs = config.interval_secs,
            refresh_interval_secs = config.refresh_interval_secs,
            "tag sync started"
        );

        let mut sync_timer = interval(Duration::from_secs(config.interval_secs.max(1)));
        sync_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let refresh_enabled = config.refresh_interval_secs > 0;
        let mut refresh_timer = interval(Duration::from_secs(config.refresh_interval_secs.max(1)));
        refresh_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = sync_timer.tick() => {
                    if let Err(e) = job.sync_new_cases().await {
                        tracing::error!(error = %e, "tag sync failed");
                    }
                }
                _ = refresh_timer.tick(), if refresh_enabled => {
                    if let Err(e) = job.refresh_cases().await {
                        tracing::error!(error = %e, "tag refresh failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("tag sync stopped");
                        return;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use connector_client::{ClientError, MockSource, MockTarget};

    struct Harness {
        source: MockSource,
        target: MockTarget,
        job: TagSync,
    }

    async fn harness(batch_size: u64) -> Harness {
        let source = MockSource::new();
        let target = MockTarget::new();
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let job = TagSync::new(
            InstanceId::new("test").unwrap(),
            Arc::new(source.clone()),
            Arc::new(target.clone()),
            store,
            "/Allisa/",
            "https://allisa.example.com/",
            batch_size,
            Arc::new(ConnectorMetrics::default()),
        );
        Harness {
            source,
            target,
            job,
        }
    }

    fn add_cases(target: &MockTarget, ids: std::ops::RangeInclusive<u64>) {
        for id in ids {
            target.add_case(id, &format!("P-{id}"));
        }
    }

    fn upserted_names(source: &MockSource) -> Vec<String> {
        source.upserted_tags().into_iter().map(|t| t.name).collect()
    }

    #[tokio::test]
    async fn syncs_all_pages_of_new_cases() {
        let h = harness(2).await;
        add_cases(&h.target, 1..=5);

        let count = h.job.sync_new_cases().await.unwrap();

        assert_eq!(count, 5);
        assert_eq!(upserted_names(&h.source), vec!["P-1", "P-2", "P-3", "P-4", "P-5"]);
        let tag = &h.source.upserted_tags()[0];
        assert_eq!(tag.path, "/Allisa/");
        assert_eq!(tag.url, "https://allisa.example.com/projekt/show/ID/1");
    }

    #[tokio::test]
    async fn second_run_only_upserts_new_cases() {
        let h = harness(2).await;
        add_cases(&h.target, 1..=3);
        h.job.sync_new_cases().await.unwrap();

        add_cases(&h.target, 4..=4);
        let count = h.job.sync_new_cases().await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(upserted_names(&h.source).last().unwrap(), "P-4");
        assert_eq!(h.source.upserted_tags().len(), 4);
    }

    #[tokio::test]
    async fn nothing_new_upserts_nothing() {
        let h = harness(2).await;
        assert_eq!(h.job.sync_new_cases().await.unwrap(), 0);
        assert!(h.source.upserted_tags().is_empty());
    }

    #[tokio::test]
    async fn failed_upsert_does_not_advance_cursor() {
        let h = harness(10).await;
        add_cases(&h.target, 1..=2);
        h.source.fail_next_upsert(ClientError::Timeout);

        assert!(h.job.sync_new_cases().await.is_err());
        assert_eq!(h.job.sync_new_cases().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn refresh_walks_pages_then_wraps() {
        let h = harness(2).await;
        add_cases(&h.target, 1..=3);

        assert_eq!(h.job.refresh_cases().await.unwrap(), 2);
        assert_eq!(h.job.refresh_cases().await.unwrap(), 1);
        assert_eq!(h.job.refresh_cases().await.unwrap(), 0);
        // Starts over from the first page.
        assert_eq!(h.job.refresh_cases().await.unwrap(), 2);
        assert_eq!(
            upserted_names(&h.source),
            vec!["P-1", "P-2", "P-3", "P-1", "P-2"]
        );
    }

    #[tokio::test]
    async fn disabled_task_exits_immediately() {
        let h = harness(2).await;
        let (_tx, rx) = watch::channel(false);
        let config = TagSyncConfig {
            enabled: false,
            ..TagSyncConfig::default()
        };

        let handle = spawn_tag_sync_task(Arc::new(h.job), config, rx);
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("task should complete when disabled")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn task_stops_on_shutdown() {
        let h = harness(2).await;
        add_cases(&h.target, 1..=1);
        let (tx, rx) = watch::channel(false);
        let config = TagSyncConfig {
            enabled: true,
            ..TagSyncConfig::default()
        };

        let handle = spawn_tag_sync_task(Arc::new(h.job), config, rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should stop")
            .unwrap();
        assert_eq!(upserted_names(&h.source), vec!["P-1", "P-1"]);
    }
}
