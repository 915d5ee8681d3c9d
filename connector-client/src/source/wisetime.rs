//! WiseTime HTTP client.

use super::{PostedTimePage, SourceApi, UpsertTagRequest};
use crate::ClientError;
use async_trait::async_trait;
use connector_types::Watermark;
use reqwest::Client;
use std::time::Duration;

/// WiseTime client settings.
#[derive(Debug, Clone)]
pub struct WiseTimeClientConfig {
    /// API base URL, e.g. `https://wisetime.com/connect/api`.
    pub base_url: String,
    /// Bearer token.
    pub api_token: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl WiseTimeClientConfig {
    /// Settings with the default 30s timeout.
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: api_token.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// `reqwest` implementation of [`SourceApi`].
#[derive(Clone)]
pub struct WiseTimeClient {
    client: Client,
    config: WiseTimeClientConfig,
}

impl WiseTimeClient {
    /// Create a client.
    pub fn new(config: WiseTimeClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Request)?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

impl std::fmt::Debug for WiseTimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WiseTimeClient")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceApi for WiseTimeClient {
    async fn fetch_posted_time(
        &self,
        after: Watermark,
        limit: usize,
    ) -> Result<PostedTimePage, ClientError> {
        let response = self
            .client
            .get(self.url("postedtime"))
            .bearer_auth(&self.config.api_token)
            .query(&[("after", after.value()), ("limit", limit as u64)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::from_response(response).await);
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn upsert_tags(&self, tags: &[UpsertTagRequest]) -> Result<(), ClientError> {
        if tags.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.url("tag/upsert/batch"))
            .bearer_auth(&self.config.api_token)
            .json(tags)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::from_response(response).await);
        }
        tracing::debug!(count = tags.len(), "upserted tags");
        Ok(())
    }
}
