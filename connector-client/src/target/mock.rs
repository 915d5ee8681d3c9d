//! Mock target for testing.
//!
//! Behaves like an idempotent Allisa: a repeated post with a known
//! idempotency key is acknowledged but not stored twice.

use super::{AllisaCase, TargetApi, TimePost};
use crate::ClientError;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock target for testing.
#[derive(Debug)]
pub struct MockTarget {
    inner: Arc<Mutex<MockTargetInner>>,
}

#[derive(Debug)]
struct MockTargetInner {
    reachable: bool,
    cases: Vec<AllisaCase>,
    entries: Vec<TimePost>,
    attempts: Vec<String>,
    scripted_failures: HashMap<String, (usize, StatusCode)>,
    fail_next_lookup: Option<ClientError>,
}

impl Default for MockTargetInner {
    fn default() -> Self {
        Self {
            reachable: true,
            cases: Vec::new(),
            entries: Vec::new(),
            attempts: Vec::new(),
            scripted_failures: HashMap::new(),
            fail_next_lookup: None,
        }
    }
}

impl Default for MockTarget {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockTargetInner::default())),
        }
    }
}

impl MockTarget {
    /// Create a reachable mock target with no cases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a case.
    pub fn add_case(&self, case_id: u64, case_reference: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.cases.push(AllisaCase {
            case_id,
            case_reference: case_reference.to_string(),
            case_description: Some(format!("Case {case_reference}")),
        });
        inner.cases.sort_by_key(|c| c.case_id);
    }

    /// Fail the next `times` posts whose idempotency key starts with
    /// `key_prefix` with `status`.
    pub fn fail_posts(&self, key_prefix: &str, times: usize, status: u16) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut inner = self.inner.lock().unwrap();
        inner
            .scripted_failures
            .insert(key_prefix.to_string(), (times, status));
    }

    /// Cause the next case lookup to fail with the given error.
    pub fn fail_next_lookup(&self, error: ClientError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_lookup = Some(error);
    }

    /// Make `can_connect` succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.reachable = reachable;
    }

    /// Time entries stored (one per distinct idempotency key).
    pub fn entries(&self) -> Vec<TimePost> {
        let inner = self.inner.lock().unwrap();
        inner.entries.clone()
    }

    /// Idempotency keys of every post attempt, failed ones included.
    pub fn attempts(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.attempts.clone()
    }

    /// Value of a form field of a stored entry.
    pub fn entry_field(&self, idempotency_key: &str, field: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .iter()
            .find(|e| e.idempotency_key == idempotency_key)
            .and_then(|e| e.fields.iter().find(|(name, _)| name == field))
            .map(|(_, value)| value.clone())
    }
}

impl Clone for MockTarget {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl TargetApi for MockTarget {
    async fn find_case(&self, case_reference: &str) -> Result<Option<AllisaCase>, ClientError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_lookup.take() {
            return Err(error);
        }
        Ok(inner
            .cases
            .iter()
            .find(|c| c.case_reference.eq_ignore_ascii_case(case_reference))
            .cloned())
    }

    async fn post_time(&self, post: &TimePost) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().unwrap();
        inner.attempts.push(post.idempotency_key.clone());

        let scripted = inner
            .scripted_failures
            .iter_mut()
            .find(|(prefix, (remaining, _))| {
                *remaining > 0 && post.idempotency_key.starts_with(prefix.as_str())
            })
            .map(|(_, failure)| failure);
        if let Some((remaining, status)) = scripted {
            *remaining -= 1;
            let status = *status;
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(ClientError::RateLimited { retry_after: None });
            }
            return Err(ClientError::Http {
                status,
                body: "scripted failure".into(),
            });
        }

        if !inner
            .entries
            .iter()
            .any(|e| e.idempotency_key == post.idempotency_key)
        {
            inner.entries.push(post.clone());
        }
        Ok(())
    }

    async fn list_cases(
        &self,
        page: u64,
        rows_per_page: u64,
    ) -> Result<Vec<AllisaCase>, ClientError> {
        let inner = self.inner.lock().unwrap();
        let start = page.saturating_sub(1).saturating_mul(rows_per_page) as usize;
        Ok(inner
            .cases
            .iter()
            .skip(start)
            .take(rows_per_page as usize)
            .cloned()
            .collect())
    }

    async fn can_connect(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.reachable
    }
}
