//! Allisa side of the connector.
//!
//! Allisa wraps every response in an envelope:
//!
//! ```json
//! { "code": 200, "message": "OK", "result": { "data": [ ... ] } }
//! ```
//!
//! Case records come in two dialects (`caseId`/`ID`, `caseReference`/`az`,
//! `caseDescription`/`prname`); both are accepted.

mod allisa;
mod mock;

pub use allisa::{AllisaClient, AllisaClientConfig};
pub use mock::MockTarget;

use crate::source::UpsertTagRequest;
use crate::ClientError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An Allisa case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllisaCase {
    /// Numeric case id.
    #[serde(rename = "caseId", alias = "ID")]
    pub case_id: u64,
    /// Case reference, used as the WiseTime tag name.
    #[serde(rename = "caseReference", alias = "az")]
    pub case_reference: String,
    /// Case description.
    #[serde(rename = "caseDescription", alias = "prname", default)]
    pub case_description: Option<String>,
}

impl AllisaCase {
    /// The WiseTime tag for this case.
    ///
    /// `url_prefix` is the Allisa base URL; the case page is appended.
    pub fn to_upsert_tag(&self, tag_path: &str, url_prefix: &str) -> UpsertTagRequest {
        UpsertTagRequest {
            name: self.case_reference.clone(),
            description: self.case_description.clone().unwrap_or_default(),
            path: tag_path.to_string(),
            url: format!(
                "{}/projekt/show/ID/{}",
                url_prefix.trim_end_matches('/'),
                self.case_id
            ),
        }
    }
}

/// Allisa response envelope.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiResponse<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    pub result: Option<ApiResult<T>>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiResult<T> {
    // A path default avoids a `T: Default` bound.
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> ApiResponse<T> {
    pub(crate) fn into_data(self) -> Vec<T> {
        self.result.map(|r| r.data).unwrap_or_default()
    }
}

/// A time entry ready to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimePost {
    /// Value of the `Idempotency-Key` header.
    pub idempotency_key: String,
    /// Multipart form fields, already renamed for the configured post type.
    pub fields: Vec<(String, String)>,
}

/// Target API used by the dispatcher and the tag sync job.
#[async_trait]
pub trait TargetApi: Send + Sync {
    /// Find the case whose reference matches `case_reference` (case insensitive).
    async fn find_case(&self, case_reference: &str) -> Result<Option<AllisaCase>, ClientError>;

    /// Post a time entry. Repeating a post with the same key must not
    /// create a second entry.
    async fn post_time(&self, post: &TimePost) -> Result<(), ClientError>;

    /// One page of cases ordered by case id (pages start at 1).
    async fn list_cases(&self, page: u64, rows_per_page: u64)
        -> Result<Vec<AllisaCase>, ClientError>;

    /// Whether Allisa answers a trivial request.
    async fn can_connect(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_accepts_both_dialects() {
        let a: AllisaCase = serde_json::from_str(
            r#"{"caseId": 7, "caseReference": "P-1", "caseDescription": "Patent"}"#,
        )
        .unwrap();
        let b: AllisaCase =
            serde_json::from_str(r#"{"ID": 7, "az": "P-1", "prname": "Patent"}"#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn description_is_optional() {
        let case: AllisaCase = serde_json::from_str(r#"{"ID": 3, "az": "X"}"#).unwrap();
        assert_eq!(case.case_description, None);
    }

    #[test]
    fn upsert_tag_links_to_case() {
        let case = AllisaCase {
            case_id: 12,
            case_reference: "P-12".into(),
            case_description: Some("Trademark".into()),
        };
        let tag = case.to_upsert_tag("/Allisa/", "https://allisa.example.com/");
        assert_eq!(tag.name, "P-12");
        assert_eq!(tag.path, "/Allisa/");
        assert_eq!(tag.url, "https://allisa.example.com/projekt/show/ID/12");
        assert_eq!(tag.description, "Trademark");
    }

    #[test]
    fn envelope_without_result_is_empty() {
        let resp: ApiResponse<AllisaCase> =
            serde_json::from_str(r#"{"code": 200, "message": "OK"}"#).unwrap();
        assert_eq!(resp.code, 200);
        assert!(resp.into_data().is_empty());
    }
}
