//! Allisa HTTP client.

use super::{AllisaCase, ApiResponse, TargetApi, TimePost};
use crate::ClientError;
use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::{Client, Url};
use std::time::Duration;

/// Allisa client settings.
#[derive(Debug, Clone)]
pub struct AllisaClientConfig {
    /// Allisa base URL, e.g. `https://allisa.example.com/`.
    pub base_url: String,
    /// API key, sent as `Authorization: apikey {key}`.
    pub api_key: String,
    /// Case list type used for lookups and tag sync.
    pub case_type: String,
    /// Post type that receives time entries.
    pub post_type: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl AllisaClientConfig {
    /// Settings with the default 30s timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        case_type: impl Into<String>,
        post_type: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            case_type: case_type.into(),
            post_type: post_type.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// `reqwest` implementation of [`TargetApi`].
#[derive(Clone)]
pub struct AllisaClient {
    client: Client,
    base_url: Url,
    config: AllisaClientConfig,
}

impl AllisaClient {
    /// Create a client. Fails if the base URL is not a valid absolute URL.
    pub fn new(config: AllisaClientConfig) -> Result<Self, ClientError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(config.base_url.clone()));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Request)?;
        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// Base URL with path segments appended (each segment is escaped).
    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.config.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn auth_header(&self) -> String {
        format!("apikey {}", self.config.api_key)
    }

    async fn get_cases(&self, url: Url) -> Result<ApiResponse<AllisaCase>, ClientError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::from_response(response).await);
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    fn list_url(&self, page: u64, rows_per_page: u64) -> Result<Url, ClientError> {
        let rows = rows_per_page.to_string();
        let page = page.to_string();
        self.url(&[
            "api",
            "list",
            "type",
            &self.config.case_type,
            "rowsPerPage",
            &rows,
            "page",
            &page,
            "orderrow",
            "caseId",
        ])
    }
}

impl std::fmt::Debug for AllisaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllisaClient")
            .field("base_url", &self.config.base_url)
            .field("case_type", &self.config.case_type)
            .field("post_type", &self.config.post_type)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TargetApi for AllisaClient {
    async fn find_case(&self, case_reference: &str) -> Result<Option<AllisaCase>, ClientError> {
        let url = self.url(&[
            "api",
            "list",
            "type",
            &self.config.case_type,
            "search",
            case_reference,
        ])?;
        let cases = self.get_cases(url).await?.into_data();
        Ok(cases
            .into_iter()
            .find(|c| c.case_reference.eq_ignore_ascii_case(case_reference)))
    }

    async fn post_time(&self, post: &TimePost) -> Result<(), ClientError> {
        let url = self.url(&["api", &self.config.post_type])?;
        let form = post
            .fields
            .iter()
            .fold(Form::new(), |form, (name, value)| {
                form.text(name.clone(), value.clone())
            });

        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .header("Idempotency-Key", &post.idempotency_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::from_response(response).await);
        }
        Ok(())
    }

    async fn list_cases(
        &self,
        page: u64,
        rows_per_page: u64,
    ) -> Result<Vec<AllisaCase>, ClientError> {
        let url = self.list_url(page, rows_per_page)?;
        Ok(self.get_cases(url).await?.into_data())
    }

    async fn can_connect(&self) -> bool {
        let url = match self.list_url(1, 1) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(error = %e, "invalid Allisa url");
                return false;
            }
        };
        match self.get_cases(url).await {
            Ok(response) if response.code == 200 => true,
            Ok(response) => {
                tracing::warn!(
                    code = response.code,
                    message = response.message.as_deref().unwrap_or(""),
                    "unexpected Allisa response code"
                );
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "error while trying to connect to Allisa");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> AllisaClient {
        AllisaClient::new(AllisaClientConfig::new(
            format!("{}/", server.uri()),
            "key-1",
            "projekt",
            "zeiterfassung",
        ))
        .unwrap()
    }

    fn envelope(data: serde_json::Value) -> serde_json::Value {
        json!({ "code": 200, "message": "OK", "result": { "data": data } })
    }

    #[tokio::test]
    async fn finds_case_case_insensitively() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/list/type/projekt/search/p-1"))
            .and(header("authorization", "apikey key-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
                { "ID": 5, "az": "P-10", "prname": "Other" },
                { "ID": 7, "az": "P-1", "prname": "Patent" }
            ]))))
            .mount(&server)
            .await;

        let case = client(&server).find_case("p-1").await.unwrap().unwrap();
        assert_eq!(case.case_id, 7);
    }

    #[tokio::test]
    async fn case_lookup_searches_case_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/list/type/zeiterfassung/search/P-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
                { "ID": 9, "az": "P-1", "prname": "Time entry list" }
            ]))))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/list/type/projekt/search/P-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]))))
            .expect(1)
            .mount(&server)
            .await;

        assert!(client(&server).find_case("P-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_case_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/list/type/projekt/search/NOPE"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]))))
            .mount(&server)
            .await;

        assert!(client(&server).find_case("NOPE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn case_reference_is_escaped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/list/type/projekt/search/A%2FB%20C"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
                { "caseId": 1, "caseReference": "A/B C" }
            ]))))
            .mount(&server)
            .await;

        let case = client(&server).find_case("A/B C").await.unwrap();
        assert!(case.is_some());
    }

    #[tokio::test]
    async fn posts_multipart_form_with_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/zeiterfassung"))
            .and(header("authorization", "apikey key-1"))
            .and(header("idempotency-key", "abc-7"))
            .and(body_string_contains("name=\"pid\""))
            .and(body_string_contains("Drafted reply"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]))))
            .expect(1)
            .mount(&server)
            .await;

        let post = TimePost {
            idempotency_key: "abc-7".into(),
            fields: vec![
                ("pid".into(), "7".into()),
                ("narrative".into(), "Drafted reply".into()),
            ],
        };
        client(&server).post_time(&post).await.unwrap();
    }

    #[tokio::test]
    async fn bad_request_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/zeiterfassung"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"code": 400, "message": "bad"})),
            )
            .mount(&server)
            .await;

        let post = TimePost {
            idempotency_key: "k".into(),
            fields: vec![],
        };
        let err = client(&server).post_time(&post).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/zeiterfassung"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let post = TimePost {
            idempotency_key: "k".into(),
            fields: vec![],
        };
        let err = client(&server).post_time(&post).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn lists_cases_by_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/api/list/type/projekt/rowsPerPage/2/page/3/orderrow/caseId",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
                { "ID": 5, "az": "P-5" },
                { "ID": 6, "az": "P-6" }
            ]))))
            .mount(&server)
            .await;

        let cases = client(&server).list_cases(3, 2).await.unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[1].case_reference, "P-6");
    }

    #[tokio::test]
    async fn can_connect_checks_envelope_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/api/list/type/projekt/rowsPerPage/1/page/1/orderrow/caseId",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]))))
            .mount(&server)
            .await;

        assert!(client(&server).can_connect().await);
    }

    #[tokio::test]
    async fn can_connect_false_on_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(!client(&server).can_connect().await);
    }

    #[test]
    fn base_url_without_trailing_slash() {
        let client = AllisaClient::new(AllisaClientConfig::new(
            "https://allisa.example.com/root",
            "k",
            "projekt",
            "zeit",
        ))
        .unwrap();
        let url = client.url(&["api", "zeit"]).unwrap();
        assert_eq!(url.as_str(), "https://allisa.example.com/root/api/zeit");
    }

    #[test]
    fn rejects_relative_base_url() {
        let err = AllisaClient::new(AllisaClientConfig::new("allisa", "k", "c", "p")).unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl(_)));
    }
}
