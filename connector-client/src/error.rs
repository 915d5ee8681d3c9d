//! Client errors.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors from the WiseTime and Allisa clients.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status.
        status: StatusCode,
        /// Response body (possibly empty).
        body: String,
    },

    /// HTTP 429, optionally with the server's `Retry-After`.
    #[error("rate limited")]
    RateLimited {
        /// Requested wait before the next call.
        retry_after: Option<Duration>,
    },

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),

    /// A URL could not be built from the configured base URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Any other transport failure.
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl ClientError {
    /// Whether the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout | Self::Connect(_) => true,
            Self::Http { status, .. } => status.is_server_error(),
            Self::Request(e) => !e.is_builder(),
            Self::Decode(_) | Self::InvalidUrl(_) => false,
        }
    }

    /// Whether the server rejected the credentials.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Http { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }

    /// Server-requested wait, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Build an error from a non-success response.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Self::RateLimited { retry_after };
        }
        let body = response.text().await.unwrap_or_default();
        Self::Http { status, body }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Request(e)
        }
    }
}
