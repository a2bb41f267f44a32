//! Sends shaped requests to provider endpoints.

use crate::errors::ExtractionError;
use crate::providers::ProviderRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A provider's raw HTTP answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReply {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
    /// Parsed `Retry-After` header.
    pub retry_after: Option<Duration>,
}

impl ProviderReply {
    /// A reply with no `Retry-After` header.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    /// Sets the `Retry-After` wait.
    #[must_use]
    pub fn with_retry_after(mut self, wait: Duration) -> Self {
        self.retry_after = Some(wait);
        self
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Delivers a [`ProviderRequest`] and returns whatever the provider answered.
///
/// Non-success statuses are replies, not errors; only failures to get any
/// answer at all are errors.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    /// Sends one request.
    ///
    /// # Errors
    ///
    /// Returns `Transport` when no response was received.
    async fn send(&self, request: ProviderRequest) -> Result<ProviderReply, ExtractionError>;
}

/// Parses a `Retry-After` value: delay seconds or an HTTP date.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    if let Ok(seconds) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(seconds).ok();
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&Utc) - Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

/// [`LlmTransport`] over reqwest.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpTransport {
    /// Creates a transport whose client gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Request` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("scrapeflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ExtractionError::Request(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
fn transport_error(error: reqwest::Error) -> ExtractionError {
    let timed_out = error.is_timeout();
    ExtractionError::transport(error.without_url(), timed_out)
}

#[cfg(feature = "http")]
#[async_trait]
impl LlmTransport for HttpTransport {
    async fn send(&self, request: ProviderRequest) -> Result<ProviderReply, ExtractionError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.map_err(transport_error)?;

        Ok(ProviderReply {
            status,
            body,
            retry_after,
        })
    }
}
