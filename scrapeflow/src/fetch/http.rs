//! Plain HTTP page fetcher with CSS selector scoping.

use super::{PageContent, PageFetcher};
use crate::errors::{ConfigError, FetchError};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// What each matched element contributes to the page content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    /// Visible text, one line per text node.
    #[default]
    Text,
    /// Outer HTML of the element.
    Html,
}

/// Configuration for [`HttpPageFetcher`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpFetcherConfig {
    /// User agent string.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Maximum response size in bytes.
    #[serde(default = "default_max_size")]
    pub max_response_size: usize,
    /// Element rendering.
    #[serde(default)]
    pub content_format: ContentFormat,
    /// Text that marks a page past the last page of results.
    #[serde(default = "default_end_marker")]
    pub end_marker: Option<String>,
    /// Additional headers to include.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_user_agent() -> String {
    concat!("scrapeflow/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_size() -> usize {
    10 * 1024 * 1024
}

fn default_end_marker() -> Option<String> {
    Some("No Results Found".to_string())
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            max_response_size: default_max_size(),
            content_format: ContentFormat::default(),
            end_marker: default_end_marker(),
            headers: HashMap::new(),
        }
    }
}

impl HttpFetcherConfig {
    /// Creates a fetcher configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the element rendering.
    #[must_use]
    pub fn with_content_format(mut self, format: ContentFormat) -> Self {
        self.content_format = format;
        self
    }

    /// Sets or clears the end-of-results marker.
    #[must_use]
    pub fn with_end_marker(mut self, marker: Option<String>) -> Self {
        self.end_marker = marker;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Fetches pages over HTTP and keeps only the selector-matched elements.
///
/// Pages are not rendered; content produced by scripts is not visible.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
    config: HttpFetcherConfig,
}

impl HttpPageFetcher {
    /// Creates a fetcher.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` if the HTTP client cannot be built.
    pub fn new(config: HttpFetcherConfig) -> Result<Self, ConfigError> {
        let mut headers = reqwest::header::HeaderMap::new();
        for (key, value) in &config.headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ConfigError::InvalidSettings(format!("header {key}: {e}")))?;
            let value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| ConfigError::InvalidSettings(format!("header {key}: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::InvalidSettings(format!("http client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Creates a fetcher around an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: HttpFetcherConfig) -> Self {
        Self { client, config }
    }

    async fn download(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, timeout, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::unreachable(url, format!("HTTP {}", status.as_u16())));
        }

        let limit = self.config.max_response_size;
        if let Some(length) = response.content_length() {
            if usize::try_from(length).map_or(true, |l| l > limit) {
                return Err(too_large(url, length));
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| map_reqwest_error(url, timeout, &e))?
        {
            check_body_size(url, bytes.len() + chunk.len(), limit)?;
            bytes.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Selects the matched elements of an HTML document.
    ///
    /// # Errors
    ///
    /// `Empty` if the end-of-results marker is present or nothing matched.
    pub fn select(&self, url: &str, html: &str, selector: &str) -> Result<PageContent, FetchError> {
        if let Some(marker) = self.config.end_marker.as_deref() {
            if !marker.is_empty() && html.contains(marker) {
                debug!(url = %url, marker = %marker, "End-of-results marker found");
                return Err(FetchError::empty(url, selector));
            }
        }

        let parsed = Selector::parse(selector)
            .map_err(|e| FetchError::unreachable(url, format!("invalid selector: {e}")))?;
        let document = Html::parse_document(html);

        let elements: Vec<String> = document
            .select(&parsed)
            .map(|el| render_element(el, self.config.content_format))
            .filter(|text| !text.trim().is_empty())
            .collect();

        if elements.is_empty() {
            return Err(FetchError::empty(url, selector));
        }
        Ok(PageContent::from_elements(url, elements))
    }
}

fn too_large(url: &str, bytes: impl std::fmt::Display) -> FetchError {
    FetchError::unreachable(url, format!("response of {bytes} bytes exceeds limit"))
}

/// Fails once a body read so far has grown past `limit`.
fn check_body_size(url: &str, read: usize, limit: usize) -> Result<(), FetchError> {
    if read > limit {
        return Err(too_large(url, format!("at least {read}")));
    }
    Ok(())
}

fn render_element(element: ElementRef<'_>, format: ContentFormat) -> String {
    match format {
        ContentFormat::Html => element.html(),
        ContentFormat::Text => element
            .text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn map_reqwest_error(url: &str, timeout: Duration, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else {
        FetchError::unreachable(url, error)
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(
        &self,
        url: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<PageContent, FetchError> {
        debug!(url = %url, selector = %selector, "Fetching page");

        let html = tokio::time::timeout(timeout, self.download(url, timeout))
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
                timeout,
            })??;

        let page = self.select(url, &html, selector)?;
        debug!(
            url = %url,
            elements = page.element_count,
            bytes = page.content.len(),
            "Page fetched"
        );
        Ok(page)
    }
}
