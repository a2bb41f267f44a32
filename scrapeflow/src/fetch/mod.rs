//! Page fetching and page sources.
//!
//! [`PageFetcher`] wraps whatever engine renders pages. It applies a timeout
//! but never retries; the orchestrator owns the fetch retry budget.

#[cfg(feature = "http")]
mod http;
mod pagination;

#[cfg(feature = "http")]
pub use http::{ContentFormat, HttpFetcherConfig, HttpPageFetcher};
pub use pagination::{PageSource, DEFAULT_PAGE_PARAM};

use crate::errors::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Separator placed between selector-matched elements.
pub const ELEMENT_SEPARATOR: &str = "\n\n";

/// Selector-scoped content of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    /// The page URL.
    pub url: String,
    /// Text (or HTML) of every matched element, joined by a blank line.
    pub content: String,
    /// Byte offset in `content` where each element starts.
    pub element_offsets: Vec<usize>,
    /// Number of elements the selector matched.
    pub element_count: usize,
    /// When the page was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl PageContent {
    /// Wraps already-joined content as a single element.
    #[must_use]
    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let element_count = usize::from(!content.is_empty());
        Self {
            url: url.into(),
            element_offsets: if content.is_empty() { Vec::new() } else { vec![0] },
            content,
            element_count,
            fetched_at: Utc::now(),
        }
    }

    /// Joins matched elements, recording where each one starts.
    #[must_use]
    pub fn from_elements<I, S>(url: impl Into<String>, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut content = String::new();
        let mut element_offsets = Vec::new();
        for element in elements {
            if !content.is_empty() {
                content.push_str(ELEMENT_SEPARATOR);
            }
            element_offsets.push(content.len());
            content.push_str(element.as_ref());
        }

        Self {
            url: url.into(),
            element_count: element_offsets.len(),
            element_offsets,
            content,
            fetched_at: Utc::now(),
        }
    }

    /// Whether the page carried no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Retrieves selector-scoped content for a URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches `url` and returns the content matched by `selector`.
    ///
    /// # Errors
    ///
    /// `Timeout` if `timeout` elapses, `Unreachable` if the page could not be
    /// retrieved, `Empty` if the selector matched nothing.
    async fn fetch(
        &self,
        url: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<PageContent, FetchError>;
}
