//! In-memory page fetcher.

use crate::errors::FetchError;
use crate::fetch::{PageContent, PageFetcher};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// A [`PageFetcher`] serving fixed pages.
///
/// URLs with no page and no error configured fail with `Empty`, the way a
/// real site behaves past its last results page.
#[derive(Debug, Default)]
pub struct StaticPageFetcher {
    pages: HashMap<String, Vec<String>>,
    errors: HashMap<String, FetchError>,
    flaky: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
    fetched: Mutex<Vec<String>>,
}

impl StaticPageFetcher {
    /// Creates a fetcher with no pages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `elements` as the selector matches for `url`.
    #[must_use]
    pub fn with_page<I, S>(mut self, url: impl Into<String>, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pages
            .insert(url.into(), elements.into_iter().map(Into::into).collect());
        self
    }

    /// Always fails `url` with `error`.
    #[must_use]
    pub fn with_error(mut self, url: impl Into<String>, error: FetchError) -> Self {
        self.errors.insert(url.into(), error);
        self
    }

    /// Fails `url` as unreachable `times` times before serving it.
    #[must_use]
    pub fn with_transient_failures(self, url: impl Into<String>, times: usize) -> Self {
        self.flaky.lock().insert(url.into(), times);
        self
    }

    /// Waits before every answer.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every URL requested, in order, including repeats.
    #[must_use]
    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }

    fn answer(&self, url: &str, selector: &str) -> Result<PageContent, FetchError> {
        if let Some(remaining) = self.flaky.lock().get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FetchError::unreachable(url, "connection reset"));
            }
        }
        if let Some(error) = self.errors.get(url) {
            return Err(error.clone());
        }
        match self.pages.get(url) {
            Some(elements) if !elements.is_empty() => {
                Ok(PageContent::from_elements(url, elements))
            }
            _ => Err(FetchError::empty(url, selector)),
        }
    }
}

#[async_trait]
impl PageFetcher for StaticPageFetcher {
    async fn fetch(
        &self,
        url: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<PageContent, FetchError> {
        self.fetched.lock().push(url.to_string());

        if let Some(delay) = self.delay {
            if tokio::time::timeout(timeout, tokio::time::sleep(delay))
                .await
                .is_err()
            {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                    timeout,
                });
            }
        }
        self.answer(url, selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_serves_pages_and_records_urls() {
        let fetcher = StaticPageFetcher::new().with_page("https://a.test/1", ["one", "two"]);

        let page = fetcher.fetch("https://a.test/1", ".x", TIMEOUT).await.unwrap();
        let missing = fetcher.fetch("https://a.test/2", ".x", TIMEOUT).await;

        assert_eq!(page.element_count, 2);
        assert!(matches!(missing, Err(FetchError::Empty { .. })));
        assert_eq!(fetcher.fetched_urls(), vec!["https://a.test/1", "https://a.test/2"]);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let fetcher = StaticPageFetcher::new()
            .with_page("https://a.test/1", ["one"])
            .with_transient_failures("https://a.test/1", 1);

        assert!(fetcher.fetch("https://a.test/1", ".x", TIMEOUT).await.is_err());
        assert!(fetcher.fetch("https://a.test/1", ".x", TIMEOUT).await.is_ok());
    }

    #[tokio::test]
    async fn test_delay_past_timeout() {
        let fetcher = StaticPageFetcher::new()
            .with_page("https://a.test/1", ["one"])
            .with_delay(Duration::from_millis(100));

        let result = fetcher
            .fetch("https://a.test/1", ".x", Duration::from_millis(5))
            .await;
        assert!(matches!(result, Err(FetchError::Timeout { .. })));
    }
}
