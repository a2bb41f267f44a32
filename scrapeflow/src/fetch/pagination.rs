//! Where the pages of a crawl come from.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use url::Url;

/// Default query parameter carrying the page number.
pub const DEFAULT_PAGE_PARAM: &str = "page";

fn default_page_param() -> String {
    DEFAULT_PAGE_PARAM.to_string()
}

fn default_start_page() -> usize {
    1
}

/// The ordered pages a crawl visits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageSource {
    /// An explicit, finite list of URLs.
    Urls {
        /// URLs in crawl order.
        urls: Vec<String>,
    },
    /// `base?page=N` for N = start, start + 1, ... with no known end.
    Paginated {
        /// Base URL; its existing query parameters are kept.
        base_url: String,
        /// Name of the page-number query parameter.
        #[serde(default = "default_page_param")]
        page_param: String,
        /// First page number.
        #[serde(default = "default_start_page")]
        start_page: usize,
    },
}

impl PageSource {
    /// An explicit URL list.
    #[must_use]
    pub fn urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Urls {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    /// A paginated seed starting at page 1.
    #[must_use]
    pub fn paginated(base_url: impl Into<String>) -> Self {
        Self::Paginated {
            base_url: base_url.into(),
            page_param: default_page_param(),
            start_page: default_start_page(),
        }
    }

    /// Sets the page parameter name of a paginated source.
    #[must_use]
    pub fn with_page_param(mut self, name: impl Into<String>) -> Self {
        if let Self::Paginated { page_param, .. } = &mut self {
            *page_param = name.into();
        }
        self
    }

    /// Sets the first page number of a paginated source.
    #[must_use]
    pub fn with_start_page(mut self, page: usize) -> Self {
        if let Self::Paginated { start_page, .. } = &mut self {
            *start_page = page;
        }
        self
    }

    /// Whether pages come from an open-ended pagination seed.
    #[must_use]
    pub fn is_paginated(&self) -> bool {
        matches!(self, Self::Paginated { .. })
    }

    /// Checks that there is at least one page and every URL parses.
    ///
    /// # Errors
    ///
    /// Returns `NoPages` or `InvalidUrl`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Urls { urls } => {
                if urls.is_empty() {
                    return Err(ConfigError::NoPages);
                }
                for url in urls {
                    parse_http_url(url)?;
                }
                Ok(())
            }
            Self::Paginated {
                base_url,
                page_param,
                ..
            } => {
                if page_param.trim().is_empty() {
                    return Err(ConfigError::invalid_url(base_url, "empty page parameter"));
                }
                parse_http_url(base_url).map(|_| ())
            }
        }
    }

    /// URL of the page at `index` (0-based), or `None` past the end of a list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` if the paginated base does not parse.
    pub fn url_at(&self, index: usize) -> Result<Option<String>, ConfigError> {
        match self {
            Self::Urls { urls } => Ok(urls.get(index).cloned()),
            Self::Paginated {
                base_url,
                page_param,
                start_page,
            } => {
                let mut url = parse_http_url(base_url)?;
                let page = start_page.saturating_add(index).to_string();
                let kept: Vec<(String, String)> = url
                    .query_pairs()
                    .filter(|(k, _)| k != page_param.as_str())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                url.query_pairs_mut()
                    .clear()
                    .extend_pairs(kept)
                    .append_pair(page_param, &page);
                Ok(Some(url.to_string()))
            }
        }
    }

    /// Pages left after `consumed` have been taken, or `None` when open-ended.
    #[must_use]
    pub fn remaining(&self, consumed: usize) -> Option<usize> {
        match self {
            Self::Urls { urls } => Some(urls.len().saturating_sub(consumed)),
            Self::Paginated { .. } => None,
        }
    }
}

fn parse_http_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::invalid_url(raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::invalid_url(raw, format!("unsupported scheme {other}"))),
    }
}
