//! Error types for scrapeflow.
//!
//! Errors are grouped by where they originate (configuration, fetching,
//! chunking, extraction) and every error can report an [`ErrorClass`] that
//! tells the orchestrator how to react: reject the run, retry, abort, or skip.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How the orchestrator reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rejected before any network call; the run never starts.
    Configuration,
    /// Retried with backoff, then the affected chunk is dropped.
    Transient,
    /// Aborts the whole run.
    Fatal,
    /// Per-page failure; the page is skipped.
    Fetch,
    /// Response did not conform to the field schema; retried, then dropped.
    Parsing,
    /// Not retried; only the affected chunk is dropped.
    Dropped,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
            Self::Fetch => write!(f, "fetch"),
            Self::Parsing => write!(f, "parsing"),
            Self::Dropped => write!(f, "dropped"),
        }
    }
}

/// The main error type for scrapeflow operations.
#[derive(Debug, Error)]
pub enum ScrapeflowError {
    /// The crawl configuration was rejected.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A page could not be fetched.
    #[error("{0}")]
    Fetch(#[from] FetchError),

    /// An extraction call failed.
    #[error("{0}")]
    Extraction(#[from] ExtractionError),

    /// The chunker could not honour its size contract.
    #[error("{0}")]
    Chunk(#[from] ChunkError),

    /// Strict completeness was requested and the page limit cannot be met.
    #[error("Crawl incomplete: visited {visited} of {required} required pages")]
    IncompleteCrawl {
        /// Pages successfully visited.
        visited: usize,
        /// Pages required by the page limit.
        required: usize,
    },

    /// The run was cancelled.
    #[error("Crawl cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScrapeflowError {
    /// Classifies the error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) | Self::Serialization(_) | Self::Io(_) => ErrorClass::Configuration,
            Self::Fetch(_) => ErrorClass::Fetch,
            Self::Extraction(e) => e.class(),
            Self::Chunk(_) | Self::IncompleteCrawl { .. } | Self::Cancelled(_) => ErrorClass::Fatal,
        }
    }

    /// Converts to a dictionary representation for event payloads.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = match self {
            Self::Extraction(e) => e.to_dict(),
            _ => HashMap::new(),
        };
        map.insert("class".to_string(), serde_json::json!(self.class()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

impl From<serde_json::Error> for ScrapeflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<csv::Error> for ScrapeflowError {
    fn from(err: csv::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised while validating a crawl configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The provider id is not in the registry.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// The model id is not offered by the provider.
    #[error("Unknown model {model} for provider {provider}")]
    UnknownModel {
        /// Provider id.
        provider: String,
        /// Requested model id.
        model: String,
    },

    /// No fields to extract were configured.
    #[error("At least one field name is required")]
    EmptyFieldList,

    /// No credential was supplied.
    #[error("Missing credential: {credential_name} is required")]
    MissingCredential {
        /// The credential label the provider expects.
        credential_name: String,
    },

    /// The credential is too short to be a real key.
    #[error("Credential {credential_name} does not look valid")]
    ImplausibleCredential {
        /// The credential label the provider expects.
        credential_name: String,
    },

    /// The CSS selector could not be parsed.
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector {
        /// The offending selector.
        selector: String,
        /// Parser message.
        reason: String,
    },

    /// A URL could not be parsed.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// The page source has no pages.
    #[error("No pages to crawl")]
    NoPages,

    /// A page limit of zero was requested.
    #[error("Page limit must be at least 1")]
    ZeroPageLimit,

    /// A tunable setting is out of range.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

impl ConfigError {
    /// Creates an invalid selector error.
    #[must_use]
    pub fn invalid_selector(selector: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidSelector {
            selector: selector.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an invalid URL error.
    #[must_use]
    pub fn invalid_url(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised by a page fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The fetch did not complete within its timeout.
    #[error("Fetch timed out after {timeout:?}: {url}")]
    Timeout {
        /// The page URL.
        url: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The page could not be retrieved.
    #[error("Fetch failed for {url}: {reason}")]
    Unreachable {
        /// The page URL.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// The selector matched nothing on the page.
    #[error("Selector '{selector}' matched nothing on {url}")]
    Empty {
        /// The page URL.
        url: String,
        /// The selector that matched nothing.
        selector: String,
    },
}

impl FetchError {
    /// Creates an unreachable error.
    #[must_use]
    pub fn unreachable(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Unreachable {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an empty-match error.
    #[must_use]
    pub fn empty(url: impl Into<String>, selector: impl Into<String>) -> Self {
        Self::Empty {
            url: url.into(),
            selector: selector.into(),
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// An empty match is a property of the page, not of the network.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unreachable { .. })
    }
}

/// Errors raised by the extraction client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// The provider rejected the credential.
    #[error("Invalid credential for provider {provider} (status {status})")]
    InvalidCredential {
        /// Provider id.
        provider: String,
        /// HTTP status returned.
        status: u16,
    },

    /// The provider is rate limiting requests.
    #[error("Rate limited by provider{}", retry_after.map(|d| format!(" (retry after {d:?})")).unwrap_or_default())]
    RateLimited {
        /// Server-suggested wait, if any.
        retry_after: Option<Duration>,
    },

    /// The provider returned an error status.
    #[error("Provider error {code}: {message}")]
    ProviderError {
        /// HTTP status code.
        code: u16,
        /// Response excerpt.
        message: String,
    },

    /// The provider rejected the request or schema definition.
    #[error("Provider rejected request schema ({code}): {message}")]
    SchemaRejected {
        /// HTTP status code.
        code: u16,
        /// Response excerpt.
        message: String,
    },

    /// The response could not be parsed against the field schema.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The request never produced a response (timeout, connection failure).
    #[error("Transport error: {reason}")]
    Transport {
        /// What went wrong.
        reason: String,
        /// Whether the per-call timeout elapsed.
        timed_out: bool,
    },

    /// The request could not be built.
    #[error("Request build error: {0}")]
    Request(String),
}

impl ExtractionError {
    /// Creates a malformed response error.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse(reason.into())
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport(reason: impl fmt::Display, timed_out: bool) -> Self {
        Self::Transport {
            reason: reason.to_string(),
            timed_out,
        }
    }

    /// Classifies the error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidCredential { .. } | Self::SchemaRejected { .. } | Self::Request(_) => {
                ErrorClass::Fatal
            }
            Self::MalformedResponse(_) => ErrorClass::Parsing,
            Self::RateLimited { .. } | Self::Transport { .. } => ErrorClass::Transient,
            Self::ProviderError { code, .. } if is_transient_status(*code) => ErrorClass::Transient,
            Self::ProviderError { .. } => ErrorClass::Dropped,
        }
    }

    /// Whether the chunk should be attempted again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient | ErrorClass::Parsing)
    }

    /// Whether the whole run must abort.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Server-suggested wait before the next attempt.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// The originating status code, if the provider answered.
    #[must_use]
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::InvalidCredential { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::ProviderError { code, .. } | Self::SchemaRejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        let kind = match self {
            Self::InvalidCredential { .. } => "InvalidCredential",
            Self::RateLimited { .. } => "RateLimited",
            Self::ProviderError { .. } => "ProviderError",
            Self::SchemaRejected { .. } => "SchemaRejected",
            Self::MalformedResponse(_) => "MalformedResponse",
            Self::Transport { .. } => "Transport",
            Self::Request(_) => "Request",
        };
        map.insert("type".to_string(), serde_json::json!(kind));
        if let Some(code) = self.code() {
            map.insert("code".to_string(), serde_json::json!(code));
        }
        if let Some(wait) = self.retry_after() {
            map.insert("retry_after_ms".to_string(), serde_json::json!(wait.as_millis() as u64));
        }
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Whether an HTTP status from a provider is worth retrying.
#[must_use]
pub fn is_transient_status(code: u16) -> bool {
    code == 408 || code == 429 || (500..600).contains(&code)
}

/// Errors raised by the chunker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// The maximum chunk size cannot hold the widest UTF-8 character.
    #[error("Maximum chunk size {max} is below the minimum of {min} bytes")]
    MaxSizeTooSmall {
        /// Requested maximum.
        max: usize,
        /// Smallest usable maximum.
        min: usize,
    },
}

/// Result alias for scrapeflow operations.
pub type Result<T> = std::result::Result<T, ScrapeflowError>;
