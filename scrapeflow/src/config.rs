//! Crawl configuration and tunable settings.

use crate::chunker::{DEFAULT_MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::errors::{ConfigError, ScrapeflowError};
use crate::extraction::{FieldSet, DEFAULT_EXTRACTION_TIMEOUT_SECS};
use crate::fetch::PageSource;
use crate::providers::{validate_credential_format, ProviderRegistry, ResolvedModel};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// An API credential. Never printed, logged or serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a credential value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    /// The raw value, for building request headers.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether no value was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Tunables for a crawl run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// Maximum chunk size in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    /// Extraction calls in flight per page.
    #[serde(default = "default_chunk_concurrency")]
    pub chunk_concurrency: usize,
    /// Page fetch timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: f64,
    /// Per-call extraction timeout in seconds.
    #[serde(default = "default_extraction_timeout")]
    pub extraction_timeout_seconds: f64,
    /// Retry policy for extraction calls.
    #[serde(default)]
    pub extraction_retry: RetryConfig,
    /// Retry policy for page fetches.
    #[serde(default = "default_fetch_retry")]
    pub fetch_retry: RetryConfig,
    /// Pause between page fetches in milliseconds.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    /// Consecutive skipped pages that end a paginated crawl.
    #[serde(default = "default_max_consecutive_fetch_failures")]
    pub max_consecutive_fetch_failures: usize,
    /// End a paginated crawl at the first page that adds no new records.
    #[serde(default = "default_stop_on_empty_page")]
    pub stop_on_empty_page: bool,
    /// Drop records with any null field.
    #[serde(default)]
    pub drop_incomplete_records: bool,
}

/// Longest accepted fetch or extraction timeout, in seconds.
pub const MAX_TIMEOUT_SECS: f64 = 3600.0;

fn default_max_chunk_size() -> usize {
    DEFAULT_MAX_CHUNK_SIZE
}

fn default_chunk_concurrency() -> usize {
    3
}

fn default_fetch_timeout() -> f64 {
    30.0
}

#[allow(clippy::cast_precision_loss)]
fn default_extraction_timeout() -> f64 {
    DEFAULT_EXTRACTION_TIMEOUT_SECS as f64
}

fn default_fetch_retry() -> RetryConfig {
    RetryConfig::default().with_max_attempts(2)
}

fn default_page_delay_ms() -> u64 {
    2000
}

fn default_max_consecutive_fetch_failures() -> usize {
    3
}

fn default_stop_on_empty_page() -> bool {
    true
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            chunk_concurrency: default_chunk_concurrency(),
            fetch_timeout_seconds: default_fetch_timeout(),
            extraction_timeout_seconds: default_extraction_timeout(),
            extraction_retry: RetryConfig::default(),
            fetch_retry: default_fetch_retry(),
            page_delay_ms: default_page_delay_ms(),
            max_consecutive_fetch_failures: default_max_consecutive_fetch_failures(),
            stop_on_empty_page: default_stop_on_empty_page(),
            drop_incomplete_records: false,
        }
    }
}

impl CrawlSettings {
    /// Creates settings with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses settings from JSON; absent fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` for invalid JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ScrapeflowError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Serialization` for invalid JSON.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ScrapeflowError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Sets the maximum chunk size.
    #[must_use]
    pub fn with_max_chunk_size(mut self, bytes: usize) -> Self {
        self.max_chunk_size = bytes;
        self
    }

    /// Sets the chunk concurrency.
    #[must_use]
    pub fn with_chunk_concurrency(mut self, workers: usize) -> Self {
        self.chunk_concurrency = workers;
        self
    }

    /// Sets the page fetch timeout.
    #[must_use]
    pub fn with_fetch_timeout(mut self, seconds: f64) -> Self {
        self.fetch_timeout_seconds = seconds;
        self
    }

    /// Sets the extraction call timeout.
    #[must_use]
    pub fn with_extraction_timeout(mut self, seconds: f64) -> Self {
        self.extraction_timeout_seconds = seconds;
        self
    }

    /// Sets the extraction retry policy.
    #[must_use]
    pub fn with_extraction_retry(mut self, retry: RetryConfig) -> Self {
        self.extraction_retry = retry;
        self
    }

    /// Sets the fetch retry policy.
    #[must_use]
    pub fn with_fetch_retry(mut self, retry: RetryConfig) -> Self {
        self.fetch_retry = retry;
        self
    }

    /// Sets the pause between pages.
    #[must_use]
    pub fn with_page_delay_ms(mut self, delay: u64) -> Self {
        self.page_delay_ms = delay;
        self
    }

    /// Sets the consecutive fetch failure ceiling.
    #[must_use]
    pub fn with_max_consecutive_fetch_failures(mut self, failures: usize) -> Self {
        self.max_consecutive_fetch_failures = failures;
        self
    }

    /// Sets whether an unproductive page ends a paginated crawl.
    #[must_use]
    pub fn with_stop_on_empty_page(mut self, stop: bool) -> Self {
        self.stop_on_empty_page = stop;
        self
    }

    /// Sets whether records with null fields are dropped.
    #[must_use]
    pub fn with_drop_incomplete_records(mut self, drop: bool) -> Self {
        self.drop_incomplete_records = drop;
        self
    }

    /// Page fetch timeout.
    ///
    /// Out-of-range values are clamped; `validate` rejects them.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        timeout_from_secs(self.fetch_timeout_seconds)
    }

    /// Extraction call timeout.
    #[must_use]
    pub fn extraction_timeout(&self) -> Duration {
        timeout_from_secs(self.extraction_timeout_seconds)
    }

    /// Pause between pages.
    #[must_use]
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::InvalidSettings(msg.to_string()));

        if self.max_chunk_size < MIN_CHUNK_SIZE {
            return Err(ConfigError::InvalidSettings(format!(
                "max_chunk_size must be at least {MIN_CHUNK_SIZE} bytes"
            )));
        }
        if self.chunk_concurrency == 0 {
            return invalid("chunk_concurrency must be at least 1");
        }
        if !timeout_in_range(self.fetch_timeout_seconds) {
            return invalid("fetch_timeout_seconds must be positive and at most 3600");
        }
        if !timeout_in_range(self.extraction_timeout_seconds) {
            return invalid("extraction_timeout_seconds must be positive and at most 3600");
        }
        if self.extraction_retry.max_attempts == 0 {
            return invalid("extraction_retry.max_attempts must be at least 1");
        }
        if self.fetch_retry.max_attempts == 0 {
            return invalid("fetch_retry.max_attempts must be at least 1");
        }
        if self.max_consecutive_fetch_failures == 0 {
            return invalid("max_consecutive_fetch_failures must be at least 1");
        }
        Ok(())
    }
}

fn timeout_in_range(seconds: f64) -> bool {
    seconds > 0.0 && seconds <= MAX_TIMEOUT_SECS
}

fn timeout_from_secs(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.min(MAX_TIMEOUT_SECS)).unwrap_or(Duration::ZERO)
}

/// Everything a crawl run needs. Immutable once the run starts.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Pages to visit.
    pub source: PageSource,
    /// CSS selector scoping each page.
    pub selector: String,
    /// Fields to extract.
    pub fields: FieldSet,
    /// Provider id.
    pub provider: String,
    /// Model id.
    pub model: String,
    /// Provider credential.
    pub credential: Credential,
    /// Maximum pages to visit.
    pub page_limit: Option<usize>,
    /// Replaces the default system prompt.
    pub system_prompt: Option<String>,
    /// Fail unless exactly `page_limit` pages are visited.
    pub strict: bool,
    /// Tunables.
    pub settings: CrawlSettings,
}

impl CrawlConfig {
    /// Creates a configuration with no page limit and default settings.
    #[must_use]
    pub fn new(
        source: PageSource,
        selector: impl Into<String>,
        fields: FieldSet,
        provider: impl Into<String>,
        model: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            source,
            selector: selector.into(),
            fields,
            provider: provider.into(),
            model: model.into(),
            credential,
            page_limit: None,
            system_prompt: None,
            strict: false,
            settings: CrawlSettings::default(),
        }
    }

    /// Sets the page limit.
    #[must_use]
    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = Some(limit);
        self
    }

    /// Sets a custom system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Requires the page limit to be met exactly.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Replaces the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: CrawlSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Validates the configuration and resolves the provider model.
    ///
    /// Runs before any network call.
    ///
    /// # Errors
    ///
    /// The first [`ConfigError`] found.
    pub fn validate(&self, registry: &ProviderRegistry) -> Result<ResolvedModel, ConfigError> {
        let resolved = registry.resolve(&self.provider, &self.model)?;

        if self.fields.is_empty() {
            return Err(ConfigError::EmptyFieldList);
        }
        let credential_name = resolved.provider.credential_name.clone();
        if self.credential.is_empty() {
            return Err(ConfigError::MissingCredential { credential_name });
        }
        if !validate_credential_format(self.credential.expose()) {
            return Err(ConfigError::ImplausibleCredential { credential_name });
        }

        crate::selectors::validate_selector(&self.selector)?;
        self.source.validate()?;
        if self.page_limit == Some(0) {
            return Err(ConfigError::ZeroPageLimit);
        }
        self.settings.validate()?;

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn config() -> CrawlConfig {
        CrawlConfig::new(
            PageSource::paginated("https://www.oto.com/mobil-bekas/jakarta-pusat"),
            "[class^='list-card__item']",
            FieldSet::parse("title, price").unwrap(),
            "gemini",
            "gemini-2.5-flash",
            Credential::new("AIzaSyBxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"),
        )
    }

    #[test]
    fn test_credential_redacted() {
        let credential = Credential::new("  sk-secret-value-123  ");
        assert_eq!(credential.expose(), "sk-secret-value-123");
        assert_eq!(format!("{credential}"), "[REDACTED]");
        assert!(!format!("{credential:?}").contains("secret"));
        assert!(!format!("{:?}", config()).contains("AIzaSy"));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = CrawlSettings::default();
        assert_eq!(settings.max_chunk_size, 8000);
        assert_eq!(settings.chunk_concurrency, 3);
        assert_eq!(settings.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(settings.extraction_timeout(), Duration::from_secs(60));
        assert_eq!(settings.extraction_retry.max_attempts, 3);
        assert_eq!(settings.fetch_retry.max_attempts, 2);
        assert_eq!(settings.page_delay(), Duration::from_secs(2));
        assert!(settings.stop_on_empty_page);
        assert!(!settings.drop_incomplete_records);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_from_partial_json() {
        let settings =
            CrawlSettings::from_json_str(r#"{"chunk_concurrency": 5, "fetch_retry": {"max_attempts": 4}}"#)
                .unwrap();
        assert_eq!(settings.chunk_concurrency, 5);
        assert_eq!(settings.fetch_retry.max_attempts, 4);
        assert_eq!(settings.max_chunk_size, 8000);
        assert_eq!(settings.fetch_retry.base_delay_ms, 1000);
    }

    #[test]
    fn test_settings_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"page_delay_ms": 0, "stop_on_empty_page": false}}"#).unwrap();

        let settings = CrawlSettings::from_json_file(file.path()).unwrap();
        assert_eq!(settings.page_delay_ms, 0);
        assert!(!settings.stop_on_empty_page);

        assert!(matches!(
            CrawlSettings::from_json_file("/nonexistent/settings.json"),
            Err(ScrapeflowError::Io(_))
        ));
        assert!(matches!(
            CrawlSettings::from_json_str("{not json"),
            Err(ScrapeflowError::Serialization(_))
        ));
    }

    #[test]
    fn test_settings_validate() {
        assert!(CrawlSettings::new().with_chunk_concurrency(0).validate().is_err());
        assert!(CrawlSettings::new().with_fetch_timeout(0.0).validate().is_err());
        assert!(CrawlSettings::new()
            .with_extraction_retry(RetryConfig::new().with_max_attempts(0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_settings_reject_tiny_chunk_size() {
        let err = CrawlSettings::new().with_max_chunk_size(2).validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidSettings("max_chunk_size must be at least 4 bytes".to_string())
        );
        assert!(CrawlSettings::new().with_max_chunk_size(MIN_CHUNK_SIZE).validate().is_ok());
    }

    #[test]
    fn test_huge_timeouts_rejected_and_clamped() {
        let settings = CrawlSettings::new()
            .with_fetch_timeout(1e20)
            .with_extraction_timeout(-1.0);

        assert!(settings.validate().is_err());
        assert!(CrawlSettings::new().with_extraction_timeout(f64::INFINITY).validate().is_err());
        assert!(CrawlSettings::new().with_fetch_timeout(f64::NAN).validate().is_err());
        assert_eq!(settings.fetch_timeout(), Duration::from_secs(3600));
        assert_eq!(settings.extraction_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_validate_resolves_model() {
        let resolved = config().validate(&ProviderRegistry::builtin()).unwrap();
        assert_eq!(resolved.provider_string(), "gemini/gemini-2.5-flash");
    }

    #[test]
    fn test_validate_rejections() {
        let registry = ProviderRegistry::builtin();

        let mut c = config();
        c.provider = "nonexistent".to_string();
        assert_eq!(
            c.validate(&registry).unwrap_err(),
            ConfigError::UnknownProvider("nonexistent".to_string())
        );

        let mut c = config();
        c.credential = Credential::new("   ");
        assert_eq!(
            c.validate(&registry).unwrap_err(),
            ConfigError::MissingCredential {
                credential_name: "GEMINI_API_KEY".to_string()
            }
        );

        let mut c = config();
        c.credential = Credential::new("short");
        assert!(matches!(
            c.validate(&registry),
            Err(ConfigError::ImplausibleCredential { .. })
        ));

        assert_eq!(
            config().with_page_limit(0).validate(&registry).unwrap_err(),
            ConfigError::ZeroPageLimit
        );

        let mut c = config();
        c.source = PageSource::urls(Vec::<String>::new());
        assert_eq!(c.validate(&registry).unwrap_err(), ConfigError::NoPages);

        let mut c = config();
        c.selector = "   ".to_string();
        assert!(matches!(
            c.validate(&registry),
            Err(ConfigError::InvalidSelector { .. })
        ));
    }
}
