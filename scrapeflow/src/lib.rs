//! # Scrapeflow
//!
//! LLM-driven structured extraction from CSS-selected web content.
//!
//! A crawl fetches pages, keeps the content matched by a CSS selector,
//! splits it into bounded chunks and asks a large-language-model to return
//! one record per item with a fixed set of fields. Records are deduplicated
//! across pages and streamed progress events report every page.
//!
//! - **Provider registry**: interchangeable LLM backends behind one request shape
//! - **Page sources**: seed lists or `?page=N` pagination
//! - **Retry and backoff**: separate policies for fetches and extraction calls
//! - **Cooperative cancellation**: observed at page and chunk-batch boundaries
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scrapeflow::prelude::*;
//!
//! let config = CrawlConfig::new(
//!     PageSource::paginated("https://www.example.com/cars"),
//!     "[class*='listing']",
//!     FieldSet::parse("title, price, location")?,
//!     "openai",
//!     "gpt-4o-mini",
//!     Credential::new(std::env::var("OPENAI_API_KEY")?),
//! )
//! .with_page_limit(5);
//!
//! let orchestrator = CrawlOrchestrator::http(&config.settings)?;
//! let report = orchestrator.run(&config, &CancellationToken::new()).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod aggregate;
pub mod cancellation;
pub mod chunker;
pub mod config;
pub mod errors;
pub mod events;
pub mod export;
pub mod extraction;
pub mod fetch;
pub mod observability;
pub mod orchestrator;
pub mod providers;
pub mod retry;
pub mod selectors;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregate::{merge, ResultAggregator};
    pub use crate::cancellation::CancellationToken;
    pub use crate::chunker::{chunk, Chunk};
    pub use crate::config::{CrawlConfig, CrawlSettings, Credential};
    pub use crate::errors::{
        ConfigError, ErrorClass, ExtractionError, FetchError, ScrapeflowError,
    };
    pub use crate::events::{
        ChannelProgressSink, CollectingProgressSink, CrawlEvent, LoggingProgressSink,
        NoOpProgressSink, ProgressSink, ProgressUpdate,
    };
    pub use crate::export::{write_records, TableFormat};
    pub use crate::extraction::{ExtractionClient, ExtractionRecord, FieldSet, LlmTransport};
    pub use crate::fetch::{PageContent, PageFetcher, PageSource};
    pub use crate::orchestrator::{CrawlHandle, CrawlOrchestrator, CrawlReport, CrawlStatus};
    pub use crate::providers::{ProviderRegistry, ResolvedModel};
    pub use crate::retry::{BackoffStrategy, JitterStrategy, RetryConfig};
    pub use crate::selectors::flexible_selector;
}
