//! Crawl orchestration.
//!
//! This module provides:
//! - The run status state machine and per-run state
//! - The page loop driving fetch, chunk, extract and aggregate
//! - A spawn helper streaming events from a background task

#[allow(clippy::module_inception)]
mod orchestrator;
mod state;

#[cfg(test)]
mod integration_tests;

pub use orchestrator::{CrawlHandle, CrawlOrchestrator};
pub use state::{CrawlReport, CrawlRunState, CrawlStatus};
