//! Test doubles for crawl runs.
//!
//! This module provides:
//! - A scripted LLM transport that answers in each provider's envelope
//! - A page fetcher serving fixed pages from memory

mod fetcher;
mod transport;

pub use fetcher::StaticPageFetcher;
pub use transport::{envelope_for, ScriptStep, ScriptedTransport};
