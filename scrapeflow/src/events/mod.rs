//! Typed progress events emitted by the crawl orchestrator.
//!
//! Events are the only interface a front-end consumes. They arrive in page
//! order and `pages_visited` never decreases across a run.

mod sink;

pub use sink::{
    ChannelProgressSink, CollectingProgressSink, FnProgressSink, LoggingProgressSink,
    NoOpProgressSink, ProgressSink,
};

use crate::orchestrator::CrawlStatus;
use serde::Serialize;
use uuid::Uuid;

/// Progress after one page has been handled (visited or skipped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    /// 1-based position of the page in the crawl order.
    pub page_number: usize,
    /// The page URL.
    pub url: String,
    /// Pages successfully fetched and processed so far.
    pub pages_visited: usize,
    /// Distinct records aggregated so far.
    pub records_so_far: usize,
    /// Records this page added to the result set.
    pub new_records: usize,
    /// Chunks on this page dropped after exhausting retries.
    pub chunks_failed: usize,
    /// The most recent error on this page, if any.
    pub last_error: Option<String>,
}

/// An event in the life of a crawl run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrawlEvent {
    /// The run passed validation and is about to fetch its first page.
    Started {
        /// Run identifier.
        run_id: Uuid,
        /// `"<provider>/<model>"`.
        provider_string: String,
        /// Configured page limit.
        page_limit: Option<usize>,
    },
    /// A page was handled.
    Page(ProgressUpdate),
    /// The run reached a terminal status.
    Finished {
        /// Terminal status.
        status: CrawlStatus,
        /// Pages successfully visited.
        pages_visited: usize,
        /// Records in the final result set.
        records: usize,
        /// Chunks dropped over the whole run.
        chunks_dropped: usize,
        /// Fatal error description for failed runs.
        error: Option<String>,
    },
}

impl CrawlEvent {
    /// Dotted event type name, as used in logs.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "crawl.started",
            Self::Page(_) => "crawl.page",
            Self::Finished { .. } => "crawl.finished",
        }
    }

    /// The progress update, for page events.
    #[must_use]
    pub fn as_progress(&self) -> Option<&ProgressUpdate> {
        match self {
            Self::Page(update) => Some(update),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = CrawlEvent::Page(ProgressUpdate {
            page_number: 1,
            url: "https://shop.test/?page=1".to_string(),
            pages_visited: 1,
            records_so_far: 4,
            new_records: 4,
            chunks_failed: 0,
            last_error: None,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "page");
        assert_eq!(json["records_so_far"], 4);
        assert_eq!(event.event_type(), "crawl.page");
    }

    #[test]
    fn test_finished_event_status() {
        let event = CrawlEvent::Finished {
            status: CrawlStatus::Cancelled,
            pages_visited: 2,
            records: 5,
            chunks_dropped: 1,
            error: None,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "cancelled");
        assert!(event.as_progress().is_none());
    }
}
