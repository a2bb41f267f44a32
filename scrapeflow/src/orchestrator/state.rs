//! Crawl run status and the mutable state of one run.

use crate::aggregate::ResultAggregator;
use crate::errors::ScrapeflowError;
use crate::extraction::ExtractionRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;
use uuid::Uuid;

/// Lifecycle status of a crawl run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    /// Created, not yet validated.
    #[default]
    Pending,
    /// Fetching and extracting pages.
    Running,
    /// Page budget exhausted or no further pages.
    Completed,
    /// Aborted by a fatal error.
    Failed,
    /// Stopped by a cancellation request.
    Cancelled,
}

impl CrawlStatus {
    /// Whether the run has ended.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine allows moving to `next`.
    ///
    /// A run may fail straight from `Pending` when validation rejects it.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Failed)
                | (Self::Running, Self::Completed | Self::Failed | Self::Cancelled)
        )
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Progress of one run. Owned and mutated by the orchestrator alone.
#[derive(Debug, Clone, Default)]
pub struct CrawlRunState {
    /// Pages fetched and processed.
    pub pages_visited: usize,
    /// Pages left in the budget; `None` without a page limit.
    pub pages_remaining: Option<usize>,
    /// Records aggregated so far.
    pub records: ResultAggregator,
    /// Errors seen: skipped pages plus dropped chunks.
    pub error_count: usize,
    /// Current status.
    pub status: CrawlStatus,
    /// Pages skipped after a fetch error.
    pub pages_skipped: usize,
    /// Chunks dropped after their retries ran out.
    pub chunks_dropped: usize,
    /// Most recent error.
    pub last_error: Option<String>,
}

impl CrawlRunState {
    /// Creates a pending state with the given page budget.
    #[must_use]
    pub fn new(page_limit: Option<usize>) -> Self {
        Self {
            pages_remaining: page_limit,
            ..Self::default()
        }
    }

    /// Moves to `next` if the state machine allows it.
    pub fn transition(&mut self, next: CrawlStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            warn!(from = %self.status, to = %next, "Ignoring invalid crawl status transition");
            false
        }
    }

    /// Whether the page budget is used up.
    #[must_use]
    pub fn budget_exhausted(&self) -> bool {
        self.pages_remaining == Some(0)
    }

    /// Counts a processed page against the budget.
    pub fn record_visit(&mut self) {
        self.pages_visited += 1;
        if let Some(remaining) = self.pages_remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }

    /// Counts a skipped page. Skips do not consume the budget.
    pub fn record_skip(&mut self, error: impl fmt::Display) {
        self.pages_skipped += 1;
        self.record_error(error);
    }

    /// Counts a dropped chunk.
    pub fn record_dropped_chunk(&mut self, error: impl fmt::Display) {
        self.chunks_dropped += 1;
        self.record_error(error);
    }

    fn record_error(&mut self, error: impl fmt::Display) {
        self.error_count += 1;
        self.last_error = Some(error.to_string());
    }
}

/// Final outcome of a crawl run.
#[derive(Debug)]
pub struct CrawlReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Terminal status.
    pub status: CrawlStatus,
    /// Aggregated records. Empty for failed runs; partial for cancelled ones.
    pub records: Vec<ExtractionRecord>,
    /// Pages fetched and processed.
    pub pages_visited: usize,
    /// Pages skipped after a fetch error.
    pub pages_skipped: usize,
    /// Chunks dropped after their retries ran out.
    pub chunks_dropped: usize,
    /// Skipped pages plus dropped chunks.
    pub error_count: usize,
    /// The fatal error of a failed run.
    pub error: Option<ScrapeflowError>,
}

impl CrawlReport {
    pub(crate) fn from_state(run_id: Uuid, state: CrawlRunState, error: Option<ScrapeflowError>) -> Self {
        let records = if state.status == CrawlStatus::Failed {
            Vec::new()
        } else {
            state.records.into_records()
        };
        Self {
            run_id,
            status: state.status,
            records,
            pages_visited: state.pages_visited,
            pages_skipped: state.pages_skipped,
            chunks_dropped: state.chunks_dropped,
            error_count: state.error_count,
            error,
        }
    }

    /// Whether the run completed, possibly with dropped chunks.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == CrawlStatus::Completed
    }

    /// Whether some pages or chunks were lost along the way.
    #[must_use]
    pub fn has_losses(&self) -> bool {
        self.pages_skipped > 0 || self.chunks_dropped > 0
    }
}
