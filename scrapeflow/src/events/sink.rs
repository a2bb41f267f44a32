//! Progress sink trait and implementations.

use super::{CrawlEvent, ProgressUpdate};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, Level};

/// Receives crawl events from the orchestrator.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: CrawlEvent);

    /// Emits an event without blocking.
    ///
    /// Must never panic; delivery failures are logged and suppressed.
    fn try_emit(&self, event: CrawlEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgressSink;

#[async_trait]
impl ProgressSink for NoOpProgressSink {
    async fn emit(&self, _event: CrawlEvent) {}

    fn try_emit(&self, _event: CrawlEvent) {}
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Clone)]
pub struct LoggingProgressSink {
    level: Level,
}

impl Default for LoggingProgressSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingProgressSink {
    /// Creates a logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &CrawlEvent) {
        let event_type = event.event_type();
        match event {
            CrawlEvent::Started {
                run_id,
                provider_string,
                page_limit,
            } => {
                info!(%event_type, %run_id, provider = %provider_string, ?page_limit, "Crawl started");
            }
            CrawlEvent::Page(update) => self.log_progress(event_type, update),
            CrawlEvent::Finished {
                status,
                pages_visited,
                records,
                chunks_dropped,
                error,
            } => {
                info!(
                    %event_type,
                    %status,
                    pages_visited,
                    records,
                    chunks_dropped,
                    error = error.as_deref().unwrap_or(""),
                    "Crawl finished"
                );
            }
        }
    }

    fn log_progress(&self, event_type: &str, update: &ProgressUpdate) {
        let last_error = update.last_error.as_deref().unwrap_or("");
        if self.level == Level::DEBUG {
            debug!(
                %event_type,
                page = update.page_number,
                url = %update.url,
                pages_visited = update.pages_visited,
                records_so_far = update.records_so_far,
                new_records = update.new_records,
                chunks_failed = update.chunks_failed,
                last_error,
                "Page processed"
            );
        } else {
            info!(
                %event_type,
                page = update.page_number,
                url = %update.url,
                pages_visited = update.pages_visited,
                records_so_far = update.records_so_far,
                new_records = update.new_records,
                chunks_failed = update.chunks_failed,
                last_error,
                "Page processed"
            );
        }
    }
}

#[async_trait]
impl ProgressSink for LoggingProgressSink {
    async fn emit(&self, event: CrawlEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: CrawlEvent) {
        self.log_event(&event);
    }
}

/// Collects events in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingProgressSink {
    events: parking_lot::RwLock<Vec<CrawlEvent>>,
}

impl CollectingProgressSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<CrawlEvent> {
        self.events.read().clone()
    }

    /// Returns the page progress updates in emission order.
    #[must_use]
    pub fn progress_updates(&self) -> Vec<ProgressUpdate> {
        self.events
            .read()
            .iter()
            .filter_map(CrawlEvent::as_progress)
            .cloned()
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl ProgressSink for CollectingProgressSink {
    async fn emit(&self, event: CrawlEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: CrawlEvent) {
        self.events.write().push(event);
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    sender: mpsc::UnboundedSender<CrawlEvent>,
}

impl ChannelProgressSink {
    /// Creates a sink and the receiver it feeds.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CrawlEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: CrawlEvent) {
        if let Err(e) = self.sender.send(event) {
            debug!(event_type = e.0.event_type(), "Progress receiver dropped");
        }
    }
}

#[async_trait]
impl ProgressSink for ChannelProgressSink {
    async fn emit(&self, event: CrawlEvent) {
        self.send(event);
    }

    fn try_emit(&self, event: CrawlEvent) {
        self.send(event);
    }
}

/// Calls a closure for each event.
pub struct FnProgressSink<F> {
    callback: F,
}

impl<F> FnProgressSink<F>
where
    F: Fn(&CrawlEvent) + Send + Sync,
{
    /// Wraps a callback.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> std::fmt::Debug for FnProgressSink<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProgressSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> ProgressSink for FnProgressSink<F>
where
    F: Fn(&CrawlEvent) + Send + Sync,
{
    async fn emit(&self, event: CrawlEvent) {
        (self.callback)(&event);
    }

    fn try_emit(&self, event: CrawlEvent) {
        (self.callback)(&event);
    }
}
