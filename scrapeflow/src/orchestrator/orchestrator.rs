//! The crawl control loop.

use super::state::{CrawlReport, CrawlRunState, CrawlStatus};
use crate::cancellation::CancellationToken;
use crate::chunker;
use crate::config::CrawlConfig;
use crate::errors::{FetchError, ScrapeflowError};
use crate::events::{ChannelProgressSink, CrawlEvent, NoOpProgressSink, ProgressSink, ProgressUpdate};
use crate::extraction::{ExtractionClient, ExtractionRecord, LlmTransport};
use crate::fetch::{PageContent, PageFetcher};
use crate::providers::ProviderRegistry;
use crate::retry::{with_retry_cancellable, RetryClass};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// How the page loop ended.
enum LoopEnd {
    Completed,
    Cancelled(String),
    Failed(ScrapeflowError),
}

/// What one page contributed.
#[derive(Debug, Default)]
struct PageOutcome {
    records: Vec<ExtractionRecord>,
    chunks_failed: usize,
    last_error: Option<String>,
}

/// Runs crawls: fetch, chunk, extract, aggregate, page after page.
#[derive(Clone)]
pub struct CrawlOrchestrator {
    registry: Arc<ProviderRegistry>,
    fetcher: Arc<dyn PageFetcher>,
    transport: Arc<dyn LlmTransport>,
    sink: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for CrawlOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlOrchestrator")
            .field("providers", &self.registry.iter().count())
            .finish_non_exhaustive()
    }
}

impl CrawlOrchestrator {
    /// Creates an orchestrator over the built-in registry with no progress sink.
    #[must_use]
    pub fn new(fetcher: Arc<dyn PageFetcher>, transport: Arc<dyn LlmTransport>) -> Self {
        Self {
            registry: ProviderRegistry::builtin(),
            fetcher,
            transport,
            sink: Arc::new(NoOpProgressSink),
        }
    }

    /// Creates an orchestrator that fetches pages and calls providers over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if either HTTP client cannot be built.
    #[cfg(feature = "http")]
    pub fn http(settings: &crate::config::CrawlSettings) -> Result<Self, ScrapeflowError> {
        use crate::extraction::HttpTransport;
        use crate::fetch::{HttpFetcherConfig, HttpPageFetcher};

        let fetcher = HttpPageFetcher::new(HttpFetcherConfig::default())?;
        let transport = HttpTransport::new(settings.extraction_timeout())?;
        Ok(Self::new(Arc::new(fetcher), Arc::new(transport)))
    }

    /// Uses another provider registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Sends progress events to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The registry configurations are validated against.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Runs a crawl to its terminal status.
    ///
    /// Never returns an error: configuration and fatal provider errors end
    /// the run as `Failed` and are carried in the report.
    pub async fn run(&self, config: &CrawlConfig, cancel: &CancellationToken) -> CrawlReport {
        let run_id = Uuid::now_v7();
        let span = info_span!(
            "crawl",
            %run_id,
            provider = %config.provider,
            model = %config.model,
        );
        self.execute(run_id, config, cancel).instrument(span).await
    }

    /// Runs a crawl on a tokio task, streaming its events through a channel.
    ///
    /// The spawned run reports to the returned channel instead of the
    /// configured sink.
    #[must_use]
    pub fn spawn(&self, config: CrawlConfig) -> CrawlHandle {
        let (sink, events) = ChannelProgressSink::new();
        let orchestrator = self.clone().with_sink(Arc::new(sink));
        let cancel = Arc::new(CancellationToken::new());
        let token = Arc::clone(&cancel);

        let join = tokio::spawn(async move { orchestrator.run(&config, &token).await });
        CrawlHandle {
            events,
            cancel,
            join,
        }
    }

    async fn execute(
        &self,
        run_id: Uuid,
        config: &CrawlConfig,
        cancel: &CancellationToken,
    ) -> CrawlReport {
        let mut state = CrawlRunState::new(config.page_limit);

        let model = match config.validate(&self.registry) {
            Ok(model) => model,
            Err(e) => {
                warn!(error = %e, "Crawl configuration rejected");
                return self.finish(run_id, state, LoopEnd::Failed(e.into())).await;
            }
        };

        state.transition(CrawlStatus::Running);
        let provider_string = model.provider_string();
        info!(
            provider = %provider_string,
            page_limit = ?config.page_limit,
            fields = config.fields.len(),
            "Crawl started"
        );
        self.sink
            .emit(CrawlEvent::Started {
                run_id,
                provider_string,
                page_limit: config.page_limit,
            })
            .await;

        let settings = &config.settings;
        let client = ExtractionClient::new(model, config.credential.clone(), Arc::clone(&self.transport))
            .with_retry(settings.extraction_retry.clone())
            .with_timeout(settings.extraction_timeout());

        let end = self.crawl_pages(&mut state, config, &client, cancel).await;
        self.finish(run_id, state, end).await
    }

    async fn crawl_pages(
        &self,
        state: &mut CrawlRunState,
        config: &CrawlConfig,
        client: &ExtractionClient,
        cancel: &CancellationToken,
    ) -> LoopEnd {
        let settings = &config.settings;
        let paginated = config.source.is_paginated();
        let mut index = 0;
        let mut consecutive_failures = 0;

        loop {
            if state.budget_exhausted() {
                debug!(pages_visited = state.pages_visited, "Page limit reached");
                return LoopEnd::Completed;
            }
            if cancel.is_cancelled() {
                return cancelled(cancel);
            }
            if let Some(error) = unreachable_limit(state, config, index) {
                return LoopEnd::Failed(error);
            }

            let url = match config.source.url_at(index) {
                Ok(Some(url)) => url,
                Ok(None) => break,
                Err(e) => return LoopEnd::Failed(e.into()),
            };

            if index > 0 && !settings.page_delay().is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(settings.page_delay()) => {}
                    () = cancel.cancelled() => return cancelled(cancel),
                }
            }
            index += 1;

            let page = match self.fetch_page(&url, config, cancel).await {
                Ok(page) => page,
                Err(_) if cancel.is_cancelled() => return cancelled(cancel),
                Err(e) => {
                    warn!(url = %url, error = %e, "Skipping page");
                    state.record_skip(&e);
                    consecutive_failures += 1;
                    self.emit_progress(state, index, &url, &PageOutcome::default(), 0, Some(e.to_string()))
                        .await;

                    if paginated
                        && (matches!(e, FetchError::Empty { .. })
                            || consecutive_failures >= settings.max_consecutive_fetch_failures)
                    {
                        info!(url = %url, "No further pages");
                        break;
                    }
                    continue;
                }
            };
            consecutive_failures = 0;

            let mut outcome = match self.process_page(state, &page, config, client, cancel).await {
                Ok(outcome) => outcome,
                Err(e) => return LoopEnd::Failed(e),
            };

            state.record_visit();
            let new_records = state.records.extend(std::mem::take(&mut outcome.records));
            info!(
                url = %url,
                pages_visited = state.pages_visited,
                new_records,
                records = state.records.len(),
                chunks_failed = outcome.chunks_failed,
                "Page processed"
            );
            let last_error = outcome.last_error.clone();
            self.emit_progress(state, index, &url, &outcome, new_records, last_error)
                .await;

            if paginated && settings.stop_on_empty_page && new_records == 0 {
                info!(url = %url, "Page added no records, stopping");
                break;
            }
        }

        if config.strict {
            if let Some(limit) = config.page_limit.filter(|limit| state.pages_visited < *limit) {
                return LoopEnd::Failed(ScrapeflowError::IncompleteCrawl {
                    visited: state.pages_visited,
                    required: limit,
                });
            }
        }
        LoopEnd::Completed
    }

    async fn fetch_page(
        &self,
        url: &str,
        config: &CrawlConfig,
        cancel: &CancellationToken,
    ) -> Result<PageContent, FetchError> {
        let timeout = config.settings.fetch_timeout();
        let fetcher = &self.fetcher;
        let selector = config.selector.as_str();

        with_retry_cancellable(
            &config.settings.fetch_retry,
            url,
            cancel,
            move |attempt| {
                debug!(url, attempt, "Fetching page");
                fetcher.fetch(url, selector, timeout)
            },
            |e: &FetchError| {
                if e.is_retryable() {
                    RetryClass::Retry { after: None }
                } else {
                    RetryClass::Stop
                }
            },
        )
        .await
        .result
    }

    /// Chunks a page and extracts every chunk, `chunk_concurrency` at a time.
    ///
    /// Results are kept in chunk order. A fatal extraction error aborts the
    /// page; any other failure drops only its chunk.
    async fn process_page(
        &self,
        state: &mut CrawlRunState,
        page: &PageContent,
        config: &CrawlConfig,
        client: &ExtractionClient,
        cancel: &CancellationToken,
    ) -> Result<PageOutcome, ScrapeflowError> {
        let settings = &config.settings;
        let chunks: Vec<_> = chunker::chunk(page, settings.max_chunk_size)?
            .into_iter()
            .filter(|c| !c.is_blank())
            .collect();
        debug!(url = %page.url, chunks = chunks.len(), elements = page.element_count, "Page chunked");

        let mut outcome = PageOutcome::default();
        let system_prompt = config.system_prompt.as_deref();

        for batch in chunks.chunks(settings.chunk_concurrency.max(1)) {
            if cancel.is_cancelled() {
                debug!(url = %page.url, "Cancelled before next chunk batch");
                break;
            }

            let results = join_all(
                batch
                    .iter()
                    .map(|chunk| client.extract(chunk, &config.fields, system_prompt)),
            )
            .await;

            for (chunk, result) in batch.iter().zip(results) {
                match result {
                    Ok(records) => outcome.records.extend(
                        records
                            .into_iter()
                            .filter(|r| !settings.drop_incomplete_records || r.is_complete()),
                    ),
                    Err(e) if e.is_fatal() => {
                        warn!(chunk = chunk.index, error = %e, "Fatal extraction error");
                        return Err(e.into());
                    }
                    Err(e) => {
                        state.record_dropped_chunk(&e);
                        outcome.chunks_failed += 1;
                        outcome.last_error = Some(e.to_string());
                    }
                }
            }
        }
        Ok(outcome)
    }

    async fn emit_progress(
        &self,
        state: &CrawlRunState,
        page_number: usize,
        url: &str,
        outcome: &PageOutcome,
        new_records: usize,
        last_error: Option<String>,
    ) {
        self.sink
            .emit(CrawlEvent::Page(ProgressUpdate {
                page_number,
                url: url.to_string(),
                pages_visited: state.pages_visited,
                records_so_far: state.records.len(),
                new_records,
                chunks_failed: outcome.chunks_failed,
                last_error,
            }))
            .await;
    }

    async fn finish(&self, run_id: Uuid, mut state: CrawlRunState, end: LoopEnd) -> CrawlReport {
        let error = match end {
            LoopEnd::Completed => {
                state.transition(CrawlStatus::Completed);
                None
            }
            LoopEnd::Cancelled(reason) => {
                state.transition(CrawlStatus::Cancelled);
                Some(ScrapeflowError::Cancelled(reason))
            }
            LoopEnd::Failed(e) => {
                state.transition(CrawlStatus::Failed);
                Some(e)
            }
        };

        match &error {
            Some(e) if state.status == CrawlStatus::Failed => warn!(status = %state.status, class = %e.class(), error = %e, "Crawl ended"),
            _ => info!(
                status = %state.status,
                pages_visited = state.pages_visited,
                pages_skipped = state.pages_skipped,
                records = state.records.len(),
                chunks_dropped = state.chunks_dropped,
                "Crawl ended"
            ),
        }

        let report = CrawlReport::from_state(run_id, state, error);
        self.sink
            .emit(CrawlEvent::Finished {
                status: report.status,
                pages_visited: report.pages_visited,
                records: report.records.len(),
                chunks_dropped: report.chunks_dropped,
                error: report.error.as_ref().map(ToString::to_string),
            })
            .await;
        report
    }
}

fn cancelled(cancel: &CancellationToken) -> LoopEnd {
    LoopEnd::Cancelled(cancel.reason().unwrap_or_else(|| "cancelled".to_string()))
}

/// Strict mode: fails once the seeds left cannot reach the page limit.
fn unreachable_limit(state: &CrawlRunState, config: &CrawlConfig, index: usize) -> Option<ScrapeflowError> {
    if !config.strict {
        return None;
    }
    let required = config.page_limit?;
    let left = config.source.remaining(index)?;
    (state.pages_visited + left < required).then(|| ScrapeflowError::IncompleteCrawl {
        visited: state.pages_visited,
        required,
    })
}

/// A crawl running on its own task.
#[derive(Debug)]
pub struct CrawlHandle {
    /// Events in emission order, ending with `Finished`.
    pub events: mpsc::UnboundedReceiver<CrawlEvent>,
    /// Cancels the run at its next page boundary.
    pub cancel: Arc<CancellationToken>,
    /// Resolves to the final report.
    pub join: JoinHandle<CrawlReport>,
}
