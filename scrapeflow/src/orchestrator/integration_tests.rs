//! End-to-end crawl scenarios over in-memory pages and a scripted provider.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::config::{CrawlConfig, CrawlSettings, Credential};
    use crate::errors::{ErrorClass, ExtractionError, FetchError, ScrapeflowError};
    use crate::events::{CollectingProgressSink, CrawlEvent, FnProgressSink, ProgressUpdate};
    use crate::extraction::{FieldSet, ProviderReply};
    use crate::fetch::{MockPageFetcher, PageSource};
    use crate::orchestrator::{CrawlOrchestrator, CrawlReport, CrawlStatus};
    use crate::providers::ProviderRequest;
    use crate::retry::{JitterStrategy, RetryConfig};
    use crate::testing::{ScriptStep, ScriptedTransport, StaticPageFetcher};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const SELECTOR: &str = ".listing";

    fn fast_retry(attempts: usize) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(attempts)
            .with_base_delay_ms(1)
            .with_max_delay_ms(5)
            .with_jitter(JitterStrategy::None)
    }

    fn settings() -> CrawlSettings {
        CrawlSettings::default()
            .with_page_delay_ms(0)
            .with_extraction_retry(fast_retry(3))
            .with_fetch_retry(fast_retry(2))
    }

    fn config(source: PageSource) -> CrawlConfig {
        CrawlConfig::new(
            source,
            SELECTOR,
            FieldSet::parse("title, price").unwrap(),
            "openai",
            "gpt-4o-mini",
            Credential::new("sk-test-1234567890"),
        )
        .with_settings(settings())
    }

    fn urls(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("https://cars.test/list/{i}")).collect()
    }

    /// Answers every request with one record per `ITEM:title|price` token in its chunk.
    fn echo_items(request: &ProviderRequest) -> Option<ScriptStep> {
        let body = request.body.to_string();
        let records: Vec<_> = body
            .split("ITEM:")
            .skip(1)
            .filter_map(|rest| {
                let token: String = rest
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric() || *c == '|')
                    .collect();
                let (title, price) = token.split_once('|')?;
                Some(json!({"title": title, "price": price}))
            })
            .collect();
        Some(ScriptStep::Content(json!({ "records": records }).to_string()))
    }

    fn echo_transport() -> Arc<ScriptedTransport> {
        Arc::new(ScriptedTransport::new().with_responder(echo_items))
    }

    struct Harness {
        fetcher: Arc<StaticPageFetcher>,
        transport: Arc<ScriptedTransport>,
        sink: Arc<CollectingProgressSink>,
        orchestrator: CrawlOrchestrator,
    }

    fn harness(fetcher: StaticPageFetcher, transport: Arc<ScriptedTransport>) -> Harness {
        let fetcher = Arc::new(fetcher);
        let sink = Arc::new(CollectingProgressSink::new());
        let orchestrator = CrawlOrchestrator::new(fetcher.clone(), transport.clone())
            .with_sink(sink.clone());
        Harness {
            fetcher,
            transport,
            sink,
            orchestrator,
        }
    }

    impl Harness {
        async fn run(&self, config: &CrawlConfig) -> CrawlReport {
            self.orchestrator.run(config, &CancellationToken::new()).await
        }

        fn updates(&self) -> Vec<ProgressUpdate> {
            self.sink.progress_updates()
        }
    }

    fn titles(report: &CrawlReport) -> Vec<&str> {
        report.records.iter().filter_map(|r| r.get("title")).collect()
    }

    fn assert_monotonic(updates: &[ProgressUpdate]) {
        for pair in updates.windows(2) {
            assert!(pair[0].pages_visited <= pair[1].pages_visited);
            assert!(pair[0].page_number < pair[1].page_number);
        }
    }

    #[tokio::test]
    async fn test_page_limit_two_of_three() {
        let pages = urls(3);
        let fetcher = StaticPageFetcher::new()
            .with_page(&pages[0], ["ITEM:Avanza|150"])
            .with_page(&pages[1], ["ITEM:Brio|120"])
            .with_page(&pages[2], ["ITEM:Jazz|180"]);
        let h = harness(fetcher, echo_transport());

        let report = h.run(&config(PageSource::urls(pages.clone())).with_page_limit(2)).await;

        assert_eq!(report.status, CrawlStatus::Completed);
        assert_eq!(report.pages_visited, 2);
        assert_eq!(titles(&report), vec!["Avanza", "Brio"]);
        assert_eq!(h.fetcher.fetched_urls(), pages[..2].to_vec());

        let updates = h.updates();
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|u| u.pages_visited <= 2));
        assert_monotonic(&updates);
    }

    #[tokio::test]
    async fn test_rejected_credential_fails_without_retry() {
        let pages = urls(2);
        let fetcher = StaticPageFetcher::new()
            .with_page(&pages[0], ["ITEM:Avanza|150"])
            .with_page(&pages[1], ["ITEM:Brio|120"]);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_reply(ProviderReply::new(401, "invalid api key"));
        let h = harness(fetcher, transport);

        let report = h.run(&config(PageSource::urls(pages))).await;

        assert_eq!(report.status, CrawlStatus::Failed);
        assert!(report.records.is_empty());
        assert_eq!(report.pages_visited, 0);
        assert_eq!(h.transport.calls(), 1);
        assert!(matches!(
            report.error,
            Some(ScrapeflowError::Extraction(ExtractionError::InvalidCredential { status: 401, .. }))
        ));
        assert_eq!(report.error.as_ref().map(ScrapeflowError::class), Some(ErrorClass::Fatal));

        let finished = h.sink.events().pop().unwrap();
        assert!(matches!(
            finished,
            CrawlEvent::Finished { status: CrawlStatus::Failed, error: Some(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_malformed_twice_then_success_counts_once() {
        let pages = urls(1);
        let fetcher = StaticPageFetcher::new().with_page(&pages[0], ["Toyota Avanza Rp 150"]);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_content("Sorry, I cannot help with that.");
        transport.push_content(r#"{"records": [{"title": "Avanza""#);
        transport.push_content(r#"{"records": [{"title": "Avanza", "price": "150"}]}"#);
        let h = harness(fetcher, transport);

        let report = h.run(&config(PageSource::urls(pages))).await;

        assert_eq!(report.status, CrawlStatus::Completed);
        assert_eq!(h.transport.calls(), 3);
        assert_eq!(titles(&report), vec!["Avanza"]);
        assert_eq!(report.chunks_dropped, 0);
    }

    #[tokio::test]
    async fn test_identical_records_across_pages_deduplicated() {
        let pages = urls(2);
        let fetcher = StaticPageFetcher::new()
            .with_page(&pages[0], ["ITEM:Avanza|150", "ITEM:Brio|120"])
            .with_page(&pages[1], ["ITEM:Brio|120", "ITEM:Jazz|180", "ITEM:Avanza|150"]);
        let h = harness(fetcher, echo_transport());

        let report = h.run(&config(PageSource::urls(pages))).await;

        assert_eq!(titles(&report), vec!["Avanza", "Brio", "Jazz"]);
        let updates = h.updates();
        assert_eq!(updates[0].new_records, 2);
        assert_eq!(updates[1].new_records, 1);
        assert_eq!(updates[1].records_so_far, 3);
    }

    #[tokio::test]
    async fn test_persistent_transient_failure_drops_chunk() {
        let pages = urls(1);
        let fetcher = StaticPageFetcher::new().with_page(&pages[0], ["ITEM:Avanza|150"]);
        let transport =
            Arc::new(ScriptedTransport::new().with_fallback(ProviderReply::new(503, "overloaded")));
        let h = harness(fetcher, transport);

        let report = h.run(&config(PageSource::urls(pages))).await;

        assert_eq!(report.status, CrawlStatus::Completed);
        assert_eq!(h.transport.calls(), 3);
        assert_eq!(report.chunks_dropped, 1);
        assert!(report.records.is_empty());
        assert!(report.has_losses());

        let update = &h.updates()[0];
        assert_eq!(update.chunks_failed, 1);
        assert!(update.last_error.as_deref().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_configuration_error_before_any_network_call() {
        let pages = urls(1);
        let fetcher = StaticPageFetcher::new().with_page(&pages[0], ["ITEM:Avanza|150"]);
        let h = harness(fetcher, echo_transport());

        let mut bad = config(PageSource::urls(pages));
        bad.provider = "nonexistent".to_string();
        let report = h.run(&bad).await;

        assert_eq!(report.status, CrawlStatus::Failed);
        assert_eq!(report.error.as_ref().map(ScrapeflowError::class), Some(ErrorClass::Configuration));
        assert!(h.fetcher.fetched_urls().is_empty());
        assert_eq!(h.transport.calls(), 0);

        let events = h.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "crawl.finished");
    }

    #[tokio::test]
    async fn test_tiny_chunk_size_rejected_before_fetching() {
        let pages = urls(1);
        let fetcher = StaticPageFetcher::new().with_page(&pages[0], ["ITEM:Avanza|150"]);
        let h = harness(fetcher, echo_transport());

        let config = config(PageSource::urls(pages)).with_settings(settings().with_max_chunk_size(2));
        let report = h.run(&config).await;

        assert_eq!(report.status, CrawlStatus::Failed);
        assert_eq!(report.error.as_ref().map(ScrapeflowError::class), Some(ErrorClass::Configuration));
        assert!(h.fetcher.fetched_urls().is_empty());
        assert_eq!(h.transport.calls(), 0);

        let events = h.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "crawl.finished");
    }

    #[tokio::test]
    async fn test_skipped_page_does_not_consume_budget() {
        let pages = urls(3);
        let fetcher = StaticPageFetcher::new()
            .with_error(&pages[0], FetchError::unreachable(&pages[0], "dns failure"))
            .with_page(&pages[1], ["ITEM:Brio|120"])
            .with_page(&pages[2], ["ITEM:Jazz|180"]);
        let h = harness(fetcher, echo_transport());

        let report = h.run(&config(PageSource::urls(pages.clone())).with_page_limit(2)).await;

        assert_eq!(report.status, CrawlStatus::Completed);
        assert_eq!(report.pages_visited, 2);
        assert_eq!(report.pages_skipped, 1);
        assert_eq!(titles(&report), vec!["Brio", "Jazz"]);
        // Two attempts on the unreachable page, then one per good page.
        assert_eq!(h.fetcher.fetched_urls().len(), 4);

        let updates = h.updates();
        assert_eq!(updates[0].pages_visited, 0);
        assert!(updates[0].last_error.as_deref().unwrap().contains("dns failure"));
        assert_monotonic(&updates);
    }

    #[tokio::test]
    async fn test_transient_fetch_failure_is_retried() {
        let pages = urls(1);
        let fetcher = StaticPageFetcher::new()
            .with_page(&pages[0], ["ITEM:Avanza|150"])
            .with_transient_failures(&pages[0], 1);
        let h = harness(fetcher, echo_transport());

        let report = h.run(&config(PageSource::urls(pages))).await;

        assert_eq!(report.pages_visited, 1);
        assert_eq!(report.pages_skipped, 0);
        assert_eq!(h.fetcher.fetched_urls().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_timeouts_exhaust_fetch_retry() {
        let mut fetcher = MockPageFetcher::new();
        fetcher.expect_fetch().times(2).returning(|url, _, timeout| {
            Err(FetchError::Timeout {
                url: url.to_string(),
                timeout,
            })
        });
        let transport = echo_transport();
        let orchestrator = CrawlOrchestrator::new(Arc::new(fetcher), transport.clone());

        let report = orchestrator
            .run(&config(PageSource::urls(urls(1))), &CancellationToken::new())
            .await;

        assert_eq!(report.status, CrawlStatus::Completed);
        assert_eq!(report.pages_skipped, 1);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_pagination_stops_at_empty_page() {
        let base = "https://cars.test/search?make=toyota";
        let fetcher = StaticPageFetcher::new()
            .with_page("https://cars.test/search?make=toyota&page=1", ["ITEM:Avanza|150"])
            .with_page("https://cars.test/search?make=toyota&page=2", ["ITEM:Rush|250"]);
        let h = harness(fetcher, echo_transport());

        let report = h.run(&config(PageSource::paginated(base))).await;

        assert_eq!(report.status, CrawlStatus::Completed);
        assert_eq!(report.pages_visited, 2);
        assert_eq!(titles(&report), vec!["Avanza", "Rush"]);
        assert_eq!(
            h.fetcher.fetched_urls().last().map(String::as_str),
            Some("https://cars.test/search?make=toyota&page=3")
        );
    }

    #[tokio::test]
    async fn test_pagination_stops_on_page_without_new_records() {
        let fetcher = StaticPageFetcher::new()
            .with_page("https://cars.test/list?page=1", ["ITEM:Avanza|150"])
            .with_page("https://cars.test/list?page=2", ["ITEM:Avanza|150"])
            .with_page("https://cars.test/list?page=3", ["ITEM:Jazz|180"]);
        let h = harness(fetcher, echo_transport());

        let report = h
            .run(&config(PageSource::paginated("https://cars.test/list")))
            .await;

        assert_eq!(report.pages_visited, 2);
        assert_eq!(titles(&report), vec!["Avanza"]);
    }

    #[tokio::test]
    async fn test_strict_fails_when_seeds_cannot_meet_limit() {
        let pages = urls(2);
        let fetcher = StaticPageFetcher::new()
            .with_page(&pages[0], ["ITEM:Avanza|150"])
            .with_page(&pages[1], ["ITEM:Brio|120"]);
        let h = harness(fetcher, echo_transport());

        let report = h
            .run(&config(PageSource::urls(pages)).with_page_limit(3).with_strict(true))
            .await;

        assert_eq!(report.status, CrawlStatus::Failed);
        assert!(matches!(
            report.error,
            Some(ScrapeflowError::IncompleteCrawl { visited: 0, required: 3 })
        ));
        assert!(h.fetcher.fetched_urls().is_empty());
    }

    #[tokio::test]
    async fn test_strict_fails_when_skip_makes_limit_unreachable() {
        let pages = urls(3);
        let fetcher = StaticPageFetcher::new()
            .with_page(&pages[0], ["ITEM:Avanza|150"])
            .with_error(&pages[1], FetchError::empty(&pages[1], SELECTOR))
            .with_page(&pages[2], ["ITEM:Jazz|180"]);
        let h = harness(fetcher, echo_transport());

        let report = h
            .run(&config(PageSource::urls(pages)).with_page_limit(3).with_strict(true))
            .await;

        assert!(matches!(
            report.error,
            Some(ScrapeflowError::IncompleteCrawl { visited: 1, required: 3 })
        ));
        assert_eq!(h.fetcher.fetched_urls().len(), 2);
    }

    #[tokio::test]
    async fn test_strict_fails_when_pagination_ends_early() {
        let fetcher =
            StaticPageFetcher::new().with_page("https://cars.test/list?page=1", ["ITEM:Avanza|150"]);
        let h = harness(fetcher, echo_transport());

        let report = h
            .run(
                &config(PageSource::paginated("https://cars.test/list"))
                    .with_page_limit(5)
                    .with_strict(true),
            )
            .await;

        assert_eq!(report.status, CrawlStatus::Failed);
        assert!(report.records.is_empty());
        assert!(matches!(
            report.error,
            Some(ScrapeflowError::IncompleteCrawl { visited: 1, required: 5 })
        ));
    }

    #[tokio::test]
    async fn test_cancellation_observed_at_page_boundary() {
        let pages = urls(3);
        let fetcher = Arc::new(
            StaticPageFetcher::new()
                .with_page(&pages[0], ["ITEM:Avanza|150"])
                .with_page(&pages[1], ["ITEM:Brio|120"])
                .with_page(&pages[2], ["ITEM:Jazz|180"]),
        );
        let cancel = Arc::new(CancellationToken::new());
        let token = cancel.clone();
        let sink = FnProgressSink::new(move |event: &CrawlEvent| {
            if event.as_progress().is_some_and(|u| u.page_number == 1) {
                token.cancel("operator stop");
            }
        });
        let orchestrator =
            CrawlOrchestrator::new(fetcher.clone(), echo_transport()).with_sink(Arc::new(sink));

        let report = orchestrator.run(&config(PageSource::urls(pages)), &cancel).await;

        assert_eq!(report.status, CrawlStatus::Cancelled);
        assert_eq!(fetcher.fetched_urls().len(), 1);
        assert_eq!(titles(&report), vec!["Avanza"]);
        assert!(matches!(report.error, Some(ScrapeflowError::Cancelled(ref r)) if r == "operator stop"));
    }

    #[tokio::test]
    async fn test_spawned_run_cancelled_during_page_delay() {
        let pages = urls(2);
        let fetcher = Arc::new(
            StaticPageFetcher::new()
                .with_page(&pages[0], ["ITEM:Avanza|150"])
                .with_page(&pages[1], ["ITEM:Brio|120"]),
        );
        let orchestrator = CrawlOrchestrator::new(fetcher.clone(), echo_transport());
        let config = config(PageSource::urls(pages))
            .with_settings(settings().with_page_delay_ms(60_000));

        let mut handle = orchestrator.spawn(config);
        loop {
            let event = handle.events.recv().await.unwrap();
            if event.as_progress().is_some() {
                break;
            }
        }
        handle.cancel.cancel("stop");

        let report = tokio::time::timeout(Duration::from_secs(5), handle.join)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.status, CrawlStatus::Cancelled);
        assert_eq!(fetcher.fetched_urls().len(), 1);

        let last = handle.events.recv().await.unwrap();
        assert_eq!(last.event_type(), "crawl.finished");
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_fetch_backoff() {
        let pages = urls(2);
        let fetcher = StaticPageFetcher::new()
            .with_page(&pages[0], ["ITEM:Avanza|150"])
            .with_transient_failures(&pages[0], 5)
            .with_page(&pages[1], ["ITEM:Brio|120"]);
        let h = harness(fetcher, echo_transport());
        let slow_fetch_retry = RetryConfig::new()
            .with_max_attempts(5)
            .with_base_delay_ms(60_000)
            .with_max_delay_ms(60_000)
            .with_jitter(JitterStrategy::None);
        let config = config(PageSource::urls(pages))
            .with_settings(settings().with_fetch_retry(slow_fetch_retry));

        let cancel = Arc::new(CancellationToken::new());
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel("stop");
            })
        };

        let report = tokio::time::timeout(Duration::from_secs(5), h.orchestrator.run(&config, &cancel))
            .await
            .unwrap();
        canceller.await.unwrap();

        assert_eq!(report.status, CrawlStatus::Cancelled);
        assert_eq!(report.pages_visited, 0);
        assert_eq!(report.pages_skipped, 0);
        assert_eq!(h.fetcher.fetched_urls().len(), 1);
        assert!(h.updates().is_empty());
    }

    #[tokio::test]
    async fn test_chunk_concurrency_bounded_and_order_kept() {
        let pages = urls(1);
        let items: Vec<String> = (1..=8).map(|i| format!("ITEM:Car{i:02}|{i}00")).collect();
        let fetcher = StaticPageFetcher::new().with_page(&pages[0], items);
        let transport = Arc::new(
            ScriptedTransport::new()
                .with_responder(echo_items)
                .with_delay(Duration::from_millis(10)),
        );
        let h = harness(fetcher, transport);
        let config = config(PageSource::urls(pages)).with_settings(
            settings().with_max_chunk_size(20).with_chunk_concurrency(2),
        );

        let report = h.run(&config).await;

        assert_eq!(h.transport.calls(), 8);
        assert!(h.transport.max_in_flight() <= 2);
        assert_eq!(
            titles(&report),
            (1..=8).map(|i| format!("Car{i:02}")).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_records_carry_exactly_the_configured_fields() {
        let pages = urls(1);
        let fetcher = StaticPageFetcher::new().with_page(&pages[0], ["listing"]);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_content(
            r#"[{"title": "Avanza", "colour": "red"}, {"price": 150, "mileage": "10km"}]"#,
        );
        let h = harness(fetcher, transport);

        let report = h.run(&config(PageSource::urls(pages))).await;

        assert_eq!(report.records.len(), 2);
        for record in &report.records {
            assert_eq!(record.field_names().collect::<Vec<_>>(), vec!["title", "price"]);
        }
        assert_eq!(report.records[0].get("price"), None);
        assert_eq!(report.records[1].get("price"), Some("150"));
    }

    #[tokio::test]
    async fn test_drop_incomplete_records() {
        let pages = urls(1);
        let fetcher = StaticPageFetcher::new().with_page(&pages[0], ["listing"]);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_content(r#"[{"title": "Avanza", "price": "150"}, {"title": "Brio"}]"#);
        let h = harness(fetcher, transport);
        let config = config(PageSource::urls(pages))
            .with_settings(settings().with_drop_incomplete_records(true));

        let report = h.run(&config).await;

        assert_eq!(titles(&report), vec!["Avanza"]);
    }

    #[tokio::test]
    async fn test_started_event_carries_provider_string() {
        let pages = urls(1);
        let fetcher = StaticPageFetcher::new().with_page(&pages[0], ["ITEM:Avanza|150"]);
        let h = harness(fetcher, echo_transport());

        let report = h.run(&config(PageSource::urls(pages)).with_page_limit(1)).await;

        let events = h.sink.events();
        let types: Vec<_> = events.iter().map(CrawlEvent::event_type).collect();
        assert_eq!(types, vec!["crawl.started", "crawl.page", "crawl.finished"]);
        match &events[0] {
            CrawlEvent::Started {
                run_id,
                provider_string,
                page_limit,
            } => {
                assert_eq!(*run_id, report.run_id);
                assert_eq!(provider_string, "openai/gpt-4o-mini");
                assert_eq!(*page_limit, Some(1));
            }
            other => panic!("unexpected first event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_credential_sent_only_in_headers() {
        let pages = urls(1);
        let fetcher = StaticPageFetcher::new().with_page(&pages[0], ["ITEM:Avanza|150"]);
        let h = harness(fetcher, echo_transport());

        h.run(&config(PageSource::urls(pages))).await;

        let request = &h.transport.requests()[0];
        assert!(!request.body.to_string().contains("sk-test-1234567890"));
        assert_eq!(request.header("authorization"), Some("Bearer sk-test-1234567890"));
    }
}
