mod support;

use chrono::NaiveDate;
use gigs_scraper::common::error::{ExtractionError, ScraperError};
use gigs_scraper::domain::DeletionRecord;
use gigs_scraper::infra::InMemoryStore;
use gigs_scraper::pipeline::chain::ChainDelivery;
use gigs_scraper::pipeline::scheduler::RunState;
use gigs_scraper::pipeline::{PageStatus, RunRequest, StopReason};
use std::time::Duration;
use support::*;

fn request(batch: u32, chain: bool) -> RunRequest {
    RunRequest {
        batch,
        page: None,
        chain,
    }
}

#[tokio::test]
async fn test_pages_sharing_a_key_merge_into_one_record() {
    let mut ticket_only = raw("Robyn", "Annexet", "2025-06-10T20:00:00+02:00");
    ticket_only.ticket_url = Some("https://www.ticketmaster.se/event/robyn-annexet".into());
    let mut image_only = raw("Robyn: Honey Tour", "Annexet, Stockholm", "2025-06-10");
    image_only.image_url = Some("https://images.livenation.se/robyn.jpg".into());

    let extraction = ScriptedExtraction::new()
        .page("https://listings.test/1", vec![ticket_only])
        .page("https://listings.test/2", vec![image_only]);
    let harness = Harness::new(ScriptedBackend::new(), extraction, InMemoryStore::new());
    let scheduler = harness.scheduler(numbered_sources(2), 5, settings(60));

    let run = scheduler.run_batch(request(1, false)).await.unwrap();
    assert_eq!(run.report.found, 2);
    assert_eq!(run.report.after_dedup, 1);
    assert_eq!(run.report.persisted, 1);
    assert_eq!(run.report.stop_reason, StopReason::Completed);

    let events = harness.store.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].ticket_url.as_deref(),
        Some("https://www.ticketmaster.se/event/robyn-annexet")
    );
    assert_eq!(events[0].image_url.as_deref(), Some("https://images.livenation.se/robyn.jpg"));
    assert_eq!(scheduler.state(), RunState::Finished(StopReason::Completed));
}

#[tokio::test]
async fn test_deleted_events_are_never_upserted() {
    let deleted = DeletionRecord::new("Robyn", "Annexet", NaiveDate::from_ymd_opt(2025, 6, 10).unwrap());
    let extraction = ScriptedExtraction::new().page(
        "https://listings.test/1",
        vec![
            raw("ROBYN", "Annexet, Stockholm", "2025-06-10"),
            raw("Lykke Li", "Cirkus", "2025-06-12"),
        ],
    );
    let harness = Harness::new(ScriptedBackend::new(), extraction, InMemoryStore::with_deletions(vec![deleted]));
    let scheduler = harness.scheduler(numbered_sources(1), 5, settings(60));

    let report = scheduler.run_batch(request(1, false)).await.unwrap().report;
    assert_eq!(report.excluded_deleted, 1);
    assert_eq!(report.persisted, 1);
    let events = harness.store.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].artist, "Lykke Li");
}

#[tokio::test]
async fn test_geography_and_aliases_are_applied_before_persisting() {
    let extraction = ScriptedExtraction::new().page(
        "https://listings.test/1",
        vec![
            raw("Coldplay", "O2 Arena, London", "2025-06-10"),
            raw("The Weeknd", "Friends Arena", "2025-07-01"),
            raw("Kent", "Avicii Arena, Stockholm", "2025-08-01"),
        ],
    );
    let harness = Harness::new(ScriptedBackend::new(), extraction, InMemoryStore::new());
    let scheduler = harness.scheduler(numbered_sources(1), 5, settings(60));

    let report = scheduler.run_batch(request(1, false)).await.unwrap().report;
    assert_eq!(report.found, 3);
    assert_eq!(report.after_filter, 2);

    let mut venues: Vec<String> = harness.store.events().await.into_iter().map(|e| e.venue).collect();
    venues.sort();
    assert_eq!(venues, vec!["Avicii Arena".to_string(), "Strawberry Arena".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_budget_stops_new_tasks_and_keeps_results() {
    let mut extraction = ScriptedExtraction::new();
    for n in 1..=10 {
        extraction = extraction.page(
            &format!("https://listings.test/{}", n),
            vec![raw(&format!("Artist {}", n), "Nalen", "2025-09-01")],
        );
    }
    let harness = Harness::new(
        ScriptedBackend::with_latency(Duration::from_secs(1)),
        extraction,
        InMemoryStore::new(),
    );
    let scheduler = harness.scheduler(numbered_sources(10), 10, settings(5));

    let report = scheduler.run_batch(request(1, false)).await.unwrap().report;
    assert_eq!(report.tasks_run, 5);
    assert_eq!(harness.backend.calls(), 5);
    assert_eq!(report.stop_reason, StopReason::TimeExhausted);
    assert_eq!(report.persisted, 5);
}

#[tokio::test]
async fn test_quota_exhaustion_stops_extraction_and_chaining() {
    let extraction = ScriptedExtraction::new()
        .page("https://listings.test/1", vec![raw("Robyn", "Annexet", "2025-06-10")])
        .error("https://listings.test/2", ExtractionError::QuotaExhausted)
        .page("https://listings.test/3", vec![raw("Kent", "Cirkus", "2025-06-11")]);
    let harness = Harness::new(ScriptedBackend::new(), extraction, InMemoryStore::new());
    let scheduler = harness.scheduler(numbered_sources(6), 3, settings(60));

    let run = scheduler.run_batch(request(1, true)).await.unwrap();
    assert_eq!(run.report.stop_reason, StopReason::QuotaExhausted);
    assert_eq!(harness.extraction.calls(), 2);
    assert_eq!(harness.backend.calls(), 2);
    assert_eq!(run.report.persisted, 1);
    assert_eq!(harness.store.events().await[0].artist, "Robyn");
    assert!(run.report.chain.is_none());
    assert!(run.chain.is_none());
    assert!(harness.trigger.batches().is_empty());
}

#[tokio::test]
async fn test_chain_dispatches_next_batch_until_the_last() {
    let harness = Harness::new(ScriptedBackend::new(), ScriptedExtraction::new(), InMemoryStore::new());
    let scheduler = harness.scheduler(numbered_sources(3), 1, settings(60));

    let run = scheduler.run_batch(request(2, true)).await.unwrap();
    assert_eq!(run.report.chain.as_ref().map(|c| c.next_batch), Some(3));
    let delivery = run.chain.expect("chain handle").await.unwrap();
    assert_eq!(delivery, ChainDelivery::Delivered { attempts: 1 });
    assert_eq!(harness.trigger.batches(), vec![3]);

    let last = scheduler.run_batch(request(3, true)).await.unwrap();
    assert_eq!(last.report.total_batches, 3);
    assert!(last.report.chain.is_none());
    assert!(last.chain.is_none());

    let unchained = scheduler.run_batch(request(1, false)).await.unwrap();
    assert!(unchained.report.chain.is_none());
    assert_eq!(harness.trigger.batches(), vec![3]);
}

#[tokio::test]
async fn test_failed_tasks_do_not_halt_the_batch() {
    let backend = ScriptedBackend::new().failing(
        "https://listings.test/1",
        ExtractionError::Transient("HTTP 502".into()),
    );
    let extraction = ScriptedExtraction::new().page("https://listings.test/2", vec![raw("Kent", "Cirkus", "2025-06-11")]);
    let harness = Harness::new(backend, extraction, InMemoryStore::new());
    let scheduler = harness.scheduler(numbered_sources(2), 5, settings(60));

    let report = scheduler.run_batch(request(1, false)).await.unwrap().report;
    assert_eq!(report.tasks_run, 2);
    assert_eq!(report.tasks_failed, 1);
    assert_eq!(report.persisted, 1);
    assert_eq!(report.stop_reason, StopReason::Completed);
    assert!(matches!(report.pages[0].status, PageStatus::Failed(_)));
}

#[tokio::test]
async fn test_all_tasks_failing_reports_failed() {
    let backend = ScriptedBackend::new()
        .failing("https://listings.test/1", ExtractionError::Transient("HTTP 500".into()))
        .failing("https://listings.test/2", ExtractionError::Transient("HTTP 500".into()));
    let harness = Harness::new(backend, ScriptedExtraction::new(), InMemoryStore::new());
    let scheduler = harness.scheduler(numbered_sources(2), 5, settings(60));

    let report = scheduler.run_batch(request(1, false)).await.unwrap().report;
    assert_eq!(report.stop_reason, StopReason::Failed);
    assert_eq!(report.persisted, 0);
}

#[tokio::test]
async fn test_unreadable_deletions_abort_before_any_task() {
    let harness = Harness::new(ScriptedBackend::new(), ScriptedExtraction::new(), InMemoryStore::unavailable());
    let scheduler = harness.scheduler(numbered_sources(2), 5, settings(60));

    let result = scheduler.run_batch(request(1, false)).await;
    assert!(matches!(result, Err(ScraperError::BackendUnavailable(_))));
    assert_eq!(harness.backend.calls(), 0);
    assert_eq!(scheduler.state(), RunState::Finished(StopReason::Failed));
}

#[tokio::test]
async fn test_out_of_range_batch_is_an_invalid_trigger() {
    let harness = Harness::new(ScriptedBackend::new(), ScriptedExtraction::new(), InMemoryStore::new());
    let scheduler = harness.scheduler(numbered_sources(2), 5, settings(60));

    assert!(matches!(
        scheduler.run_batch(request(2, false)).await,
        Err(ScraperError::InvalidTrigger(_))
    ));
    assert_eq!(scheduler.state(), RunState::Idle);
}
