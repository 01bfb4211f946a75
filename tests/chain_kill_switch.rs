// Kept in its own test binary: it sets a process-wide environment variable.
mod support;

use gigs_scraper::common::constants::CHAIN_DISABLED_ENV;
use gigs_scraper::infra::InMemoryStore;
use gigs_scraper::pipeline::{RunRequest, StopReason};
use support::*;

#[tokio::test]
async fn test_kill_switch_suppresses_chaining() {
    std::env::set_var(CHAIN_DISABLED_ENV, "1");

    let harness = Harness::new(ScriptedBackend::new(), ScriptedExtraction::new(), InMemoryStore::new());
    let scheduler = harness.scheduler(numbered_sources(2), 1, settings(60));
    let run = scheduler
        .run_batch(RunRequest {
            batch: 1,
            page: None,
            chain: true,
        })
        .await
        .unwrap();

    assert_eq!(run.report.stop_reason, StopReason::Completed);
    assert!(run.report.chain.is_none());
    assert!(harness.trigger.batches().is_empty());

    std::env::remove_var(CHAIN_DISABLED_ENV);
}
