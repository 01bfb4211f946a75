#![allow(dead_code)]

use async_trait::async_trait;
use gigs_scraper::app::ports::{
    ChainTriggerPort, ExtractionPort, ExtractionRequest, ImageSourcePort, RawEvent, ScrapeBackendPort, ScrapedPage,
};
use gigs_scraper::common::error::{ExtractionError, TriggerError};
use gigs_scraper::domain::EventCategory;
use gigs_scraper::infra::InMemoryStore;
use gigs_scraper::pipeline::retry::{LinearBackoff, RetryPolicy};
use gigs_scraper::pipeline::scheduler::SchedulerSettings;
use gigs_scraper::pipeline::{BatchScheduler, ChainDispatcher, FilterRules, ImageEnricher, PageExtractor, QualityFilter};
use gigs_scraper::registry::{FetchOptions, SourceRegistry, SourceSpec};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Returns a fixed listing for every URL, optionally taking a while.
pub struct ScriptedBackend {
    pub calls: AtomicUsize,
    latency: Duration,
    failures: HashMap<String, ExtractionError>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
            failures: HashMap::new(),
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::new()
        }
    }

    pub fn failing(mut self, url: &str, error: ExtractionError) -> Self {
        self.failures.insert(url.to_string(), error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScrapeBackendPort for ScriptedBackend {
    async fn scrape(&self, url: &str, _options: &FetchOptions) -> Result<ScrapedPage, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(error) = self.failures.get(url) {
            return Err(error.clone());
        }
        Ok(ScrapedPage {
            markdown: Some(format!("# Listing\n{}", url)),
            links: vec![],
        })
    }
}

/// Per-URL extraction results.
pub struct ScriptedExtraction {
    pub calls: AtomicUsize,
    responses: HashMap<String, Result<Vec<RawEvent>, ExtractionError>>,
}

impl ScriptedExtraction {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            responses: HashMap::new(),
        }
    }

    pub fn page(mut self, url: &str, events: Vec<RawEvent>) -> Self {
        self.responses.insert(url.to_string(), Ok(events));
        self
    }

    pub fn error(mut self, url: &str, error: ExtractionError) -> Self {
        self.responses.insert(url.to_string(), Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionPort for ScriptedExtraction {
    async fn extract_events(&self, request: &ExtractionRequest) -> Result<Vec<RawEvent>, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(&request.source_url)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Default)]
pub struct RecordingTrigger {
    pub batches: Mutex<Vec<u32>>,
}

impl RecordingTrigger {
    pub fn batches(&self) -> Vec<u32> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChainTriggerPort for RecordingTrigger {
    async fn trigger(&self, next_batch: u32) -> Result<(), TriggerError> {
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(next_batch);
        }
        Ok(())
    }
}

/// Image stage that answers every artist after a fixed delay.
pub struct SlowImages {
    pub calls: AtomicUsize,
    delay: Duration,
}

impl SlowImages {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSourcePort for SlowImages {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn lookup(&self, artist: &str) -> Result<Option<String>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Some(format!("https://img.test/{}.jpg", artist.replace(' ', "-"))))
    }
}

pub fn raw(artist: &str, venue: &str, date: &str) -> RawEvent {
    RawEvent {
        artist: artist.to_string(),
        venue: venue.to_string(),
        date: date.to_string(),
        ..RawEvent::default()
    }
}

pub fn source(name: &str, url: &str) -> SourceSpec {
    SourceSpec {
        name: name.to_string(),
        url: url.to_string(),
        category: EventCategory::Concert,
        enabled: true,
        fetch: FetchOptions::default(),
    }
}

/// `count` single-page sources at `https://listings.test/<n>`.
pub fn numbered_sources(count: usize) -> Vec<SourceSpec> {
    (1..=count)
        .map(|n| source(&format!("Source {}", n), &format!("https://listings.test/{}", n)))
        .collect()
}

pub fn settings(budget_secs: u64) -> SchedulerSettings {
    SchedulerSettings {
        budget: Duration::from_secs(budget_secs),
        inter_task_delay: Duration::ZERO,
    }
}

pub struct Harness {
    pub backend: Arc<ScriptedBackend>,
    pub extraction: Arc<ScriptedExtraction>,
    pub store: Arc<InMemoryStore>,
    pub trigger: Arc<RecordingTrigger>,
}

impl Harness {
    pub fn new(backend: ScriptedBackend, extraction: ScriptedExtraction, store: InMemoryStore) -> Self {
        Self {
            backend: Arc::new(backend),
            extraction: Arc::new(extraction),
            store: Arc::new(store),
            trigger: Arc::new(RecordingTrigger::default()),
        }
    }

    pub fn scheduler(&self, sources: Vec<SourceSpec>, batch_size: usize, settings: SchedulerSettings) -> BatchScheduler {
        self.scheduler_with(sources, batch_size, settings, ImageEnricher::disabled())
    }

    pub fn scheduler_with(
        &self,
        sources: Vec<SourceSpec>,
        batch_size: usize,
        settings: SchedulerSettings,
        enricher: ImageEnricher,
    ) -> BatchScheduler {
        let rules = FilterRules::builtin();
        let registry = SourceRegistry::new(sources, batch_size).expect("registry");
        let extractor = PageExtractor::new(
            self.backend.clone(),
            self.extraction.clone(),
            rules.clone(),
            LinearBackoff::default(),
        );
        let dispatcher = ChainDispatcher::new(self.trigger.clone(), RetryPolicy::default());
        BatchScheduler::new(
            registry,
            extractor,
            QualityFilter::new(rules),
            enricher,
            self.store.clone(),
            Some(dispatcher),
            settings,
        )
    }
}
