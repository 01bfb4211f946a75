//! Page Extractor: one listing page in, zero or more candidates out.
//!
//! `extract` never returns an error. Every backend failure is folded into a
//! `PageStatus` so one broken source cannot abort the batch.

use crate::app::ports::{ExtractionPort, ExtractionRequest, ScrapeBackendPort, ScrapedPage};
use crate::common::constants::{MAX_PROMPT_CONTENT_CHARS, MAX_PROMPT_LINKS};
use crate::common::error::ExtractionError;
use crate::domain::EventCandidate;
use crate::observability::metrics;
use crate::pipeline::coerce::to_candidate;
use crate::pipeline::retry::LinearBackoff;
use crate::pipeline::rules::FilterRules;
use crate::pipeline::run_context::RunContext;
use crate::registry::SourceTask;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PageStatus {
    Ok,
    /// Backend returned no textual content.
    Empty,
    /// The source's "no results" marker was on the page.
    NoResults,
    Failed(String),
    QuotaExhausted,
    /// An earlier page of the same source already ran out of results.
    Skipped,
    /// Cut off when the batch's time budget ran out.
    TimedOut,
}

impl PageStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PageStatus::Ok => "ok",
            PageStatus::Empty => "empty",
            PageStatus::NoResults => "no_results",
            PageStatus::Failed(_) => "failed",
            PageStatus::QuotaExhausted => "quota_exhausted",
            PageStatus::Skipped => "skipped",
            PageStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PageStatus::Failed(_) | PageStatus::QuotaExhausted | PageStatus::TimedOut)
    }
}

#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub source_name: String,
    pub url: String,
    pub status: PageStatus,
    pub candidates: Vec<EventCandidate>,
}

impl PageOutcome {
    fn empty(task: &SourceTask, status: PageStatus) -> Self {
        Self {
            source_name: task.source_name.clone(),
            url: task.url.clone(),
            status,
            candidates: Vec::new(),
        }
    }
}

pub struct PageExtractor {
    backend: Arc<dyn ScrapeBackendPort>,
    extraction: Arc<dyn ExtractionPort>,
    rules: Arc<FilterRules>,
    backoff: LinearBackoff,
}

impl PageExtractor {
    pub fn new(
        backend: Arc<dyn ScrapeBackendPort>,
        extraction: Arc<dyn ExtractionPort>,
        rules: Arc<FilterRules>,
        backoff: LinearBackoff,
    ) -> Self {
        Self {
            backend,
            extraction,
            rules,
            backoff,
        }
    }

    pub async fn extract(&self, ctx: &RunContext, task: &SourceTask) -> PageOutcome {
        let started = tokio::time::Instant::now();
        let outcome = self.extract_inner(ctx, task).await;
        metrics::extractor::page_outcome(outcome.status.label());
        metrics::extractor::page_duration(started.elapsed().as_secs_f64());
        metrics::extractor::candidates_extracted(outcome.candidates.len());
        outcome
    }

    async fn extract_inner(&self, ctx: &RunContext, task: &SourceTask) -> PageOutcome {
        if ctx.is_quota_exhausted() {
            return PageOutcome::empty(task, PageStatus::QuotaExhausted);
        }
        if task.cursor.is_some() && ctx.is_source_exhausted(&task.source_name).await {
            debug!("Skipping {} ({}): source already out of results", task.source_name, task.url);
            return PageOutcome::empty(task, PageStatus::Skipped);
        }

        let label = format!("scrape {}", task.url);
        let page = match self
            .backoff
            .run(ctx, &label, || self.backend.scrape(&task.url, &task.fetch))
            .await
        {
            Ok(page) => page,
            Err(e) => return self.failed(task, e),
        };

        if !page.has_content() {
            info!("{} returned no content for {}", task.source_name, task.url);
            return PageOutcome::empty(task, PageStatus::Empty);
        }
        if self.hit_no_results_marker(task, &page) {
            info!("{} has no more results at {}", task.source_name, task.url);
            if task.cursor.is_some() {
                ctx.mark_source_exhausted(&task.source_name).await;
            }
            return PageOutcome::empty(task, PageStatus::NoResults);
        }

        let request = self.build_request(task, page);
        let label = format!("extract {}", task.url);
        let rows = match self
            .backoff
            .run(ctx, &label, || self.extraction.extract_events(&request))
            .await
        {
            Ok(rows) => rows,
            Err(e) => return self.failed(task, e),
        };

        let total = rows.len();
        let candidates: Vec<EventCandidate> = rows
            .into_iter()
            .filter_map(|raw| to_candidate(raw, task.category, &task.source_name, &task.url, &self.rules))
            .collect();
        info!(
            "{}: {} events extracted ({} rows dropped during coercion)",
            task.source_name,
            candidates.len(),
            total - candidates.len()
        );
        PageOutcome {
            source_name: task.source_name.clone(),
            url: task.url.clone(),
            status: PageStatus::Ok,
            candidates,
        }
    }

    fn failed(&self, task: &SourceTask, error: ExtractionError) -> PageOutcome {
        match error {
            ExtractionError::QuotaExhausted => PageOutcome::empty(task, PageStatus::QuotaExhausted),
            other => {
                warn!("{} failed for {}: {}", task.source_name, task.url, other);
                PageOutcome::empty(task, PageStatus::Failed(other.to_string()))
            }
        }
    }

    fn hit_no_results_marker(&self, task: &SourceTask, page: &ScrapedPage) -> bool {
        let (Some(marker), Some(markdown)) = (task.fetch.no_results_marker.as_deref(), page.markdown.as_deref())
        else {
            return false;
        };
        !marker.is_empty() && markdown.to_lowercase().contains(&marker.to_lowercase())
    }

    fn build_request(&self, task: &SourceTask, page: ScrapedPage) -> ExtractionRequest {
        let markdown = page.markdown.unwrap_or_default();
        let content = match markdown.char_indices().nth(MAX_PROMPT_CONTENT_CHARS) {
            Some((cut, _)) => markdown[..cut].to_string(),
            None => markdown,
        };
        let mut seen = HashSet::new();
        let links = if task.fetch.include_links {
            page.links
                .into_iter()
                .filter(|l| seen.insert(l.clone()))
                .take(MAX_PROMPT_LINKS)
                .collect()
        } else {
            Vec::new()
        };
        ExtractionRequest {
            source_name: task.source_name.clone(),
            source_url: task.url.clone(),
            category: task.category,
            instruction: self.rules.instruction_for(task.category).to_string(),
            content,
            links,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::RawEvent;
    use crate::domain::EventCategory;
    use crate::registry::{FetchOptions, PageCursor};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FakeBackend {
        pages: Mutex<Vec<Result<ScrapedPage, ExtractionError>>>,
        calls: AtomicU32,
    }

    impl FakeBackend {
        fn new(pages: Vec<Result<ScrapedPage, ExtractionError>>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ScrapeBackendPort for FakeBackend {
        async fn scrape(&self, _url: &str, _options: &FetchOptions) -> Result<ScrapedPage, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                Ok(ScrapedPage::default())
            } else {
                pages.remove(0)
            }
        }
    }

    struct FakeExtraction {
        result: Result<Vec<RawEvent>, ExtractionError>,
        last_request: Mutex<Option<ExtractionRequest>>,
    }

    #[async_trait]
    impl ExtractionPort for FakeExtraction {
        async fn extract_events(&self, request: &ExtractionRequest) -> Result<Vec<RawEvent>, ExtractionError> {
            *self.last_request.lock().unwrap() = Some(request.clone());
            self.result.clone()
        }
    }

    fn page(text: &str) -> ScrapedPage {
        ScrapedPage {
            markdown: Some(text.to_string()),
            links: vec!["https://t.se/a".into(), "https://t.se/a".into(), "https://t.se/b".into()],
        }
    }

    fn task(cursor: Option<PageCursor>) -> SourceTask {
        SourceTask {
            source_name: "Live Nation".into(),
            url: "https://www.livenation.se/event/allevents?page=1".into(),
            category: EventCategory::Comedy,
            fetch: FetchOptions {
                no_results_marker: Some("Inga evenemang hittades".into()),
                ..FetchOptions::default()
            },
            cursor,
        }
    }

    fn extractor(
        backend: Arc<FakeBackend>,
        result: Result<Vec<RawEvent>, ExtractionError>,
    ) -> (PageExtractor, Arc<FakeExtraction>) {
        let extraction = Arc::new(FakeExtraction {
            result,
            last_request: Mutex::new(None),
        });
        let e = PageExtractor::new(backend, extraction.clone(), FilterRules::builtin(), LinearBackoff::default());
        (e, extraction)
    }

    fn row(artist: &str) -> RawEvent {
        RawEvent {
            artist: artist.into(),
            venue: "China Teatern".into(),
            date: "2025-09-01".into(),
            ..RawEvent::default()
        }
    }

    #[tokio::test]
    async fn test_rows_become_candidates_with_category_prompt() {
        let backend = FakeBackend::new(vec![Ok(page("# Shows"))]);
        let (e, extraction) = extractor(backend, Ok(vec![row("Hasse"), row("")]));
        let outcome = e.extract(&RunContext::new(), &task(None)).await;
        assert_eq!(outcome.status, PageStatus::Ok);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].category, EventCategory::Comedy);

        let request = extraction.last_request.lock().unwrap().clone().unwrap();
        assert!(request.instruction.contains("comedy"));
        assert_eq!(request.links.len(), 2);
    }

    #[tokio::test]
    async fn test_blank_page_is_empty_not_error() {
        let backend = FakeBackend::new(vec![Ok(ScrapedPage::default())]);
        let (e, extraction) = extractor(backend, Ok(vec![row("x")]));
        let outcome = e.extract(&RunContext::new(), &task(None)).await;
        assert_eq!(outcome.status, PageStatus::Empty);
        assert!(extraction.last_request.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_results_marker_stops_later_pages() {
        let backend = FakeBackend::new(vec![Ok(page("inga evenemang hittades."))]);
        let (e, _) = extractor(backend.clone(), Ok(vec![row("x")]));
        let ctx = RunContext::new();
        let first = e.extract(&ctx, &task(Some(PageCursor { page: 3, last_page: 4 }))).await;
        assert_eq!(first.status, PageStatus::NoResults);
        let second = e.extract(&ctx, &task(Some(PageCursor { page: 4, last_page: 4 }))).await;
        assert_eq!(second.status, PageStatus::Skipped);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parse_failure_is_reported_not_raised() {
        let backend = FakeBackend::new(vec![Ok(page("# Shows"))]);
        let (e, _) = extractor(backend, Err(ExtractionError::Parse("not json".into())));
        let outcome = e.extract(&RunContext::new(), &task(None)).await;
        assert!(matches!(outcome.status, PageStatus::Failed(_)));
        assert!(outcome.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_quota_short_circuits_following_pages() {
        let backend = FakeBackend::new(vec![Err(ExtractionError::QuotaExhausted), Ok(page("# Shows"))]);
        let (e, _) = extractor(backend.clone(), Ok(vec![row("x")]));
        let ctx = RunContext::new();
        assert_eq!(e.extract(&ctx, &task(None)).await.status, PageStatus::QuotaExhausted);
        assert_eq!(e.extract(&ctx, &task(None)).await.status, PageStatus::QuotaExhausted);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
