//! Batch Scheduler: runs one numbered batch inside a wall-clock budget.
//!
//! Tasks run strictly one after another against a single deadline. No task
//! starts after it, a running task is cut off at it, and image lookups stop
//! at it. What was already collected is still filtered, deduplicated and
//! persisted.

use crate::app::ports::PersistencePort;
use crate::common::error::{Result, ScraperError};
use crate::config::{AppConfig, SchedulerConfig};
use crate::observability::metrics;
use crate::pipeline::chain::{ChainDelivery, ChainDispatcher, ChainIntent};
use crate::pipeline::dedup::deduplicate;
use crate::pipeline::deletion_guard::exclude_deleted;
use crate::pipeline::enrich::ImageEnricher;
use crate::pipeline::extractor::{PageExtractor, PageStatus};
use crate::pipeline::persist::persist_all;
use crate::pipeline::quality_gate::QualityFilter;
use crate::pipeline::run_context::RunContext;
use crate::registry::SourceRegistry;
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    TimeExhausted,
    QuotaExhausted,
    /// Every task that ran failed.
    Failed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::TimeExhausted => "time_exhausted",
            StopReason::QuotaExhausted => "quota_exhausted",
            StopReason::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "batch", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running(u32),
    Finished(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRequest {
    pub batch: u32,
    pub page: Option<u32>,
    pub chain: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageReport {
    pub source_name: String,
    pub url: String,
    pub status: PageStatus,
    pub events: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub run_id: Uuid,
    pub batch: u32,
    pub total_batches: u32,
    pub found: usize,
    pub after_filter: usize,
    pub after_dedup: usize,
    pub excluded_deleted: usize,
    pub enriched: usize,
    pub persisted: usize,
    pub persist_errors: usize,
    pub tasks_run: usize,
    pub tasks_failed: usize,
    pub elapsed_ms: u64,
    pub stop_reason: StopReason,
    pub chain: Option<ChainIntent>,
    pub pages: Vec<PageReport>,
}

impl BatchReport {
    pub fn summary(&self) -> String {
        format!(
            "Batch {}/{}: {} found, {} persisted ({} errors), {} tasks run, stopped: {}",
            self.batch,
            self.total_batches,
            self.found,
            self.persisted,
            self.persist_errors,
            self.tasks_run,
            self.stop_reason.as_str()
        )
    }
}

/// A finished batch plus the handle of the detached chain delivery, if any.
pub struct BatchRun {
    pub report: BatchReport,
    pub chain: Option<JoinHandle<ChainDelivery>>,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub budget: Duration,
    pub inter_task_delay: Duration,
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            budget: cfg.budget(),
            inter_task_delay: cfg.inter_task_delay(),
        }
    }
}

pub struct BatchScheduler {
    registry: SourceRegistry,
    extractor: PageExtractor,
    filter: QualityFilter,
    enricher: ImageEnricher,
    store: Arc<dyn PersistencePort>,
    dispatcher: Option<ChainDispatcher>,
    settings: SchedulerSettings,
    state: Mutex<RunState>,
}

impl BatchScheduler {
    pub fn new(
        registry: SourceRegistry,
        extractor: PageExtractor,
        filter: QualityFilter,
        enricher: ImageEnricher,
        store: Arc<dyn PersistencePort>,
        dispatcher: Option<ChainDispatcher>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            registry,
            extractor,
            filter,
            enricher,
            store,
            dispatcher,
            settings,
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn state(&self) -> RunState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `Running`, refusing while another run holds the scheduler.
    fn begin(&self, batch: u32) -> Result<RunGuard<'_>> {
        let mut state = self.lock_state();
        if let RunState::Running(current) = *state {
            return Err(ScraperError::RunInProgress(current));
        }
        *state = RunState::Running(batch);
        Ok(RunGuard {
            state: &self.state,
            finished: false,
        })
    }

    #[instrument(skip(self), fields(batch = request.batch))]
    pub async fn run_batch(&self, request: RunRequest) -> Result<BatchRun> {
        let total_batches = self.registry.total_batches();
        let descriptor = self.registry.batch(request.batch, request.page).ok_or_else(|| {
            ScraperError::InvalidTrigger(format!(
                "batch {} is out of range (1..={})",
                request.batch, total_batches
            ))
        })?;

        let run = self.begin(descriptor.number)?;
        let ctx = RunContext::new();
        let started = Instant::now();
        let deadline = started + self.settings.budget;
        metrics::scheduler::batch_started();
        info!(
            run_id = %ctx.run_id,
            "Starting batch {}/{} with {} tasks (budget {:?})",
            descriptor.number,
            descriptor.total_batches,
            descriptor.tasks.len(),
            self.settings.budget
        );

        // The exclusion set must be known before anything is written.
        let deleted = match self.store.deletion_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                error!("Cannot load deletion keys: {}", e);
                run.finish(StopReason::Failed);
                return Err(ScraperError::BackendUnavailable(e.to_string()));
            }
        };

        let mut collected = Vec::new();
        let mut pages = Vec::with_capacity(descriptor.tasks.len());
        let mut tasks_run = 0;
        let mut tasks_failed = 0;
        let mut time_exhausted = false;

        for (i, task) in descriptor.tasks.iter().enumerate() {
            if i > 0 && !self.settings.inter_task_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_task_delay).await;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Time budget spent after {} of {} tasks; stopping",
                    tasks_run,
                    descriptor.tasks.len()
                );
                time_exhausted = true;
                break;
            }
            if ctx.is_quota_exhausted() {
                break;
            }

            tasks_run += 1;
            let outcome = match tokio::time::timeout_at(deadline, self.extractor.extract(&ctx, task)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("{} cut off at the time budget ({})", task.source_name, task.url);
                    metrics::scheduler::task_finished(PageStatus::TimedOut.label());
                    tasks_failed += 1;
                    pages.push(PageReport {
                        source_name: task.source_name.clone(),
                        url: task.url.clone(),
                        status: PageStatus::TimedOut,
                        events: 0,
                    });
                    time_exhausted = true;
                    break;
                }
            };
            metrics::scheduler::task_finished(outcome.status.label());
            if outcome.status.is_failure() {
                tasks_failed += 1;
            }
            pages.push(PageReport {
                source_name: outcome.source_name,
                url: outcome.url,
                status: outcome.status,
                events: outcome.candidates.len(),
            });
            collected.extend(outcome.candidates);
        }

        let collection_stop = decide_stop_reason(ctx.is_quota_exhausted(), time_exhausted, tasks_run, tasks_failed);

        // Dispatch before processing so the chain does not wait on this batch's writes.
        let (chain, chain_handle) = match self.chain_target(&request, &descriptor, collection_stop) {
            Some((dispatcher, next)) => {
                let (intent, handle) = dispatcher.dispatch(next);
                (Some(intent), Some(handle))
            }
            None => (None, None),
        };

        let found = collected.len();
        let (filtered, filter_stats) = self.filter.filter_all(collected);
        metrics::filter::record(&filter_stats);
        let after_filter = filtered.len();

        let unique = deduplicate(filtered);
        let after_dedup = unique.len();
        metrics::dedup::merged(after_filter - after_dedup);

        let (mut admitted, excluded_deleted) = exclude_deleted(unique, &deleted);
        metrics::guard::excluded(excluded_deleted);

        // Artwork is optional: once the budget is spent, records go out without it.
        let enrich = self.enricher.enrich_all(&ctx, &mut admitted, deadline).await;
        let persist = persist_all(self.store.as_ref(), &admitted, Utc::now()).await;

        let stop_reason = decide_stop_reason(
            ctx.is_quota_exhausted(),
            time_exhausted || enrich.cut_short,
            tasks_run,
            tasks_failed,
        );
        let elapsed = started.elapsed();
        metrics::scheduler::batch_finished(stop_reason.as_str(), elapsed.as_secs_f64());
        run.finish(stop_reason);

        let report = BatchReport {
            run_id: ctx.run_id,
            batch: descriptor.number,
            total_batches: descriptor.total_batches,
            found,
            after_filter,
            after_dedup,
            excluded_deleted,
            enriched: enrich.filled,
            persisted: persist.persisted,
            persist_errors: persist.errors,
            tasks_run,
            tasks_failed,
            elapsed_ms: elapsed.as_millis() as u64,
            stop_reason,
            chain,
            pages,
        };
        info!(run_id = %ctx.run_id, "{}", report.summary());
        Ok(BatchRun {
            report,
            chain: chain_handle,
        })
    }

    fn chain_target(
        &self,
        request: &RunRequest,
        descriptor: &crate::registry::BatchDescriptor,
        stop_reason: StopReason,
    ) -> Option<(&ChainDispatcher, u32)> {
        if !request.chain {
            return None;
        }
        let Some(next) = descriptor.next_number() else {
            info!("Batch {} is the last batch; chain ends here", descriptor.number);
            return None;
        };
        if stop_reason == StopReason::QuotaExhausted {
            warn!("Not chaining to batch {}: extraction quota exhausted", next);
            return None;
        }
        if AppConfig::chain_disabled() {
            warn!("Not chaining to batch {}: kill switch is set", next);
            return None;
        }
        self.dispatcher.as_ref().map(|d| (d, next))
    }
}

/// Precedence: quota, then time, then all-failed.
fn decide_stop_reason(quota_exhausted: bool, time_exhausted: bool, tasks_run: usize, tasks_failed: usize) -> StopReason {
    if quota_exhausted {
        StopReason::QuotaExhausted
    } else if time_exhausted {
        StopReason::TimeExhausted
    } else if tasks_run > 0 && tasks_failed == tasks_run {
        StopReason::Failed
    } else {
        StopReason::Completed
    }
}

/// Holds the scheduler in `Running`. Dropped without `finish` (the caller
/// went away mid-run), it records the run as failed.
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
    finished: bool,
}

impl RunGuard<'_> {
    fn finish(mut self, reason: StopReason) {
        self.set(RunState::Finished(reason));
        self.finished = true;
    }

    fn set(&self, next: RunState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.set(RunState::Finished(StopReason::Failed));
        }
    }
}
