//! Metrics for the batch ingestion engine.
//!
//! Recording goes through the `metrics` facade, so every call is a no-op
//! until `init` installs the Prometheus recorder.

use crate::common::constants::{METRICS_ADDR_ENV, PUSHGATEWAY_URL_ENV};
use crate::common::error::{Result, ScraperError};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Every metric name the crate records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Extractor
    ExtractorPages,
    ExtractorPageDuration,
    ExtractorCandidates,
    ExtractorRateLimited,
    ExtractorRetries,
    ExtractorQuotaExhausted,

    // Quality filter
    FilterKept,
    FilterDroppedGeography,
    FilterDroppedInvalid,
    FilterTicketUrlsCleared,

    // Dedup and guard
    DedupMerged,
    GuardExcluded,

    // Enrichment
    EnrichStageHits,
    EnrichStageErrors,
    EnrichMisses,
    EnrichCacheHits,

    // Persistence
    PersistUpserts,
    PersistErrors,

    // Scheduler
    SchedulerBatchesStarted,
    SchedulerBatchesFinished,
    SchedulerBatchDuration,
    SchedulerTasks,
    SchedulerChainDelivered,
    SchedulerChainFailed,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ExtractorPages => "gigs_extractor_pages_total",
            MetricName::ExtractorPageDuration => "gigs_extractor_page_duration_seconds",
            MetricName::ExtractorCandidates => "gigs_extractor_candidates_total",
            MetricName::ExtractorRateLimited => "gigs_extractor_rate_limited_total",
            MetricName::ExtractorRetries => "gigs_extractor_retries_total",
            MetricName::ExtractorQuotaExhausted => "gigs_extractor_quota_exhausted_total",

            MetricName::FilterKept => "gigs_filter_kept_total",
            MetricName::FilterDroppedGeography => "gigs_filter_dropped_geography_total",
            MetricName::FilterDroppedInvalid => "gigs_filter_dropped_invalid_total",
            MetricName::FilterTicketUrlsCleared => "gigs_filter_ticket_urls_cleared_total",

            MetricName::DedupMerged => "gigs_dedup_merged_total",
            MetricName::GuardExcluded => "gigs_guard_excluded_total",

            MetricName::EnrichStageHits => "gigs_enrich_stage_hits_total",
            MetricName::EnrichStageErrors => "gigs_enrich_stage_errors_total",
            MetricName::EnrichMisses => "gigs_enrich_misses_total",
            MetricName::EnrichCacheHits => "gigs_enrich_cache_hits_total",

            MetricName::PersistUpserts => "gigs_persist_upserts_total",
            MetricName::PersistErrors => "gigs_persist_errors_total",

            MetricName::SchedulerBatchesStarted => "gigs_scheduler_batches_started_total",
            MetricName::SchedulerBatchesFinished => "gigs_scheduler_batches_finished_total",
            MetricName::SchedulerBatchDuration => "gigs_scheduler_batch_duration_seconds",
            MetricName::SchedulerTasks => "gigs_scheduler_tasks_total",
            MetricName::SchedulerChainDelivered => "gigs_scheduler_chain_delivered_total",
            MetricName::SchedulerChainFailed => "gigs_scheduler_chain_failed_total",
        }
    }

    /// Phase the metric belongs to, used as the pushgateway grouping label
    pub fn phase(&self) -> &'static str {
        let name = self.as_str();
        name.trim_start_matches("gigs_")
            .split('_')
            .next()
            .unwrap_or("system")
    }
}

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder once per process.
///
/// With `GIGS_METRICS_ADDR` set the exporter also serves `/metrics` on that
/// address. Later calls return immediately.
pub fn init() -> Result<()> {
    if HANDLE.get().is_some() {
        return Ok(());
    }
    let builder = PrometheusBuilder::new();
    let handle = match std::env::var(METRICS_ADDR_ENV) {
        Ok(addr) => {
            let addr: SocketAddr = addr.parse().map_err(|e| {
                ScraperError::Config(format!("{} is not a socket address: {}", METRICS_ADDR_ENV, e))
            })?;
            let (recorder, exporter) = builder
                .with_http_listener(addr)
                .build()
                .map_err(|e| ScraperError::Config(format!("Failed to build Prometheus exporter: {}", e)))?;
            let handle = recorder.handle();
            ::metrics::set_global_recorder(recorder)
                .map_err(|e| ScraperError::Config(format!("Failed to install Prometheus recorder: {}", e)))?;
            tokio::spawn(async move {
                if exporter.await.is_err() {
                    warn!("Prometheus exporter on {} stopped with an error", addr);
                }
            });
            info!("Serving Prometheus metrics on {}", addr);
            handle
        }
        Err(_) => builder
            .install_recorder()
            .map_err(|e| ScraperError::Config(format!("Failed to install Prometheus recorder: {}", e)))?,
    };
    let _ = HANDLE.set(handle);
    Ok(())
}

/// Current metrics in the Prometheus text format.
pub fn render() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// Pushes everything recorded so far to the pushgateway, when one is configured.
pub async fn push_to_gateway(instance: &str) -> Result<()> {
    let Ok(gateway) = std::env::var(PUSHGATEWAY_URL_ENV) else {
        return Ok(());
    };
    let Some(body) = render() else {
        return Ok(());
    };
    let url = format!(
        "{}/metrics/job/gigs_scraper/instance/{}",
        gateway.trim_end_matches('/'),
        instance
    );
    let response = reqwest::Client::new()
        .post(&url)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .send()
        .await?;
    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(ScraperError::Api {
            message: format!("Pushgateway returned {}: {}", status, text),
        });
    }
    info!("Pushed metrics to pushgateway for instance={}", instance);
    Ok(())
}

// ============================================================================
// Extractor
// ============================================================================

pub mod extractor {
    use super::MetricName;

    pub fn page_outcome(status: &'static str) {
        ::metrics::counter!(MetricName::ExtractorPages.as_str(), "status" => status).increment(1);
    }

    pub fn page_duration(secs: f64) {
        ::metrics::histogram!(MetricName::ExtractorPageDuration.as_str()).record(secs);
    }

    pub fn candidates_extracted(count: usize) {
        ::metrics::counter!(MetricName::ExtractorCandidates.as_str()).increment(count as u64);
    }

    pub fn rate_limited() {
        ::metrics::counter!(MetricName::ExtractorRateLimited.as_str()).increment(1);
    }

    pub fn retried() {
        ::metrics::counter!(MetricName::ExtractorRetries.as_str()).increment(1);
    }

    pub fn quota_exhausted() {
        ::metrics::counter!(MetricName::ExtractorQuotaExhausted.as_str()).increment(1);
    }
}

// ============================================================================
// Quality filter, dedup, deletion guard
// ============================================================================

pub mod filter {
    use super::MetricName;
    use crate::pipeline::quality_gate::FilterStats;

    pub fn record(stats: &FilterStats) {
        ::metrics::counter!(MetricName::FilterKept.as_str()).increment(stats.kept as u64);
        ::metrics::counter!(MetricName::FilterDroppedGeography.as_str())
            .increment(stats.dropped_geography as u64);
        ::metrics::counter!(MetricName::FilterDroppedInvalid.as_str()).increment(stats.dropped_invalid as u64);
        ::metrics::counter!(MetricName::FilterTicketUrlsCleared.as_str())
            .increment(stats.ticket_urls_cleared as u64);
    }
}

pub mod dedup {
    use super::MetricName;

    pub fn merged(count: usize) {
        ::metrics::counter!(MetricName::DedupMerged.as_str()).increment(count as u64);
    }
}

pub mod guard {
    use super::MetricName;

    pub fn excluded(count: usize) {
        ::metrics::counter!(MetricName::GuardExcluded.as_str()).increment(count as u64);
    }
}

// ============================================================================
// Enrichment
// ============================================================================

pub mod enrich {
    use super::MetricName;

    pub fn stage_hit(stage: &'static str) {
        ::metrics::counter!(MetricName::EnrichStageHits.as_str(), "stage" => stage).increment(1);
    }

    pub fn stage_error(stage: &'static str) {
        ::metrics::counter!(MetricName::EnrichStageErrors.as_str(), "stage" => stage).increment(1);
    }

    pub fn miss() {
        ::metrics::counter!(MetricName::EnrichMisses.as_str()).increment(1);
    }

    pub fn cache_hit() {
        ::metrics::counter!(MetricName::EnrichCacheHits.as_str()).increment(1);
    }
}

// ============================================================================
// Persistence
// ============================================================================

pub mod persist {
    use super::MetricName;

    pub fn upserted() {
        ::metrics::counter!(MetricName::PersistUpserts.as_str()).increment(1);
    }

    pub fn failed() {
        ::metrics::counter!(MetricName::PersistErrors.as_str()).increment(1);
    }
}

// ============================================================================
// Scheduler
// ============================================================================

pub mod scheduler {
    use super::MetricName;

    pub fn batch_started() {
        ::metrics::counter!(MetricName::SchedulerBatchesStarted.as_str()).increment(1);
    }

    pub fn batch_finished(stop_reason: &'static str, secs: f64) {
        ::metrics::counter!(MetricName::SchedulerBatchesFinished.as_str(), "stop_reason" => stop_reason)
            .increment(1);
        ::metrics::histogram!(MetricName::SchedulerBatchDuration.as_str()).record(secs);
    }

    pub fn task_finished(status: &'static str) {
        ::metrics::counter!(MetricName::SchedulerTasks.as_str(), "status" => status).increment(1);
    }

    pub fn chain_delivered() {
        ::metrics::counter!(MetricName::SchedulerChainDelivered.as_str()).increment(1);
    }

    pub fn chain_failed() {
        ::metrics::counter!(MetricName::SchedulerChainFailed.as_str()).increment(1);
    }
}
