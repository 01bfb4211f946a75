//! Best-effort artwork lookup for candidates that arrive without an image.
//!
//! Stages are tried in order until one returns a URL. A stage error counts as
//! a miss. Results, including misses, are cached on the run context keyed by
//! normalized artist name.

use crate::app::ports::ImageSourcePort;
use crate::domain::{normalize_name, EventCandidate};
use crate::observability::metrics;
use crate::pipeline::run_context::RunContext;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichSummary {
    pub filled: usize,
    /// Lookups were abandoned because the deadline passed.
    pub cut_short: bool,
}

pub struct ImageEnricher {
    stages: Vec<Arc<dyn ImageSourcePort>>,
}

impl ImageEnricher {
    pub fn new(stages: Vec<Arc<dyn ImageSourcePort>>) -> Self {
        Self { stages }
    }

    pub fn disabled() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn enrich(&self, ctx: &RunContext, artist: &str) -> Option<String> {
        let key = normalize_name(artist);
        if key.is_empty() || self.stages.is_empty() {
            return None;
        }
        if let Some(cached) = ctx.cached_image(&key).await {
            metrics::enrich::cache_hit();
            return cached;
        }

        let mut found = None;
        for stage in &self.stages {
            match stage.lookup(artist).await {
                Ok(Some(url)) => {
                    debug!("Image for '{}' found via {}", artist, stage.name());
                    metrics::enrich::stage_hit(stage.name());
                    found = Some(url);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Image lookup via {} failed for '{}': {}", stage.name(), artist, e);
                    metrics::enrich::stage_error(stage.name());
                }
            }
        }
        if found.is_none() {
            metrics::enrich::miss();
        }
        ctx.cache_image(&key, found.clone()).await;
        found
    }

    /// Fills `image_url` where missing, stopping at `deadline`.
    pub async fn enrich_all(
        &self,
        ctx: &RunContext,
        candidates: &mut [EventCandidate],
        deadline: Instant,
    ) -> EnrichSummary {
        let mut summary = EnrichSummary::default();
        for candidate in candidates.iter_mut().filter(|c| c.image_url.is_none()) {
            let lookup = tokio::time::timeout_at(deadline, self.enrich(ctx, &candidate.artist));
            match lookup.await {
                Ok(Some(url)) => {
                    candidate.image_url = Some(url);
                    summary.filled += 1;
                }
                Ok(None) => {}
                Err(_) => {
                    warn!("Deadline reached during image lookup for '{}'; skipping the rest", candidate.artist);
                    summary.cut_short = true;
                    break;
                }
            }
        }
        summary
    }
}
