//! Backoff policies for outbound calls.
//!
//! Extraction calls use a short linear schedule gated by the run's quota
//! flag. The chain trigger uses an exponential policy with jitter since it
//! runs detached from the batch.

use crate::common::error::ExtractionError;
use crate::config::{ChainConfig, RetryConfig};
use crate::observability::metrics;
use crate::pipeline::run_context::RunContext;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct LinearBackoff {
    pub max_retries: u32,
    pub step: Duration,
    /// Ceiling for a `Retry-After` hint. Longer hints end the retries.
    pub max_hint: Duration,
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl LinearBackoff {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            step: Duration::from_secs(cfg.base_backoff_secs),
            max_hint: Duration::from_secs(cfg.max_retry_after_secs),
        }
    }

    /// Wait before the given 1-based retry: step, 2×step, ...
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.step * retry
    }

    /// Runs `op`, retrying only on rate limits.
    ///
    /// A quota signal flips the run-wide flag and is returned immediately.
    /// Once the flag is set, `op` is never invoked again in this run.
    pub async fn run<T, F, Fut>(&self, ctx: &RunContext, label: &str, mut op: F) -> Result<T, ExtractionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExtractionError>>,
    {
        let mut retry = 0;
        loop {
            if ctx.is_quota_exhausted() {
                return Err(ExtractionError::QuotaExhausted);
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(ExtractionError::QuotaExhausted) => {
                    if ctx.mark_quota_exhausted() {
                        metrics::extractor::quota_exhausted();
                        warn!(run_id = %ctx.run_id, "Quota exhausted during {}; halting extraction for this run", label);
                    }
                    return Err(ExtractionError::QuotaExhausted);
                }
                Err(ExtractionError::RateLimited { retry_after })
                    if retry < self.max_retries && retry_after.map_or(true, |hint| hint <= self.max_hint) =>
                {
                    retry += 1;
                    metrics::extractor::rate_limited();
                    metrics::extractor::retried();
                    let mut delay = self.delay_for(retry);
                    if let Some(hint) = retry_after {
                        delay = delay.max(hint);
                    }
                    debug!("{} rate limited, retry {}/{} in {:?}", label, retry, self.max_retries, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if let ExtractionError::RateLimited { retry_after } = &e {
                        metrics::extractor::rate_limited();
                        if let Some(hint) = retry_after.filter(|h| *h > self.max_hint) {
                            warn!("{} asked to wait {:?}, over the {:?} ceiling; giving up", label, hint, self.max_hint);
                        }
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Exponential backoff with a cap and up to 10% jitter.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_coefficient: u32,
    pub initial_interval: Duration,
    pub maximum_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ChainConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &ChainConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            backoff_coefficient: 2,
            initial_interval: Duration::from_millis(cfg.initial_backoff_ms),
            maximum_interval: Duration::from_millis(cfg.max_backoff_ms),
        }
    }

    /// Interval before retry `attempt` (1-based), without jitter. A server
    /// hint is honoured when it lies between the computed interval and the cap.
    pub fn retry_interval(&self, attempt: u32, preferred: Option<Duration>) -> Duration {
        let candidate = self
            .initial_interval
            .saturating_mul(self.backoff_coefficient.saturating_pow(attempt.saturating_sub(1)));
        let capped = candidate.min(self.maximum_interval);
        match preferred {
            Some(hint) if capped <= hint && hint <= self.maximum_interval => hint,
            _ => capped,
        }
    }

    pub fn jittered(&self, interval: Duration) -> Duration {
        let max_jitter = interval.as_millis() as u64 / 10;
        if max_jitter == 0 {
            return interval;
        }
        let jitter = rand::thread_rng().gen_range(0..=max_jitter);
        interval + Duration::from_millis(jitter)
    }
}
