//! Fire-and-forget trigger for the next batch.
//!
//! `dispatch` records the intent and returns at once; delivery runs on a
//! detached task with its own retry policy and never feeds back into the
//! batch that spawned it.

use crate::app::ports::ChainTriggerPort;
use crate::common::error::TriggerError;
use crate::observability::metrics;
use crate::pipeline::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainIntent {
    pub next_batch: u32,
    pub dispatched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainDelivery {
    Delivered { attempts: u32 },
    Abandoned { attempts: u32 },
}

#[derive(Clone)]
pub struct ChainDispatcher {
    trigger: Arc<dyn ChainTriggerPort>,
    policy: RetryPolicy,
}

impl ChainDispatcher {
    pub fn new(trigger: Arc<dyn ChainTriggerPort>, policy: RetryPolicy) -> Self {
        Self { trigger, policy }
    }

    pub fn dispatch(&self, next_batch: u32) -> (ChainIntent, JoinHandle<ChainDelivery>) {
        let intent = ChainIntent {
            next_batch,
            dispatched_at: Utc::now(),
        };
        info!("Chaining to batch {}", next_batch);
        let trigger = self.trigger.clone();
        let policy = self.policy.clone();
        let handle = tokio::spawn(async move { deliver(trigger, policy, next_batch).await });
        (intent, handle)
    }
}

async fn deliver(trigger: Arc<dyn ChainTriggerPort>, policy: RetryPolicy, next_batch: u32) -> ChainDelivery {
    let mut attempt = 1;
    loop {
        match trigger.trigger(next_batch).await {
            Ok(()) => {
                metrics::scheduler::chain_delivered();
                info!("Batch {} triggered after {} attempt(s)", next_batch, attempt);
                return ChainDelivery::Delivered { attempts: attempt };
            }
            Err(TriggerError::Retryable { message, retry_after }) if attempt < policy.max_attempts => {
                let wait = policy.jittered(policy.retry_interval(attempt, retry_after));
                warn!(
                    "Chain trigger for batch {} failed (attempt {}/{}): {}; retrying in {:?}",
                    next_batch, attempt, policy.max_attempts, message, wait
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                metrics::scheduler::chain_failed();
                error!("Giving up on chain trigger for batch {}: {}", next_batch, e);
                return ChainDelivery::Abandoned { attempts: attempt };
            }
        }
    }
}
