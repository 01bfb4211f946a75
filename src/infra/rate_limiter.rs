use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Serializes calls to a shared public service with a minimum spacing
/// between request starts. Clones share the same schedule.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    min_interval: Duration,
    // start time of the most recent request
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                min_interval,
                last: Mutex::new(None),
            }),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.inner.min_interval
    }

    /// Waits for the next free slot. The lock is held while sleeping so
    /// concurrent callers queue in order.
    pub async fn acquire(&self) {
        let mut last = self.inner.last.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.inner.min_interval;
            let now = Instant::now();
            if ready_at > now {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}
