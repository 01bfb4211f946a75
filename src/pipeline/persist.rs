use crate::app::ports::PersistencePort;
use crate::domain::{EventCandidate, EventRecord};
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub persisted: usize,
    pub errors: usize,
}

/// Upserts each candidate on its natural key. A failed record is logged and
/// counted; the rest of the batch is still written.
pub async fn persist_all(
    store: &dyn PersistencePort,
    candidates: &[EventCandidate],
    scraped_at: DateTime<Utc>,
) -> PersistStats {
    let mut stats = PersistStats::default();
    for candidate in candidates {
        let record = EventRecord::from_candidate(candidate, scraped_at);
        match store.upsert_event(&record).await {
            Ok(()) => {
                stats.persisted += 1;
                metrics::persist::upserted();
                debug!("Upserted {}", record.natural_key());
            }
            Err(e) => {
                stats.errors += 1;
                metrics::persist::failed();
                warn!("Failed to upsert '{}' at '{}': {}", record.artist, record.venue, e);
            }
        }
    }
    stats
}
