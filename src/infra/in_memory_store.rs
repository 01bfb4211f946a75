use crate::app::ports::PersistencePort;
use crate::common::error::PersistenceError;
use crate::domain::{DeletionRecord, EventRecord, NaturalKey};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Process-local store used for dry runs and tests. Upserts replace the
/// row with the same natural key.
#[derive(Default)]
pub struct InMemoryStore {
    events: Mutex<Vec<EventRecord>>,
    index: Mutex<HashMap<NaturalKey, usize>>,
    deletions: Mutex<Vec<DeletionRecord>>,
    upsert_calls: AtomicUsize,
    fail_deletion_reads: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deletions(deletions: Vec<DeletionRecord>) -> Self {
        Self {
            deletions: Mutex::new(deletions),
            ..Self::default()
        }
    }

    /// A store whose deletion list cannot be read.
    pub fn unavailable() -> Self {
        Self {
            fail_deletion_reads: true,
            ..Self::default()
        }
    }

    pub async fn events(&self) -> Vec<EventRecord> {
        self.events.lock().await.clone()
    }

    pub async fn deletions(&self) -> Vec<DeletionRecord> {
        self.deletions.lock().await.clone()
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistencePort for InMemoryStore {
    async fn upsert_event(&self, record: &EventRecord) -> Result<(), PersistenceError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let key = record.natural_key();
        let mut events = self.events.lock().await;
        let mut index = self.index.lock().await;
        match index.get(&key) {
            Some(&slot) => events[slot] = record.clone(),
            None => {
                index.insert(key, events.len());
                events.push(record.clone());
            }
        }
        Ok(())
    }

    async fn deletion_keys(&self) -> Result<HashSet<NaturalKey>, PersistenceError> {
        if self.fail_deletion_reads {
            return Err(PersistenceError::new("deletions table unreachable"));
        }
        Ok(self.deletions.lock().await.iter().map(DeletionRecord::natural_key).collect())
    }

    async fn record_deletion(&self, record: &DeletionRecord) -> Result<(), PersistenceError> {
        self.deletions.lock().await.push(record.clone());
        Ok(())
    }
}
