//! State scoped to a single invocation. A fresh context is created for every
//! batch run and dropped with it, so nothing leaks between runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug)]
pub struct RunContext {
    pub run_id: Uuid,
    quota_exhausted: AtomicBool,
    exhausted_sources: Mutex<HashSet<String>>,
    image_cache: Mutex<HashMap<String, Option<String>>>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            quota_exhausted: AtomicBool::new(false),
            exhausted_sources: Mutex::new(HashSet::new()),
            image_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_quota_exhausted(&self) -> bool {
        self.quota_exhausted.load(Ordering::SeqCst)
    }

    /// Returns true only for the call that flipped the flag.
    pub fn mark_quota_exhausted(&self) -> bool {
        !self.quota_exhausted.swap(true, Ordering::SeqCst)
    }

    /// A paginated source hit its "no results" page; later pages are skipped.
    pub async fn mark_source_exhausted(&self, source_name: &str) {
        self.exhausted_sources.lock().await.insert(source_name.to_string());
    }

    pub async fn is_source_exhausted(&self, source_name: &str) -> bool {
        self.exhausted_sources.lock().await.contains(source_name)
    }

    /// `Some(None)` means the artist was looked up and nothing was found.
    pub async fn cached_image(&self, artist_key: &str) -> Option<Option<String>> {
        self.image_cache.lock().await.get(artist_key).cloned()
    }

    pub async fn cache_image(&self, artist_key: &str, url: Option<String>) {
        self.image_cache.lock().await.insert(artist_key.to_string(), url);
    }
}
