use crate::common::error::{ExtractionError, PersistenceError, TriggerError};
use crate::domain::{DeletionRecord, EventCategory, EventRecord, NaturalKey};
use crate::registry::FetchOptions;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Rendered page content as returned by the scraping backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScrapedPage {
    pub markdown: Option<String>,
    pub links: Vec<String>,
}

impl ScrapedPage {
    pub fn has_content(&self) -> bool {
        self.markdown.as_deref().map_or(false, |m| !m.trim().is_empty())
    }
}

#[async_trait]
pub trait ScrapeBackendPort: Send + Sync {
    async fn scrape(&self, url: &str, options: &FetchOptions) -> Result<ScrapedPage, ExtractionError>;
}

/// Everything the extraction service needs for one page.
#[derive(Clone, Debug)]
pub struct ExtractionRequest {
    pub source_name: String,
    pub source_url: String,
    pub category: EventCategory,
    pub instruction: String,
    pub content: String,
    pub links: Vec<String>,
}

/// One event exactly as the extraction service returned it. Dates are left
/// as strings and coerced later so one bad row never rejects the page.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub venue: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub ticket_url: Option<String>,
    #[serde(default)]
    pub ticket_sale_date: Option<String>,
    #[serde(default)]
    pub tickets_available: Option<bool>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[async_trait]
pub trait ExtractionPort: Send + Sync {
    async fn extract_events(&self, request: &ExtractionRequest) -> Result<Vec<RawEvent>, ExtractionError>;
}

// Store-side ports
#[async_trait]
pub trait PersistencePort: Send + Sync {
    /// Insert or merge on the (artist, venue, date) conflict key.
    async fn upsert_event(&self, record: &EventRecord) -> Result<(), PersistenceError>;
    async fn deletion_keys(&self) -> Result<HashSet<NaturalKey>, PersistenceError>;
    async fn record_deletion(&self, record: &DeletionRecord) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait ChainTriggerPort: Send + Sync {
    async fn trigger(&self, next_batch: u32) -> Result<(), TriggerError>;
}

/// One stage of the artwork fallback chain.
#[async_trait]
pub trait ImageSourcePort: Send + Sync {
    fn name(&self) -> &'static str;
    async fn lookup(&self, artist: &str) -> Result<Option<String>, String>;
}
