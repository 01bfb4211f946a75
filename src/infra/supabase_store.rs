use crate::app::ports::PersistencePort;
use crate::common::error::{PersistenceError, Result, ScraperError};
use crate::domain::{key_date, DeletionRecord, EventRecord, NaturalKey};
use crate::infra::http_client::{build_client, snippet};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::RequestBuilder;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

const DELETION_PAGE_SIZE: usize = 1000;
const EVENTS_CONFLICT_KEY: &str = "artist,venue,date";

#[derive(Deserialize)]
struct DeletionRow {
    artist: String,
    venue: String,
    date: String,
}

/// PostgREST gateway for the events and deletions tables.
pub struct SupabaseStore {
    client: reqwest::Client,
    base_url: String,
    key: String,
    events_table: String,
    deletions_table: String,
}

impl SupabaseStore {
    pub fn new(
        base_url: &str,
        key: &str,
        events_table: &str,
        deletions_table: &str,
        timeout: Duration,
    ) -> Result<Self> {
        if base_url.trim().is_empty() || key.trim().is_empty() {
            return Err(ScraperError::Config("store URL and key are required".to_string()));
        }
        Ok(Self {
            client: build_client(crate::common::constants::DEFAULT_USER_AGENT, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            events_table: events_table.to_string(),
            deletions_table: deletions_table.to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("apikey", &self.key).bearer_auth(&self.key)
    }
}

async fn ensure_success(response: reqwest::Response) -> std::result::Result<reqwest::Response, PersistenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PersistenceError::new(format!("HTTP {}: {}", status.as_u16(), snippet(&body))))
}

/// Deletion dates are stored either as a date or as a full timestamp.
fn parse_deletion_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(key_date(ts.with_timezone(&Utc)));
    }
    raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

#[async_trait]
impl PersistencePort for SupabaseStore {
    async fn upsert_event(&self, record: &EventRecord) -> std::result::Result<(), PersistenceError> {
        let request = self
            .client
            .post(self.table_url(&self.events_table))
            .query(&[("on_conflict", EVENTS_CONFLICT_KEY)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[record]);
        ensure_success(self.authed(request).send().await?).await?;
        Ok(())
    }

    async fn deletion_keys(&self) -> std::result::Result<HashSet<NaturalKey>, PersistenceError> {
        let mut keys = HashSet::new();
        let mut offset = 0usize;
        loop {
            let request = self.client.get(self.table_url(&self.deletions_table)).query(&[
                ("select", "artist,venue,date".to_string()),
                ("order", "date.asc".to_string()),
                ("limit", DELETION_PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
            ]);
            let response = ensure_success(self.authed(request).send().await?).await?;
            let rows: Vec<DeletionRow> = response
                .json()
                .await
                .map_err(|e| PersistenceError::new(format!("malformed deletions page: {}", e)))?;
            let fetched = rows.len();
            for row in rows {
                match parse_deletion_date(&row.date) {
                    Some(date) => {
                        keys.insert(NaturalKey::new(&row.artist, &row.venue, date));
                    }
                    None => warn!("Skipping deletion with unreadable date {:?} ({} @ {})", row.date, row.artist, row.venue),
                }
            }
            if fetched < DELETION_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }
        debug!("Loaded {} deletion keys", keys.len());
        Ok(keys)
    }

    async fn record_deletion(&self, record: &DeletionRecord) -> std::result::Result<(), PersistenceError> {
        let request = self
            .client
            .post(self.table_url(&self.deletions_table))
            .header("Prefer", "return=minimal")
            .json(&[record]);
        ensure_success(self.authed(request).send().await?).await?;
        Ok(())
    }
}
