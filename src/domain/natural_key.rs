//! Natural key shared by the deduplicator and the deletion guard.
//!
//! Both sides must go through [`NaturalKey::new`]; any drift between the two
//! lets operator-deleted events reappear on the next scrape.
//!
//! The date component is the calendar day in Stockholm, the day an operator
//! sees on the listing. Instants are converted with [`key_date`].

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Zone whose calendar day forms the key date.
pub const KEY_TIMEZONE: Tz = chrono_tz::Europe::Stockholm;

/// Local calendar day of an event instant.
pub fn key_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&KEY_TIMEZONE).date_naive()
}

/// Characters that start a tour name or sub-venue suffix.
const SUFFIX_SEPARATORS: [char; 5] = [':', '-', '\u{2013}', '\u{2014}', '|'];

/// Lowercases and keeps only alphanumeric characters (accented letters count
/// as alphanumeric and are kept as-is).
pub fn normalize_text(value: &str) -> String {
    value
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Cuts the value at the first separator. Falls back to the whole value
/// when the cut would leave nothing alphanumeric.
fn strip_suffix(value: &str) -> &str {
    match value.find(&SUFFIX_SEPARATORS[..]) {
        Some(idx) => {
            let head = &value[..idx];
            if head.chars().any(char::is_alphanumeric) {
                head
            } else {
                value
            }
        }
        None => value,
    }
}

/// Artist/venue key component: suffix stripped, then [`normalize_text`].
pub fn normalize_name(value: &str) -> String {
    normalize_text(strip_suffix(value))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub artist: String,
    pub venue: String,
    pub date: NaiveDate,
}

impl NaturalKey {
    pub fn new(artist: &str, venue: &str, date: NaiveDate) -> Self {
        Self {
            artist: normalize_name(artist),
            venue: normalize_name(venue),
            date,
        }
    }

    /// Stable sha256 hex of the key, stored alongside persisted rows.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.artist, self.venue, self.date.format("%Y-%m-%d"))
    }
}
