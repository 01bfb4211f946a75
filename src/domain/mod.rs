pub mod natural_key;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use natural_key::{key_date, normalize_name, normalize_text, NaturalKey, KEY_TIMEZONE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Concert,
    Comedy,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Concert => "concert",
            EventCategory::Comedy => "comedy",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event as extracted from a listing page, before cleaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCandidate {
    pub artist: String,
    pub venue: String,
    pub date: DateTime<Utc>,
    pub ticket_url: Option<String>,
    pub ticket_sale_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tickets_available: bool,
    pub image_url: Option<String>,
    pub category: EventCategory,
    pub source_name: String,
    pub source_url: String,
}

impl EventCandidate {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(&self.artist, &self.venue, key_date(self.date))
    }

    /// Dedup tie-break: a ticket link is worth two points, artwork and
    /// on-sale status one each.
    pub fn completeness_score(&self) -> u8 {
        let mut score = 0;
        if self.ticket_url.is_some() {
            score += 2;
        }
        if self.image_url.is_some() {
            score += 1;
        }
        if self.tickets_available {
            score += 1;
        }
        score
    }
}

/// Operator removal of a persisted event. Never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionRecord {
    pub artist: String,
    pub venue: String,
    pub date: NaiveDate,
}

impl DeletionRecord {
    pub fn new(artist: impl Into<String>, venue: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            artist: artist.into(),
            venue: venue.into(),
            date,
        }
    }

    pub fn for_event(event: &EventCandidate) -> Self {
        Self::new(event.artist.clone(), event.venue.clone(), key_date(event.date))
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(&self.artist, &self.venue, self.date)
    }
}

/// Row shape written to the events table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub artist: String,
    pub venue: String,
    pub date: DateTime<Utc>,
    pub ticket_url: Option<String>,
    pub ticket_sale_date: Option<DateTime<Utc>>,
    pub tickets_available: bool,
    pub image_url: Option<String>,
    pub event_category: EventCategory,
    pub source_name: String,
    pub source_url: String,
    pub dedup_key: String,
    pub scraped_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn from_candidate(candidate: &EventCandidate, scraped_at: DateTime<Utc>) -> Self {
        Self {
            artist: candidate.artist.clone(),
            venue: candidate.venue.clone(),
            date: candidate.date,
            ticket_url: candidate.ticket_url.clone(),
            ticket_sale_date: candidate.ticket_sale_date,
            tickets_available: candidate.tickets_available,
            image_url: candidate.image_url.clone(),
            event_category: candidate.category,
            source_name: candidate.source_name.clone(),
            source_url: candidate.source_url.clone(),
            dedup_key: candidate.natural_key().digest(),
            scraped_at,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(&self.artist, &self.venue, key_date(self.date))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::candidate;
    use super::*;

    #[test]
    fn test_completeness_score_weights() {
        let mut c = candidate("Robyn", "Avicii Arena", 10);
        assert_eq!(c.completeness_score(), 0);
        c.ticket_url = Some("https://www.ticketmaster.se/event/123".to_string());
        assert_eq!(c.completeness_score(), 2);
        c.image_url = Some("https://img.se/robyn.jpg".to_string());
        c.tickets_available = true;
        assert_eq!(c.completeness_score(), 4);
    }

    #[test]
    fn test_deletion_record_key_matches_event_key() {
        let c = candidate("Robyn: Honey Tour", "Avicii Arena", 10);
        let d = DeletionRecord::for_event(&c);
        assert_eq!(d.natural_key(), c.natural_key());
    }

    #[test]
    fn test_deletion_by_local_date_matches_late_night_event() {
        use chrono::TimeZone;
        let mut c = candidate("Robyn", "Berns", 10);
        c.date = Utc.with_ymd_and_hms(2025, 6, 10, 22, 30, 0).unwrap();
        let d = DeletionRecord::new("Robyn", "Berns", NaiveDate::from_ymd_opt(2025, 6, 11).unwrap());
        assert_eq!(d.natural_key(), c.natural_key());
        assert_eq!(DeletionRecord::for_event(&c).date, d.date);
        assert_eq!(EventRecord::from_candidate(&c, c.date).natural_key(), d.natural_key());
    }

    #[test]
    fn test_category_serializes_lowercase() {
        let json = serde_json::to_string(&EventCategory::Comedy).unwrap();
        assert_eq!(json, "\"comedy\"");
    }
}
