//! Turns loosely-typed extraction rows into `EventCandidate`s.
//!
//! Every candidate ends up with a concrete instant. A date without a time of
//! day is placed at the rule set's default local time.

use crate::app::ports::RawEvent;
use crate::domain::{EventCandidate, EventCategory};
use crate::pipeline::rules::FilterRules;
use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

// An ISO day somewhere in free text, optionally followed by "20:00" or "20.00".
static EMBEDDED_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2})(?:[T ]+(\d{1,2})[:.](\d{2}))?").expect("valid date pattern")
});

const LOCAL_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parses an instant from the formats the extraction service produces.
pub fn parse_event_date(raw: &str, rules: &FilterRules) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in LOCAL_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return localize(naive, rules);
        }
    }
    let caps = EMBEDDED_DATE.captures(raw)?;
    let date = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
    let time = match (caps.get(2), caps.get(3)) {
        (Some(h), Some(m)) => NaiveTime::from_hms_opt(h.as_str().parse().ok()?, m.as_str().parse().ok()?, 0)?,
        _ => rules.default_event_time,
    };
    localize(date.and_time(time), rules)
}

fn localize(naive: NaiveDateTime, rules: &FilterRules) -> Option<DateTime<Utc>> {
    match rules.timezone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        // Wall time skipped by a DST jump; shift forward an hour.
        LocalResult::None => rules
            .timezone
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

pub fn to_candidate(
    raw: RawEvent,
    category: EventCategory,
    source_name: &str,
    source_url: &str,
    rules: &FilterRules,
) -> Option<EventCandidate> {
    let artist = raw.artist.trim();
    let venue = raw.venue.trim();
    if artist.is_empty() || venue.is_empty() {
        return None;
    }
    let Some(date) = parse_event_date(&raw.date, rules) else {
        debug!("Dropping '{}' from {}: unparsable date '{}'", artist, source_name, raw.date);
        return None;
    };
    let ticket_sale_date = raw
        .ticket_sale_date
        .as_deref()
        .and_then(|d| parse_event_date(d, rules));

    Some(EventCandidate {
        artist: artist.to_string(),
        venue: venue.to_string(),
        date,
        ticket_url: clean(raw.ticket_url),
        ticket_sale_date,
        tickets_available: raw.tickets_available.unwrap_or(false),
        image_url: clean(raw.image_url),
        category,
        source_name: source_name.to_string(),
        source_url: source_url.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn rules() -> std::sync::Arc<FilterRules> {
        FilterRules::builtin()
    }

    #[test]
    fn test_date_only_defaults_to_evening_local_time() {
        let dt = parse_event_date("2025-06-10", &rules()).unwrap();
        // 19:00 CEST is 17:00 UTC
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 6, 10, 17, 0, 0).unwrap());
        let winter = parse_event_date("2025-12-10", &rules()).unwrap();
        assert_eq!(winter.hour(), 18);
    }

    #[test]
    fn test_explicit_offsets_and_local_times() {
        let r = rules();
        assert_eq!(
            parse_event_date("2025-06-10T20:30:00+02:00", &r).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 10, 18, 30, 0).unwrap()
        );
        assert_eq!(
            parse_event_date("2025-06-10 20:30", &r).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 10, 18, 30, 0).unwrap()
        );
        assert!(parse_event_date("next friday", &r).is_none());
        assert!(parse_event_date("", &r).is_none());
    }

    #[test]
    fn test_dates_embedded_in_text() {
        let r = rules();
        assert_eq!(
            parse_event_date("fre 2025-06-13 kl 20.30", &r),
            parse_event_date("2025-06-13", &r)
        );
        assert_eq!(
            parse_event_date("Fri 2025-06-13 20.30", &r).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 13, 18, 30, 0).unwrap()
        );
        assert!(parse_event_date("2025-13-40", &r).is_none());
    }

    #[test]
    fn test_rows_without_artist_or_date_are_dropped() {
        let r = rules();
        let good = RawEvent {
            artist: " Robyn ".into(),
            venue: "Avicii Arena".into(),
            date: "2025-06-10".into(),
            ticket_url: Some("  ".into()),
            image_url: Some("null".into()),
            ..RawEvent::default()
        };
        let c = to_candidate(good.clone(), EventCategory::Concert, "Live Nation", "https://ln.se", &r).unwrap();
        assert_eq!(c.artist, "Robyn");
        assert_eq!(c.ticket_url, None);
        assert_eq!(c.image_url, None);
        assert!(!c.tickets_available);

        let no_artist = RawEvent { artist: "".into(), ..good.clone() };
        assert!(to_candidate(no_artist, EventCategory::Concert, "s", "u", &r).is_none());
        let bad_date = RawEvent { date: "TBA".into(), ..good };
        assert!(to_candidate(bad_date, EventCategory::Concert, "s", "u", &r).is_none());
    }
}
