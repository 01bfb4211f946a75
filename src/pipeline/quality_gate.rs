use crate::domain::EventCandidate;
use crate::pipeline::rules::FilterRules;
use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Why a candidate was removed from the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DropReason {
    /// Artist is blank after trimming
    MissingArtist,
    /// Venue is blank after trimming
    MissingVenue,
    /// Venue does not look like it is in the target city
    OutsideGeography,
}

/// Result of running one candidate through the filter
#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    /// Candidate survives, possibly with a rewritten venue and cleared ticket URL
    Keep(EventCandidate),
    Drop(DropReason),
}

/// Per-batch counters reported back to the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub kept: usize,
    pub dropped_geography: usize,
    pub dropped_invalid: usize,
    pub ticket_urls_cleared: usize,
}

/// Stateless cleaning and admission stage driven by a versioned rule set
pub struct QualityFilter {
    rules: Arc<FilterRules>,
}

impl QualityFilter {
    pub fn new(rules: Arc<FilterRules>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &FilterRules {
        &self.rules
    }

    /// Alias lookup first; otherwise trailing city/country suffixes are removed.
    pub fn normalize_venue(&self, raw: &str) -> String {
        let venue = collapse_whitespace(raw);
        if let Some(canonical) = self.rules.resolve_alias(&venue) {
            return canonical.to_string();
        }
        self.strip_city_suffixes(&venue)
    }

    fn strip_city_suffixes(&self, venue: &str) -> String {
        let mut current = venue.trim().to_string();
        loop {
            let mut stripped = false;
            for suffix in &self.rules.city_suffixes {
                if let Some(cut) = suffix_start(&current, suffix) {
                    // Never strip the whole name away.
                    if cut == 0 {
                        continue;
                    }
                    current.truncate(cut);
                    current = current.trim_end().trim_end_matches(',').trim_end().to_string();
                    stripped = true;
                    break;
                }
            }
            if !stripped {
                return current;
            }
        }
    }

    /// Returns the URL unchanged when it is usable as a ticket link.
    pub fn validate_ticket_url(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.chars().count() < self.rules.min_ticket_url_len {
            return None;
        }
        let url = Url::parse(trimmed).ok()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return None;
        }
        let host = url.host_str()?.to_lowercase();
        if host.is_empty() {
            return None;
        }
        let placeholder = self
            .rules
            .placeholder_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)));
        if placeholder {
            return None;
        }
        if self
            .rules
            .placeholder_host_markers
            .iter()
            .any(|m| host.contains(m.as_str()))
        {
            return None;
        }
        Some(trimmed.to_string())
    }

    fn in_target_city(&self, source_name: &str, normalized_venue: &str, raw_venue: &str) -> bool {
        self.rules.is_city_specific_source(source_name)
            || self.rules.matches_geo_keyword(normalized_venue)
            || self.rules.matches_geo_keyword(raw_venue)
    }

    pub fn filter(&self, mut candidate: EventCandidate) -> FilterDecision {
        candidate.artist = collapse_whitespace(&candidate.artist);
        if candidate.artist.is_empty() {
            return FilterDecision::Drop(DropReason::MissingArtist);
        }
        let raw_venue = collapse_whitespace(&candidate.venue);
        if raw_venue.is_empty() {
            return FilterDecision::Drop(DropReason::MissingVenue);
        }

        let venue = self.normalize_venue(&raw_venue);
        if !self.in_target_city(&candidate.source_name, &venue, &raw_venue) {
            debug!(
                "Dropping '{}' at '{}' from {}: outside target city",
                candidate.artist, raw_venue, candidate.source_name
            );
            return FilterDecision::Drop(DropReason::OutsideGeography);
        }
        candidate.venue = venue;

        candidate.ticket_url = candidate
            .ticket_url
            .as_deref()
            .and_then(|u| self.validate_ticket_url(u));
        candidate.image_url = candidate
            .image_url
            .map(|u| u.trim().to_string())
            .filter(|u| u.starts_with("http://") || u.starts_with("https://"));

        FilterDecision::Keep(candidate)
    }

    pub fn filter_all(&self, candidates: Vec<EventCandidate>) -> (Vec<EventCandidate>, FilterStats) {
        let mut stats = FilterStats::default();
        let mut kept = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let had_ticket = candidate.ticket_url.is_some();
            match self.filter(candidate) {
                FilterDecision::Keep(c) => {
                    if had_ticket && c.ticket_url.is_none() {
                        stats.ticket_urls_cleared += 1;
                    }
                    kept.push(c);
                }
                FilterDecision::Drop(DropReason::OutsideGeography) => stats.dropped_geography += 1,
                FilterDecision::Drop(_) => stats.dropped_invalid += 1,
            }
        }
        stats.kept = kept.len();
        (kept, stats)
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Byte offset where `suffix` (already lowercase) starts at the end of
/// `value`, compared case-insensitively.
fn suffix_start(value: &str, suffix: &str) -> Option<usize> {
    let suffix_chars = suffix.chars().count();
    let value_chars = value.chars().count();
    if suffix_chars > value_chars {
        return None;
    }
    let (cut, _) = value.char_indices().nth(value_chars - suffix_chars)?;
    if value[cut..].to_lowercase() == suffix {
        Some(cut)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::candidate;

    fn filter() -> QualityFilter {
        QualityFilter::new(FilterRules::builtin())
    }

    fn kept(decision: FilterDecision) -> EventCandidate {
        match decision {
            FilterDecision::Keep(c) => c,
            FilterDecision::Drop(reason) => panic!("unexpected drop: {:?}", reason),
        }
    }

    #[test]
    fn test_foreign_venue_is_dropped() {
        let c = candidate("Robyn", "O2 Arena, London", 10);
        assert_eq!(
            filter().filter(c),
            FilterDecision::Drop(DropReason::OutsideGeography)
        );
    }

    #[test]
    fn test_city_suffix_is_stripped() {
        let c = kept(filter().filter(candidate("Robyn", "Avicii Arena, Stockholm", 10)));
        assert_eq!(c.venue, "Avicii Arena");
        let c = kept(filter().filter(candidate("Robyn", "Cirkus, Stockholm, Sweden", 10)));
        assert_eq!(c.venue, "Cirkus");
    }

    #[test]
    fn test_aliases_resolve_to_canonical_venue() {
        let f = filter();
        assert_eq!(kept(f.filter(candidate("A", "Friends Arena", 1))).venue, "Strawberry Arena");
        assert_eq!(kept(f.filter(candidate("A", "Stora Scen", 1))).venue, "Gröna Lund");
    }

    #[test]
    fn test_city_specific_source_bypasses_geography() {
        let mut c = candidate("Local Band", "Lilla salen", 3);
        assert!(matches!(filter().filter(c.clone()), FilterDecision::Drop(_)));
        c.source_name = "Debaser".to_string();
        assert_eq!(kept(filter().filter(c)).venue, "Lilla salen");
    }

    #[test]
    fn test_invalid_ticket_url_is_nulled_not_dropped() {
        let f = filter();
        for bad in [
            "https://example.com/tickets",
            "https://shop.example.org/x",
            "http://localhost:3000/buy",
            "https://staging.tickets.se/event/1",
            "not a url at all",
            "https://a",
            "ftp://tickets.se/event/1",
        ] {
            let mut c = candidate("Robyn", "Avicii Arena", 10);
            c.ticket_url = Some(bad.to_string());
            assert_eq!(kept(f.filter(c)).ticket_url, None, "{} should be rejected", bad);
        }
        let mut c = candidate("Robyn", "Avicii Arena", 10);
        c.ticket_url = Some("https://www.ticketmaster.se/event/robyn-123".to_string());
        assert_eq!(
            kept(f.filter(c)).ticket_url.as_deref(),
            Some("https://www.ticketmaster.se/event/robyn-123")
        );
    }

    #[test]
    fn test_blank_artist_is_dropped() {
        let c = candidate("   ", "Avicii Arena", 10);
        assert_eq!(filter().filter(c), FilterDecision::Drop(DropReason::MissingArtist));
    }

    #[test]
    fn test_filter_is_order_independent() {
        let f = filter();
        let batch = vec![
            candidate("A", "O2 Arena, London", 1),
            candidate("B", "Nalen", 2),
            candidate("C", "Globen", 3),
        ];
        let mut reversed = batch.clone();
        reversed.reverse();
        let (mut forward, stats) = f.filter_all(batch);
        let (mut backward, _) = f.filter_all(reversed);
        forward.sort_by(|a, b| a.artist.cmp(&b.artist));
        backward.sort_by(|a, b| a.artist.cmp(&b.artist));
        assert_eq!(forward, backward);
        assert_eq!(stats.kept, 2);
        assert_eq!(stats.dropped_geography, 1);
    }

    #[test]
    fn test_suffix_start_handles_multibyte_text() {
        assert_eq!(suffix_start("Södra Teatern, Stockholm", ", stockholm"), Some(14));
        assert_eq!(suffix_start("Ö", ", stockholm"), None);
    }
}
