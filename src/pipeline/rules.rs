//! Versioned cleaning rules (venue aliases, geography allow-list, ticket URL
//! blacklist, extraction prompts).
//!
//! The rule set lives in `config/rules.toml`. A copy of that file is compiled
//! in as the built-in default so tests and a bare binary behave identically.

use crate::common::error::{Result, ScraperError};
use crate::domain::EventCategory;
use chrono::NaiveTime;
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const BUNDLED_RULES: &str = include_str!("../../config/rules.toml");

static BUILTIN: Lazy<Arc<FilterRules>> = Lazy::new(|| {
    Arc::new(FilterRules::from_toml_str(BUNDLED_RULES).unwrap_or_else(|e| {
        panic!("bundled config/rules.toml is invalid: {e}");
    }))
});

#[derive(Debug, Clone, Deserialize)]
pub struct VenueAlias {
    pub pattern: String,
    pub canonical: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Prompts {
    pub concert: String,
    pub comedy: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRules {
    rule_version: String,
    timezone: String,
    default_event_time: String,
    min_ticket_url_len: usize,
    #[serde(default)]
    city_suffixes: Vec<String>,
    #[serde(default)]
    geo_keywords: Vec<String>,
    #[serde(default)]
    city_specific_sources: Vec<String>,
    #[serde(default)]
    placeholder_domains: Vec<String>,
    #[serde(default)]
    placeholder_host_markers: Vec<String>,
    #[serde(default)]
    venue_aliases: Vec<VenueAlias>,
    prompts: Prompts,
}

/// Parsed rule set. Lists are lowercased at load time so matching is a plain
/// `contains` on a lowercased input. Geography keywords are the exception:
/// they must match whole words.
#[derive(Debug, Clone)]
pub struct FilterRules {
    pub rule_version: String,
    pub timezone: Tz,
    pub default_event_time: NaiveTime,
    pub min_ticket_url_len: usize,
    pub city_suffixes: Vec<String>,
    pub geo_keywords: Vec<String>,
    geo_pattern: Option<Regex>,
    pub city_specific_sources: Vec<String>,
    pub placeholder_domains: Vec<String>,
    pub placeholder_host_markers: Vec<String>,
    pub venue_aliases: Vec<VenueAlias>,
    pub prompts: Prompts,
}

impl FilterRules {
    /// The rule set bundled with the binary.
    pub fn builtin() -> Arc<FilterRules> {
        BUILTIN.clone()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("Failed to read rules file '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawRules = toml::from_str(content)?;
        let timezone: Tz = raw
            .timezone
            .parse()
            .map_err(|e| ScraperError::Config(format!("Unknown timezone '{}': {}", raw.timezone, e)))?;
        let default_event_time = NaiveTime::parse_from_str(&raw.default_event_time, "%H:%M")
            .map_err(|e| {
                ScraperError::Config(format!(
                    "Invalid default_event_time '{}': {}",
                    raw.default_event_time, e
                ))
            })?;

        let lower = |v: Vec<String>| -> Vec<String> {
            v.into_iter()
                .map(|s| s.to_lowercase())
                .filter(|s| !s.trim().is_empty())
                .collect()
        };

        let venue_aliases = raw
            .venue_aliases
            .into_iter()
            .filter(|a| !a.pattern.trim().is_empty())
            .map(|a| VenueAlias {
                pattern: a.pattern.to_lowercase(),
                canonical: a.canonical,
            })
            .collect();

        let geo_keywords = lower(raw.geo_keywords);
        let geo_pattern = geo_keyword_pattern(&geo_keywords)?;

        Ok(Self {
            rule_version: raw.rule_version,
            timezone,
            default_event_time,
            min_ticket_url_len: raw.min_ticket_url_len,
            city_suffixes: lower(raw.city_suffixes),
            geo_keywords,
            geo_pattern,
            city_specific_sources: lower(raw.city_specific_sources),
            placeholder_domains: lower(raw.placeholder_domains),
            placeholder_host_markers: lower(raw.placeholder_host_markers),
            venue_aliases,
            prompts: raw.prompts,
        })
    }

    /// Longest alias pattern contained in the venue; ties go to the first listed.
    pub fn resolve_alias(&self, venue: &str) -> Option<&str> {
        let haystack = venue.to_lowercase();
        let mut best: Option<&VenueAlias> = None;
        for alias in &self.venue_aliases {
            if !haystack.contains(&alias.pattern) {
                continue;
            }
            match best {
                Some(current) if current.pattern.chars().count() >= alias.pattern.chars().count() => {}
                _ => best = Some(alias),
            }
        }
        best.map(|a| a.canonical.as_str())
    }

    pub fn is_city_specific_source(&self, source_name: &str) -> bool {
        let name = source_name.trim().to_lowercase();
        self.city_specific_sources.iter().any(|s| *s == name)
    }

    pub fn matches_geo_keyword(&self, text: &str) -> bool {
        self.geo_pattern.as_ref().is_some_and(|p| p.is_match(text))
    }

    pub fn instruction_for(&self, category: EventCategory) -> &str {
        match category {
            EventCategory::Concert => self.prompts.concert.trim(),
            EventCategory::Comedy => self.prompts.comedy.trim(),
        }
    }
}

/// One case-insensitive alternation over all keywords, anchored on word
/// boundaries. A trailing genitive "s" is allowed ("Stockholms stadsteater").
fn geo_keyword_pattern(keywords: &[String]) -> Result<Option<Regex>> {
    if keywords.is_empty() {
        return Ok(None);
    }
    let alternation = keywords
        .iter()
        .map(|k| regex::escape(k.trim()))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&format!(r"\b(?:{})s?\b", alternation))
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|e| ScraperError::Config(format!("Invalid geo keyword list: {}", e)))
}
