//! Public metadata services used as artwork fallbacks.
//!
//! Every stage answers `Ok(None)` when it has nothing convincing; only
//! transport and decoding problems are errors. Wikimedia hosts share one
//! rate limiter, MusicBrainz and iTunes get their own.

use crate::app::ports::ImageSourcePort;
use crate::common::error::Result;
use crate::config::EnrichConfig;
use crate::domain::normalize_name;
use crate::infra::http_client::build_client;
use crate::infra::rate_limiter::RateLimiter;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Base URLs of the services. Overridable so tests can point at a mock.
#[derive(Clone, Debug)]
pub struct ImageEndpoints {
    pub wikidata: String,
    pub commons: String,
    pub musicbrainz: String,
    pub wikipedia: String,
    pub itunes: String,
}

impl Default for ImageEndpoints {
    fn default() -> Self {
        Self {
            wikidata: "https://www.wikidata.org".to_string(),
            commons: "https://commons.wikimedia.org".to_string(),
            musicbrainz: "https://musicbrainz.org".to_string(),
            wikipedia: "https://en.wikipedia.org".to_string(),
            itunes: "https://itunes.apple.com".to_string(),
        }
    }
}

// Descriptions that mark a Wikidata hit as a performer rather than a
// namesake place, ship or album.
const PERFORMER_HINTS: &[&str] = &[
    "singer", "musician", "band", "rapper", "comedian", "group", "artist", "dj", "composer", "duo",
    "songwriter", "producer", "stand-up", "music", "sångare", "musiker", "grupp", "komiker",
];

const MUSICBRAINZ_MIN_SCORE: u64 = 90;

#[derive(Clone)]
struct JsonFetcher {
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl JsonFetcher {
    async fn get(&self, url: Url) -> std::result::Result<Value, String> {
        self.limiter.acquire().await;
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("{} returned HTTP {}", url.host_str().unwrap_or("service"), status.as_u16()));
        }
        response.json::<Value>().await.map_err(|e| e.to_string())
    }
}

fn endpoint(base: &str, path: &str, params: &[(&str, &str)]) -> std::result::Result<Url, String> {
    let raw = format!("{}{}", base.trim_end_matches('/'), path);
    Url::parse_with_params(&raw, params).map_err(|e| format!("bad URL {}: {}", raw, e))
}

fn is_performer(description: &str) -> bool {
    let lowered = description.to_lowercase();
    PERFORMER_HINTS.iter().any(|hint| lowered.contains(hint))
}

// ============================================================================
// Wikidata
// ============================================================================

/// Entity search, then the P18 (image) claim rendered through Commons.
pub struct WikidataImages {
    fetch: JsonFetcher,
    wikidata_base: String,
    commons_base: String,
}

impl WikidataImages {
    /// Image for a known entity id such as `Q1234`.
    pub async fn image_for_entity(&self, qid: &str) -> std::result::Result<Option<String>, String> {
        let url = endpoint(
            &self.wikidata_base,
            "/w/api.php",
            &[("action", "wbgetentities"), ("ids", qid), ("props", "claims"), ("format", "json")],
        )?;
        let body = self.fetch.get(url).await?;
        let filename = body["entities"][qid]["claims"]["P18"][0]["mainsnak"]["datavalue"]["value"].as_str();
        Ok(filename.and_then(|f| commons_file_url(&self.commons_base, f)))
    }
}

/// Direct file URL for a Commons filename.
pub fn commons_file_url(commons_base: &str, filename: &str) -> Option<String> {
    let filename = filename.trim();
    if filename.is_empty() {
        return None;
    }
    let mut url = Url::parse(commons_base).ok()?;
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(["wiki", "Special:FilePath", &filename.replace(' ', "_")]);
    Some(url.to_string())
}

#[async_trait]
impl ImageSourcePort for WikidataImages {
    fn name(&self) -> &'static str {
        "wikidata"
    }

    async fn lookup(&self, artist: &str) -> std::result::Result<Option<String>, String> {
        let url = endpoint(
            &self.wikidata_base,
            "/w/api.php",
            &[
                ("action", "wbsearchentities"),
                ("search", artist),
                ("language", "en"),
                ("type", "item"),
                ("limit", "5"),
                ("format", "json"),
            ],
        )?;
        let body = self.fetch.get(url).await?;
        let hits = body["search"].as_array().cloned().unwrap_or_default();
        let performers = hits
            .iter()
            .filter(|hit| hit["description"].as_str().map_or(false, is_performer))
            .filter_map(|hit| hit["id"].as_str())
            .take(3);
        for qid in performers {
            if let Some(image) = self.image_for_entity(qid).await? {
                return Ok(Some(image));
            }
        }
        Ok(None)
    }
}

// ============================================================================
// MusicBrainz
// ============================================================================

/// Confident artist match, then its Wikidata relation.
pub struct MusicBrainzImages {
    fetch: JsonFetcher,
    base: String,
    wikidata: Arc<WikidataImages>,
}

fn wikidata_id_from_relations(body: &Value) -> Option<String> {
    body["relations"]
        .as_array()?
        .iter()
        .filter(|rel| rel["type"].as_str() == Some("wikidata"))
        .filter_map(|rel| rel["url"]["resource"].as_str())
        .filter_map(|resource| resource.rsplit('/').next())
        .find(|id| id.starts_with('Q'))
        .map(str::to_string)
}

#[async_trait]
impl ImageSourcePort for MusicBrainzImages {
    fn name(&self) -> &'static str {
        "musicbrainz"
    }

    async fn lookup(&self, artist: &str) -> std::result::Result<Option<String>, String> {
        let query = format!("artist:\"{}\"", artist.replace('"', ""));
        let url = endpoint(
            &self.base,
            "/ws/2/artist",
            &[("query", query.as_str()), ("fmt", "json"), ("limit", "3")],
        )?;
        let body = self.fetch.get(url).await?;
        let wanted = normalize_name(artist);
        let mbid = body["artists"].as_array().and_then(|artists| {
            artists
                .iter()
                .filter(|a| a["score"].as_u64().unwrap_or(0) >= MUSICBRAINZ_MIN_SCORE)
                .find(|a| a["name"].as_str().map(normalize_name).as_deref() == Some(wanted.as_str()))
                .and_then(|a| a["id"].as_str())
                .map(str::to_string)
        });
        let Some(mbid) = mbid else {
            return Ok(None);
        };

        let url = endpoint(
            &self.base,
            &format!("/ws/2/artist/{}", mbid),
            &[("inc", "url-rels"), ("fmt", "json")],
        )?;
        let details = self.fetch.get(url).await?;
        match wikidata_id_from_relations(&details) {
            Some(qid) => self.wikidata.image_for_entity(&qid).await,
            None => {
                debug!("MusicBrainz artist {} has no Wikidata relation", mbid);
                Ok(None)
            }
        }
    }
}

// ============================================================================
// Wikipedia
// ============================================================================

/// Lead image of the article titled after the artist.
pub struct WikipediaImages {
    fetch: JsonFetcher,
    base: String,
}

fn page_thumbnail(body: &Value) -> Option<String> {
    let pages = body["query"]["pages"].as_object()?;
    pages.values().find_map(|page| {
        if page.get("missing").is_some() || page["pageprops"].get("disambiguation").is_some() {
            return None;
        }
        page["thumbnail"]["source"].as_str().map(str::to_string)
    })
}

#[async_trait]
impl ImageSourcePort for WikipediaImages {
    fn name(&self) -> &'static str {
        "wikipedia"
    }

    async fn lookup(&self, artist: &str) -> std::result::Result<Option<String>, String> {
        let url = endpoint(
            &self.base,
            "/w/api.php",
            &[
                ("action", "query"),
                ("prop", "pageimages|pageprops"),
                ("piprop", "thumbnail"),
                ("pithumbsize", "640"),
                ("redirects", "1"),
                ("format", "json"),
                ("titles", artist),
            ],
        )?;
        let body = self.fetch.get(url).await?;
        Ok(page_thumbnail(&body))
    }
}

// ============================================================================
// iTunes
// ============================================================================

/// Album artwork from the iTunes search API, upscaled to 600px.
pub struct ItunesArtwork {
    fetch: JsonFetcher,
    base: String,
}

fn matching_artwork(body: &Value, artist: &str) -> Option<String> {
    let wanted = normalize_name(artist);
    body["results"]
        .as_array()?
        .iter()
        .filter(|r| r["artistName"].as_str().map(normalize_name).as_deref() == Some(wanted.as_str()))
        .find_map(|r| r["artworkUrl100"].as_str())
        .map(|art| art.replace("100x100", "600x600"))
}

#[async_trait]
impl ImageSourcePort for ItunesArtwork {
    fn name(&self) -> &'static str {
        "itunes"
    }

    async fn lookup(&self, artist: &str) -> std::result::Result<Option<String>, String> {
        let url = endpoint(
            &self.base,
            "/search",
            &[("term", artist), ("entity", "album"), ("limit", "5")],
        )?;
        let body = self.fetch.get(url).await?;
        Ok(matching_artwork(&body, artist))
    }
}

// ============================================================================
// Assembly
// ============================================================================

pub fn build_stages(cfg: &EnrichConfig) -> Result<Vec<Arc<dyn ImageSourcePort>>> {
    build_stages_with(cfg, &ImageEndpoints::default())
}

/// Stages in the configured order. Unknown names are skipped with a warning.
pub fn build_stages_with(cfg: &EnrichConfig, endpoints: &ImageEndpoints) -> Result<Vec<Arc<dyn ImageSourcePort>>> {
    if !cfg.enabled {
        return Ok(Vec::new());
    }
    let client = build_client(&cfg.user_agent, Duration::from_secs(cfg.request_timeout_secs))?;
    let interval = Duration::from_millis(cfg.min_interval_ms);
    let wikimedia = JsonFetcher {
        client: client.clone(),
        limiter: RateLimiter::new(interval),
    };
    let wikidata = Arc::new(WikidataImages {
        fetch: wikimedia.clone(),
        wikidata_base: endpoints.wikidata.clone(),
        commons_base: endpoints.commons.clone(),
    });

    let mut stages: Vec<Arc<dyn ImageSourcePort>> = Vec::new();
    for name in &cfg.stages {
        match name.as_str() {
            "wikidata" => stages.push(wikidata.clone()),
            "musicbrainz" => stages.push(Arc::new(MusicBrainzImages {
                fetch: JsonFetcher {
                    client: client.clone(),
                    limiter: RateLimiter::new(interval),
                },
                base: endpoints.musicbrainz.clone(),
                wikidata: wikidata.clone(),
            })),
            "wikipedia" => stages.push(Arc::new(WikipediaImages {
                fetch: wikimedia.clone(),
                base: endpoints.wikipedia.clone(),
            })),
            "itunes" => stages.push(Arc::new(ItunesArtwork {
                fetch: JsonFetcher {
                    client: client.clone(),
                    limiter: RateLimiter::new(interval),
                },
                base: endpoints.itunes.clone(),
            })),
            other => warn!("Unknown image stage '{}' ignored", other),
        }
    }
    Ok(stages)
}
