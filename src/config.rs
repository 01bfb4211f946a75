use crate::common::constants::{self, env_flag};
use crate::common::error::{Result, ScraperError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
    pub chain: ChainConfig,
    pub enrich: EnrichConfig,
    pub backends: BackendConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Hard wall-clock limit imposed by the host.
    pub execution_ceiling_secs: u64,
    /// Fraction of the ceiling held back as a safety margin.
    pub safety_margin: f64,
    pub inter_task_delay_ms: u64,
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            execution_ceiling_secs: 300,
            safety_margin: 0.2,
            inter_task_delay_ms: 2000,
            batch_size: 5,
        }
    }
}

impl SchedulerConfig {
    /// Self-imposed budget, strictly inside the host ceiling.
    pub fn budget(&self) -> Duration {
        let margin = self.safety_margin.clamp(0.01, 0.99);
        Duration::from_secs(self.execution_ceiling_secs).mul_f64(1.0 - margin)
    }

    pub fn inter_task_delay(&self) -> Duration {
        Duration::from_millis(self.inter_task_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_backoff_secs: u64,
    /// Longest server-requested wait honoured before giving up on a page.
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_secs: 10,
            max_retry_after_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10_000,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub enabled: bool,
    /// Minimum spacing between calls to each public metadata service.
    pub min_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Lookup order; unknown names are ignored with a warning.
    pub stages: Vec<String>,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_ms: 1100,
            request_timeout_secs: 8,
            user_agent: constants::DEFAULT_USER_AGENT.to_string(),
            stages: ["wikidata", "musicbrainz", "wikipedia", "itunes"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub firecrawl_url: String,
    pub firecrawl_api_key: Option<String>,
    pub extraction_url: String,
    pub extraction_api_key: Option<String>,
    pub extraction_model: String,
    pub request_timeout_secs: u64,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub events_table: String,
    pub deletions_table: String,
    pub chain_url: Option<String>,
    pub chain_secret: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            firecrawl_url: "https://api.firecrawl.dev".to_string(),
            firecrawl_api_key: None,
            extraction_url: "https://api.openai.com/v1".to_string(),
            extraction_api_key: None,
            extraction_model: "gpt-4o-mini".to_string(),
            request_timeout_secs: 90,
            supabase_url: None,
            supabase_key: None,
            events_table: "events".to_string(),
            deletions_table: "deleted_events".to_string(),
            chain_url: None,
            chain_secret: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub rules: Option<PathBuf>,
    pub sources: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            rules: None,
            sources: None,
        }
    }
}

impl AppConfig {
    /// Reads `GIGS_CONFIG` (or `config.toml`) when present, then applies
    /// environment overrides. A missing file is not an error.
    pub fn load() -> Result<Self> {
        let path = std::env::var(constants::CONFIG_PATH_ENV)
            .unwrap_or_else(|_| constants::DEFAULT_CONFIG_PATH.to_string());
        let mut config = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        let backends = &mut self.backends;
        if let Ok(v) = std::env::var(constants::FIRECRAWL_URL_ENV) {
            backends.firecrawl_url = v;
        }
        if let Ok(v) = std::env::var(constants::FIRECRAWL_KEY_ENV) {
            backends.firecrawl_api_key = Some(v);
        }
        if let Ok(v) = std::env::var(constants::EXTRACTION_URL_ENV) {
            backends.extraction_url = v;
        }
        if let Ok(v) = std::env::var(constants::EXTRACTION_KEY_ENV) {
            backends.extraction_api_key = Some(v);
        }
        if let Ok(v) = std::env::var(constants::EXTRACTION_MODEL_ENV) {
            backends.extraction_model = v;
        }
        if let Ok(v) = std::env::var(constants::SUPABASE_URL_ENV) {
            backends.supabase_url = Some(v);
        }
        if let Ok(v) = std::env::var(constants::SUPABASE_KEY_ENV) {
            backends.supabase_key = Some(v);
        }
        if let Ok(v) = std::env::var(constants::CHAIN_WEBHOOK_URL_ENV) {
            backends.chain_url = Some(v);
        }
        if let Ok(v) = std::env::var(constants::CHAIN_SECRET_ENV) {
            backends.chain_secret = Some(v);
        }

        if let Some(v) = parse_env::<u64>(constants::CEILING_SECS_ENV)? {
            self.scheduler.execution_ceiling_secs = v;
        }
        if let Some(v) = parse_env::<u64>(constants::INTER_TASK_DELAY_MS_ENV)? {
            self.scheduler.inter_task_delay_ms = v;
        }
        if let Some(v) = parse_env::<usize>(constants::BATCH_SIZE_ENV)? {
            self.scheduler.batch_size = v;
        }
        Ok(())
    }

    /// Kill switch for chaining, read per call so it can be flipped live.
    pub fn chain_disabled() -> bool {
        env_flag(constants::CHAIN_DISABLED_ENV)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ScraperError::Config(format!("{} has an invalid value: '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}
