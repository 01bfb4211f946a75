use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API error: {message}")]
    Api { message: String },

    #[error("Invalid scrape trigger: {0}")]
    InvalidTrigger(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Batch {0} is still running")]
    RunInProgress(u32),
}

pub type Result<T> = std::result::Result<T, ScraperError>;

/// Classified failure from the scraping or extraction backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("rate limited by backend")]
    RateLimited { retry_after: Option<Duration> },

    #[error("backend quota exhausted")]
    QuotaExhausted,

    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("malformed extraction response: {0}")]
    Parse(String),
}

/// A single record could not be written to the store.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("persistence failed: {message}")]
pub struct PersistenceError {
    pub message: String,
}

impl PersistenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for PersistenceError {
    fn from(err: reqwest::Error) -> Self {
        PersistenceError::new(err.to_string())
    }
}

/// Failure to deliver the chain trigger for the next batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TriggerError {
    #[error("chain trigger could not be delivered but can be retried: {message}")]
    Retryable {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("chain trigger could not be delivered and cannot be retried: {0}")]
    NonRetryable(String),
}
