use crate::common::error::{ExtractionError, Result, ScraperError};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;

/// Shared client for one backend: fixed agent, timeout and compression.
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .gzip(true)
        .build()
        .map_err(ScraperError::Http)
}

/// `Retry-After` in its delta-seconds form. HTTP dates are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Maps a non-success response from the scraping or extraction backend.
///
/// 402 and a 429 carrying `insufficient_quota` mean the plan is spent for
/// this run; any other 429 is a plain rate limit.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> ExtractionError {
    let lowered = body.to_lowercase();
    match status {
        StatusCode::PAYMENT_REQUIRED => ExtractionError::QuotaExhausted,
        StatusCode::TOO_MANY_REQUESTS
            if lowered.contains("insufficient_quota") || lowered.contains("quota exceeded") =>
        {
            ExtractionError::QuotaExhausted
        }
        StatusCode::TOO_MANY_REQUESTS => ExtractionError::RateLimited {
            retry_after: retry_after(headers),
        },
        _ => ExtractionError::Transient(format!("HTTP {}: {}", status.as_u16(), snippet(body))),
    }
}

pub fn transport_error(err: reqwest::Error) -> ExtractionError {
    if err.is_timeout() {
        ExtractionError::Transient(format!("timed out: {}", err))
    } else {
        ExtractionError::Transient(err.to_string())
    }
}

/// First 200 characters of a response body, for log messages.
pub fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(200) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
