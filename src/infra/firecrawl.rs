use crate::app::ports::{ScrapeBackendPort, ScrapedPage};
use crate::common::error::{ExtractionError, Result, ScraperError};
use crate::infra::http_client::{build_client, classify_status, transport_error};
use crate::registry::FetchOptions;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: Vec<&'static str>,
    wait_for: u64,
    only_main_content: bool,
}

#[derive(Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<ScrapeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize, Default)]
struct ScrapeData {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    links: Vec<String>,
}

/// Rendering backend: returns page markdown plus outbound links.
pub struct FirecrawlClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl FirecrawlClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(ScraperError::Config("scrape backend URL is empty".to_string()));
        }
        Ok(Self {
            client: build_client(crate::common::constants::DEFAULT_USER_AGENT, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl ScrapeBackendPort for FirecrawlClient {
    async fn scrape(&self, url: &str, options: &FetchOptions) -> std::result::Result<ScrapedPage, ExtractionError> {
        let mut formats = vec!["markdown"];
        if options.include_links {
            formats.push("links");
        }
        let body = ScrapeRequest {
            url,
            formats,
            wait_for: options.wait_ms,
            only_main_content: true,
        };
        let mut request = self.client.post(format!("{}/v1/scrape", self.base_url)).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify_status(status, &headers, &text));
        }

        let parsed: ScrapeResponse =
            serde_json::from_str(&text).map_err(|e| ExtractionError::Parse(e.to_string()))?;
        if !parsed.success {
            return Err(ExtractionError::Transient(
                parsed.error.unwrap_or_else(|| "scrape reported failure".to_string()),
            ));
        }
        let data = parsed.data.unwrap_or_default();
        debug!(
            "Scraped {}: {} chars, {} links",
            url,
            data.markdown.as_deref().map_or(0, str::len),
            data.links.len()
        );
        Ok(ScrapedPage {
            markdown: data.markdown,
            links: data.links,
        })
    }
}
