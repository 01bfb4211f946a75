use crate::app::ports::{ExtractionPort, ExtractionRequest, RawEvent};
use crate::common::error::{ExtractionError, Result, ScraperError};
use crate::infra::http_client::{build_client, classify_status, transport_error};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

const SYSTEM_PREAMBLE: &str = "You extract live events from listing pages. \
Return only events that appear on the page. Use ISO 8601 dates. \
Use null for anything the page does not state.";

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Deserialize)]
struct EventsEnvelope {
    #[serde(default)]
    events: Vec<RawEvent>,
}

/// Structured extraction through an OpenAI-compatible chat completions API.
pub struct ChatExtractionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatExtractionClient {
    pub fn new(base_url: &str, api_key: Option<String>, model: &str, timeout: Duration) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(ScraperError::Config("extraction model is empty".to_string()));
        }
        Ok(Self {
            client: build_client(crate::common::constants::DEFAULT_USER_AGENT, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    fn body(&self, request: &ExtractionRequest) -> Value {
        let mut user = format!(
            "Source: {}\nURL: {}\nCategory: {}\n\n{}\n\nPage content:\n{}",
            request.source_name, request.source_url, request.category, request.instruction, request.content
        );
        if !request.links.is_empty() {
            user.push_str("\n\nLinks on the page:\n");
            user.push_str(&request.links.join("\n"));
        }
        json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PREAMBLE },
                { "role": "user", "content": user },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": "event_listing", "strict": true, "schema": event_schema() },
            },
        })
    }
}

/// Output schema for one page: `{ "events": [...] }`.
pub fn event_schema() -> Value {
    let nullable_string = json!({ "type": ["string", "null"] });
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["events"],
        "properties": {
            "events": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["artist", "venue", "date", "ticket_url", "ticket_sale_date", "tickets_available", "image_url"],
                    "properties": {
                        "artist": { "type": "string" },
                        "venue": { "type": "string" },
                        "date": { "type": "string" },
                        "ticket_url": nullable_string,
                        "ticket_sale_date": nullable_string,
                        "tickets_available": { "type": ["boolean", "null"] },
                        "image_url": nullable_string,
                    }
                }
            }
        }
    })
}

/// Reads the events array out of the first choice.
fn parse_events(body: &str) -> std::result::Result<Vec<RawEvent>, ExtractionError> {
    let response: ChatResponse = serde_json::from_str(body).map_err(|e| ExtractionError::Parse(e.to_string()))?;
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| ExtractionError::Parse("response has no choices".to_string()))?;
    if let Some(refusal) = message.refusal {
        return Err(ExtractionError::Parse(format!("model refused: {}", refusal)));
    }
    let content = message
        .content
        .ok_or_else(|| ExtractionError::Parse("response has no content".to_string()))?;
    let envelope: EventsEnvelope =
        serde_json::from_str(&content).map_err(|e| ExtractionError::Parse(e.to_string()))?;
    Ok(envelope.events)
}

#[async_trait]
impl ExtractionPort for ChatExtractionClient {
    #[instrument(skip(self, request), fields(source = %request.source_name, url = %request.source_url))]
    async fn extract_events(&self, request: &ExtractionRequest) -> std::result::Result<Vec<RawEvent>, ExtractionError> {
        let mut call = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&self.body(request));
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let response = call.send().await.map_err(transport_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify_status(status, &headers, &text));
        }
        let events = parse_events(&text)?;
        debug!("Extraction returned {} raw events", events.len());
        Ok(events)
    }
}
