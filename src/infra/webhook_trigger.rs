use crate::app::ports::ChainTriggerPort;
use crate::common::error::{Result, ScraperError, TriggerError};
use crate::common::constants::DEFAULT_USER_AGENT;
use crate::infra::http_client::{retry_after, snippet};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;
use tracing::info;

/// Starts the next batch by POSTing a scrape trigger to this service's own
/// endpoint.
pub struct WebhookChainTrigger {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

/// Longest wait for the TCP/TLS handshake with the next instance.
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

impl WebhookChainTrigger {
    /// The connect timeout is kept below `timeout`, so a timeout that is not
    /// a connect error means the request reached the next instance.
    pub fn new(url: &str, secret: Option<String>, timeout: Duration) -> Result<Self> {
        reqwest::Url::parse(url).map_err(|e| ScraperError::Config(format!("invalid chain URL {}: {}", url, e)))?;
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(timeout)
            .connect_timeout((timeout / 2).min(MAX_CONNECT_TIMEOUT))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            secret,
        })
    }
}

#[async_trait]
impl ChainTriggerPort for WebhookChainTrigger {
    async fn trigger(&self, next_batch: u32) -> std::result::Result<(), TriggerError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&json!({ "batch": next_batch, "chain": true }));
        if let Some(secret) = &self.secret {
            request = request.bearer_auth(secret);
        }
        let response = match request.send().await {
            Ok(response) => response,
            // The receiving run answers only once its batch is done, so a
            // request that was sent and then timed out has been accepted.
            Err(e) if e.is_timeout() && !e.is_connect() => {
                info!("Chain trigger for batch {} sent; not waiting for the run to finish", next_batch);
                return Ok(());
            }
            Err(e) => {
                return Err(TriggerError::Retryable {
                    message: e.to_string(),
                    retry_after: None,
                })
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let hint = retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status.as_u16(), snippet(&body));
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(TriggerError::Retryable {
                message,
                retry_after: hint,
            })
        } else {
            Err(TriggerError::NonRetryable(message))
        }
    }
}

/// Stand-in used when no chain URL is configured: the intent is logged and
/// an operator starts the next batch.
pub struct LogOnlyTrigger;

#[async_trait]
impl ChainTriggerPort for LogOnlyTrigger {
    async fn trigger(&self, next_batch: u32) -> std::result::Result<(), TriggerError> {
        info!("No chain URL configured; batch {} must be triggered externally", next_batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn trigger_for(server: &MockServer, secret: Option<&str>) -> WebhookChainTrigger {
        WebhookChainTrigger::new(&server.url("/scrape"), secret.map(String::from), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_posts_next_batch_with_secret() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/scrape")
                    .header("authorization", "Bearer s3cret")
                    .json_body(json!({ "batch": 4, "chain": true }));
                then.status(202);
            })
            .await;

        trigger_for(&server, Some("s3cret")).trigger(4).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/scrape").json_body(json!({ "batch": 2, "chain": true }));
                then.status(503).header("Retry-After", "3");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/scrape").json_body(json!({ "batch": 3, "chain": true }));
                then.status(400).body("bad batch");
            })
            .await;

        let trigger = trigger_for(&server, None);
        match trigger.trigger(2).await {
            Err(TriggerError::Retryable { retry_after, .. }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(3)))
            }
            other => panic!("expected retryable, got {:?}", other),
        }
        assert!(matches!(trigger.trigger(3).await, Err(TriggerError::NonRetryable(_))));
    }

    #[tokio::test]
    async fn test_slow_answer_counts_as_delivered() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/scrape");
                then.status(200).delay(Duration::from_secs(3));
            })
            .await;

        let trigger =
            WebhookChainTrigger::new(&server.url("/scrape"), None, Duration::from_millis(500)).unwrap();
        assert_eq!(trigger.trigger(2).await, Ok(()));
    }

    #[tokio::test]
    async fn test_unreachable_instance_is_retryable_not_delivered() {
        // Bind then drop a listener so the port is known to be closed.
        let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let trigger = WebhookChainTrigger::new(
            &format!("http://127.0.0.1:{}/scrape", port),
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(matches!(trigger.trigger(2).await, Err(TriggerError::Retryable { .. })));
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(WebhookChainTrigger::new("not a url", None, Duration::from_secs(1)).is_err());
    }
}
