use crate::common::constants::DEFAULT_BATCH;
use crate::common::error::ScraperError;
use crate::pipeline::chain::ChainIntent;
use crate::pipeline::scheduler::{BatchReport, BatchScheduler, RunRequest};
use crate::registry::BatchSummary;
use axum::{
    body::Bytes,
    extract::Extension,
    http::{header::AUTHORIZATION, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use hyper::Server;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ServerState {
    pub scheduler: Arc<BatchScheduler>,
    /// Bearer token required on `POST /scrape` when set.
    pub secret: Option<String>,
}

/// Inbound scrape trigger. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScrapeTrigger {
    pub batch: Option<u32>,
    pub page: Option<u32>,
    pub chain: Option<bool>,
}

impl ScrapeTrigger {
    /// An empty body is the all-defaults trigger.
    pub fn from_body(body: &[u8]) -> Result<Self, ScraperError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| ScraperError::InvalidTrigger(format!("malformed trigger: {}", e)))
    }

    pub fn into_request(self) -> Result<RunRequest, ScraperError> {
        let batch = self.batch.unwrap_or(DEFAULT_BATCH);
        if batch == 0 {
            return Err(ScraperError::InvalidTrigger("batch numbers start at 1".to_string()));
        }
        if self.page == Some(0) {
            return Err(ScraperError::InvalidTrigger("page numbers start at 1".to_string()));
        }
        Ok(RunRequest {
            batch,
            page: self.page,
            chain: self.chain.unwrap_or(false),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResponse {
    pub success: bool,
    pub message: String,
    pub batch: Option<u32>,
    pub total_batches: u32,
    pub chain: Option<ChainIntent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<BatchReport>,
}

impl ScrapeResponse {
    fn failure(status: StatusCode, message: String, batch: Option<u32>, total_batches: u32) -> Response {
        let body = ScrapeResponse {
            success: false,
            message,
            batch,
            total_batches,
            chain: None,
            report: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Health check endpoint
async fn health(Extension(state): Extension<ServerState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "gigs-scraper",
        "version": env!("CARGO_PKG_VERSION"),
        "scheduler": state.scheduler.state(),
        "totalBatches": state.scheduler.registry().total_batches(),
    }))
}

async fn batches(Extension(state): Extension<ServerState>) -> Json<Vec<BatchSummary>> {
    Json(state.scheduler.registry().summaries())
}

fn authorized(state: &ServerState, headers: &HeaderMap) -> bool {
    let Some(secret) = &state.secret else {
        return true;
    };
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map_or(false, |token| token == secret)
}

async fn scrape(
    Extension(state): Extension<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let total_batches = state.scheduler.registry().total_batches();
    if !authorized(&state, &headers) {
        return ScrapeResponse::failure(StatusCode::UNAUTHORIZED, "missing or wrong bearer token".into(), None, total_batches);
    }
    let request = match ScrapeTrigger::from_body(&body).and_then(ScrapeTrigger::into_request) {
        Ok(request) => request,
        Err(e) => return ScrapeResponse::failure(StatusCode::BAD_REQUEST, e.to_string(), None, total_batches),
    };

    info!("Scrape triggered for batch {} (chain: {})", request.batch, request.chain);
    match state.scheduler.run_batch(request).await {
        Ok(run) => {
            // The chain task keeps running on the server runtime after we answer.
            let report = run.report;
            let body = ScrapeResponse {
                success: true,
                message: report.summary(),
                batch: Some(report.batch),
                total_batches: report.total_batches,
                chain: report.chain.clone(),
                report: Some(report),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(ScraperError::InvalidTrigger(message)) => {
            ScrapeResponse::failure(StatusCode::BAD_REQUEST, message, Some(request.batch), total_batches)
        }
        Err(e @ ScraperError::RunInProgress(_)) => {
            info!("Rejecting trigger for batch {}: {}", request.batch, e);
            ScrapeResponse::failure(StatusCode::CONFLICT, e.to_string(), Some(request.batch), total_batches)
        }
        Err(e @ ScraperError::BackendUnavailable(_)) => {
            warn!("Batch {} not run: {}", request.batch, e);
            ScrapeResponse::failure(StatusCode::SERVICE_UNAVAILABLE, e.to_string(), Some(request.batch), total_batches)
        }
        Err(e) => ScrapeResponse::failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            e.to_string(),
            Some(request.batch),
            total_batches,
        ),
    }
}

/// Create the HTTP server with all routes
pub fn create_server(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/batches", get(batches))
        .route("/scrape", post(scrape))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
}

/// Start the HTTP server on the specified port
pub async fn start_server(state: ServerState, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_server(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("HTTP server running on http://localhost:{port}");
    info!("Health check: http://localhost:{port}/health");
    info!("Scrape trigger: POST http://localhost:{port}/scrape");

    Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_defaults_to_first_batch_without_chain() {
        let request = ScrapeTrigger::default().into_request().unwrap();
        assert_eq!(
            request,
            RunRequest {
                batch: DEFAULT_BATCH,
                page: None,
                chain: false
            }
        );
    }

    #[test]
    fn test_zero_batch_and_page_are_rejected() {
        let zero_batch = ScrapeTrigger {
            batch: Some(0),
            ..Default::default()
        };
        assert!(matches!(zero_batch.into_request(), Err(ScraperError::InvalidTrigger(_))));
        let zero_page = ScrapeTrigger {
            page: Some(0),
            ..Default::default()
        };
        assert!(matches!(zero_page.into_request(), Err(ScraperError::InvalidTrigger(_))));
    }

    #[test]
    fn test_trigger_body_parsing() {
        let trigger = ScrapeTrigger::from_body(br#"{"batch":3,"chain":true}"#).unwrap();
        assert_eq!(trigger.batch, Some(3));
        assert_eq!(trigger.chain, Some(true));
        assert_eq!(trigger.page, None);

        assert_eq!(ScrapeTrigger::from_body(b"").unwrap().batch, None);
        assert!(matches!(
            ScrapeTrigger::from_body(br#"{"batch":"three"}"#),
            Err(ScraperError::InvalidTrigger(_))
        ));
    }
}
