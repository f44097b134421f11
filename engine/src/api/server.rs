//! API server initialization: the Front Orchestrator's HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Json;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;

use super::extractors::RequestIdPath;
use super::middleware::{self, AllowedOrigins};
use super::types::{AcceptedResponse, ApiError, HealthResponse, SubmitQuery};
use crate::core::{Runtime, ShutdownService};
use crate::domain::front::{FrontService, ResultsOutcome, SubmitOutcome};
use crate::error::EngineError;

#[derive(Clone)]
struct AppState {
    front: Arc<FrontService>,
}

pub struct ApiServer {
    front: Arc<FrontService>,
    host: String,
    port: u16,
    payload_max_bytes: usize,
    shutdown: ShutdownService,
}

impl ApiServer {
    pub fn new(rt: &Runtime, front: Arc<FrontService>) -> Self {
        Self {
            front,
            host: rt.config.server.host.clone(),
            port: rt.config.server.port,
            payload_max_bytes: rt.config.workflow.payload_max_bytes,
            shutdown: rt.shutdown.clone(),
        }
    }

    pub async fn start(self) -> Result<()> {
        let allowed_origins = AllowedOrigins::new(&self.host, self.port);
        let state = AppState { front: self.front };

        let router = Router::new()
            .route("/", get(|| async { Redirect::temporary("/healthz") }))
            .route("/healthz", get(healthz))
            .route("/valuation", post(submit))
            .route("/valuation/{request_id}/status", get(status))
            .route("/valuation/{request_id}/results", get(results))
            .with_state(state)
            .fallback(middleware::handle_404)
            .layer(CompressionLayer::new())
            .layer(middleware::cors(&allowed_origins))
            .layer(DefaultBodyLimit::max(self.payload_max_bytes));

        let addr = SocketAddr::new(self.host.parse()?, self.port);
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "front orchestrator listening");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(self.shutdown.wait())
        .await?;

        Ok(())
    }
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn submit(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let is_sync = match query.is_sync() {
        Ok(is_sync) => is_sync,
        Err(()) => {
            return ApiError::bad_request("INVALID_SYNC", "sync must be Y or N").into_response();
        }
    };

    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let metadata = extract_metadata_headers(&headers);

    match state.front.submit(body, is_sync, idempotency_key, metadata).await {
        Ok(SubmitOutcome::Accepted { request_id }) => {
            (StatusCode::ACCEPTED, Json(AcceptedResponse::accepted(request_id))).into_response()
        }
        Ok(SubmitOutcome::Pending { request_id }) => {
            (StatusCode::ACCEPTED, Json(AcceptedResponse::pending(request_id))).into_response()
        }
        Ok(SubmitOutcome::SyncSucceeded { response_xml, .. }) => (
            StatusCode::OK,
            [("content-type", "application/xml")],
            response_xml,
        )
            .into_response(),
        Ok(SubmitOutcome::SyncFailed { request_id, reason }) => match reason {
            Some(reason) => ApiError::unprocessable(
                "TASK_FAILURE",
                format!("request {request_id} failed: {reason}"),
            )
            .into_response(),
            None => {
                ApiError::internal(format!("request {request_id} failed")).into_response()
            }
        },
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Collect `X-*` request headers (excluding `Idempotency-Key`, which has its
/// own dedicated handling) as the request's metadata map.
fn extract_metadata_headers(headers: &HeaderMap) -> Option<std::collections::HashMap<String, String>> {
    let map: std::collections::HashMap<String, String> = headers
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            name.len() > 2 && name[..2].eq_ignore_ascii_case("x-")
        })
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    if map.is_empty() { None } else { Some(map) }
}

async fn status(
    State(state): State<AppState>,
    RequestIdPath(request_id): RequestIdPath,
) -> Response {
    match state.front.status(request_id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn results(
    State(state): State<AppState>,
    RequestIdPath(request_id): RequestIdPath,
) -> Response {
    match state.front.results(request_id).await {
        Ok(ResultsOutcome::Ready(xml)) => {
            (StatusCode::OK, [("content-type", "application/xml")], xml).into_response()
        }
        Ok(ResultsOutcome::Failed { reason }) => match reason {
            Some(reason) => ApiError::unprocessable(
                "TASK_FAILURE",
                format!("request {request_id} failed: {reason}"),
            )
            .into_response(),
            None => ApiError::unprocessable(
                "TASK_FAILURE",
                format!("request {request_id} failed"),
            )
            .into_response(),
        },
        Err(EngineError::Gone { .. }) => {
            ApiError::gone("GONE", "request has expired").into_response()
        }
        Err(EngineError::NotReady { .. }) | Err(EngineError::NotFound { .. }) => {
            ApiError::not_found("NOT_FOUND", "request not found or not ready").into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}
