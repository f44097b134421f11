//! Shared API types: the `{error, code, message}` envelope and request/
//! response bodies for the four HTTP endpoints.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Standard API error response, `{error, code, message}`.
///
/// Unlike a blanket `EngineError -> ApiError` mapping, the same
/// `EngineError` kind maps to different status codes depending on which
/// endpoint produced it (`NotReady` is a 404 at `/results` and never
/// surfaces elsewhere; sync submission failures split `422`/`500` on
/// whether failure detail was recorded) — see each handler.
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: String, message: String },
    PayloadTooLarge { code: String, message: String },
    NotFound { code: String, message: String },
    Gone { code: String, message: String },
    UnprocessableEntity { code: String, message: String },
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn gone(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Gone {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unprocessable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnprocessableEntity {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Fallback mapping for call sites that don't need per-endpoint branching
/// (the status endpoint only ever sees `NotFound`/`DatastoreUnavailable`).
impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidInput { message } => Self::bad_request("INVALID_INPUT", message),
            EngineError::PayloadTooLarge { size, limit } => Self::PayloadTooLarge {
                code: "PAYLOAD_TOO_LARGE".to_string(),
                message: format!("payload of {size} bytes exceeds the {limit} byte limit"),
            },
            EngineError::NotFound { .. } => {
                Self::not_found("NOT_FOUND", "request not found")
            }
            EngineError::Gone { .. } => Self::gone("GONE", "request has expired"),
            EngineError::NotReady { .. } => Self::not_found("NOT_FOUND", "request not found"),
            EngineError::IdempotencyConflict { request_id } => Self::unprocessable(
                "IDEMPOTENCY_CONFLICT",
                format!(
                    "idempotency key already used for a different payload{}",
                    request_id
                        .map(|id| format!(" (requestId={id})"))
                        .unwrap_or_default()
                ),
            ),
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match self {
            Self::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, "bad_request", code, message)
            }
            Self::PayloadTooLarge { code, message } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                code,
                message,
            ),
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, "not_found", code, message),
            Self::Gone { code, message } => (StatusCode::GONE, "gone", code, message),
            Self::UnprocessableEntity { code, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "unprocessable",
                code,
                message,
            ),
            Self::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "INTERNAL".to_string(),
                message,
            ),
        };
        (
            status,
            Json(serde_json::json!({
                "error": error_type,
                "code": code,
                "message": message
            })),
        )
            .into_response()
    }
}

/// Query parameters for `POST /valuation`.
#[derive(Debug, Deserialize)]
pub struct SubmitQuery {
    #[serde(default)]
    pub sync: Option<String>,
}

impl SubmitQuery {
    /// Parses `?sync=`, accepting `Y`/`N` (any case) and defaulting to async
    /// when absent. Any other value is rejected by the caller with a 400
    /// rather than silently treated as async.
    pub fn is_sync(&self) -> Result<bool, ()> {
        match self.sync.as_deref() {
            None => Ok(false),
            Some(v) if v.eq_ignore_ascii_case("Y") => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("N") => Ok(false),
            Some(_) => Err(()),
        }
    }
}

/// `POST /valuation` response body for the async path.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    pub request_id: Uuid,
    pub status: &'static str,
}

impl AcceptedResponse {
    pub fn accepted(request_id: Uuid) -> Self {
        Self {
            request_id,
            status: "accepted",
        }
    }

    pub fn pending(request_id: Uuid) -> Self {
        Self {
            request_id,
            status: "pending",
        }
    }
}

/// `GET /healthz` response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}
