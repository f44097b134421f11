//! Path extractors for the valuation API

use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::types::ApiError;

#[derive(Debug, Deserialize)]
struct RequestIdPathRaw {
    request_id: String,
}

/// Validated `{requestId}` path segment, parsed as a UUID.
pub struct RequestIdPath(pub Uuid);

impl<S> FromRequestParts<S> for RequestIdPath
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<RequestIdPathRaw>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::bad_request("INVALID_PATH", e.body_text()))?;

        let id = Uuid::parse_str(&raw.request_id)
            .map_err(|_| ApiError::bad_request("INVALID_REQUEST_ID", "requestId must be a UUID"))?;

        Ok(Self(id))
    }
}
