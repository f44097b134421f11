//! Crate-wide error taxonomy
//!
//! `EngineError` is the single error type shared by the front, orchestrator,
//! and worker binaries. It sits above the backend-specific leaf errors
//! (`CacheError`, `TopicError`) and encodes the kinds a caller actually needs
//! to branch on, each carrying the `requestId` it happened for where one
//! exists.

use uuid::Uuid;

use crate::data::cache::CacheError;
use crate::data::topics::TopicError;

/// Crate-wide error kind.
///
/// Deliberately a flat enum of *kinds*, not a tree of backend-specific
/// variants: callers branch on this to decide HTTP status, retry policy, or
/// terminal-failure handling.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("not found{}", request_id.map(|id| format!(" (requestId={id})")).unwrap_or_default())]
    NotFound { request_id: Option<Uuid> },

    #[error("gone (ttl expired){}", request_id.map(|id| format!(" (requestId={id})")).unwrap_or_default())]
    Gone { request_id: Option<Uuid> },

    #[error("not ready{}", request_id.map(|id| format!(" (requestId={id})")).unwrap_or_default())]
    NotReady { request_id: Option<Uuid> },

    #[error("idempotency key conflict: key already mapped to a different payload")]
    IdempotencyConflict { request_id: Option<Uuid> },

    #[error("datastore unavailable: {message}")]
    DatastoreUnavailable { message: String },

    #[error("task failed{}: {message}", request_id.map(|id| format!(" (requestId={id})")).unwrap_or_default())]
    TaskFailure {
        request_id: Option<Uuid>,
        message: String,
    },

    #[error("retry budget exhausted{}", request_id.map(|id| format!(" (requestId={id})")).unwrap_or_default())]
    RetryBudgetExhausted { request_id: Option<Uuid> },

    #[error("timed out{}", request_id.map(|id| format!(" (requestId={id})")).unwrap_or_default())]
    Timeout { request_id: Option<Uuid> },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn not_found(request_id: Option<Uuid>) -> Self {
        Self::NotFound { request_id }
    }

    pub fn gone(request_id: Option<Uuid>) -> Self {
        Self::Gone { request_id }
    }

    /// The `requestId` this error concerns, if any.
    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            Self::NotFound { request_id }
            | Self::Gone { request_id }
            | Self::NotReady { request_id }
            | Self::IdempotencyConflict { request_id }
            | Self::TaskFailure { request_id, .. }
            | Self::RetryBudgetExhausted { request_id }
            | Self::Timeout { request_id } => *request_id,
            _ => None,
        }
    }

    /// Whether a background consumer should back off and retry rather than
    /// treat this as a handler/processing failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DatastoreUnavailable { .. })
    }
}

// Cache/topic backend errors surface as `DatastoreUnavailable` — both are
// infrastructure failures the caller can only retry or back off on.
impl From<CacheError> for EngineError {
    fn from(e: CacheError) -> Self {
        EngineError::DatastoreUnavailable {
            message: e.to_string(),
        }
    }
}

impl From<TopicError> for EngineError {
    fn from(e: TopicError) -> Self {
        EngineError::DatastoreUnavailable {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_extraction() {
        let id = Uuid::new_v4();
        let err = EngineError::NotFound {
            request_id: Some(id),
        };
        assert_eq!(err.request_id(), Some(id));

        let err = EngineError::InvalidInput {
            message: "bad xml".into(),
        };
        assert_eq!(err.request_id(), None);
    }

    #[test]
    fn test_is_transient() {
        assert!(
            EngineError::DatastoreUnavailable {
                message: "timeout".into()
            }
            .is_transient()
        );
        assert!(!EngineError::Internal { message: "x".into() }.is_transient());
    }

    #[test]
    fn test_cache_error_conversion() {
        let cache_err = CacheError::Connection("refused".into());
        let engine_err: EngineError = cache_err.into();
        assert!(matches!(
            engine_err,
            EngineError::DatastoreUnavailable { .. }
        ));
    }
}
