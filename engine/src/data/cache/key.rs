//! Type-safe cache key builder with versioning

use crate::core::constants::CACHE_KEY_VERSION;

/// Type-safe cache key builder
///
/// All keys are prefixed with a version (e.g., "v1:") to allow
/// invalidating all cached data on schema changes.
pub struct CacheKey;

impl CacheKey {
    // =========================================================================
    // Request-scoped payloads (written by F, read by R; TTL-capped)
    // =========================================================================

    /// Request payload XML, as submitted.
    pub fn request_xml(request_id: &str) -> String {
        format!("{}:cache:request:{}:xml", CACHE_KEY_VERSION, request_id)
    }

    /// Assembled response payload XML, for a completed request.
    pub fn request_response(request_id: &str) -> String {
        format!(
            "{}:cache:request:{}:response",
            CACHE_KEY_VERSION, request_id
        )
    }

    /// Submission-time metadata (headers, caller-supplied fields).
    pub fn request_metadata(request_id: &str) -> String {
        format!(
            "{}:cache:request:{}:metadata",
            CACHE_KEY_VERSION, request_id
        )
    }

    /// Failure detail for a request that ended in a failed terminal state.
    pub fn request_failure(request_id: &str) -> String {
        format!(
            "{}:cache:request:{}:failure",
            CACHE_KEY_VERSION, request_id
        )
    }

    // =========================================================================
    // Task-scoped payloads (written by R, read by W; TTL-capped)
    // =========================================================================

    /// Hydrated task payload XML for task `task_id` in group `group`.
    pub fn task_xml(request_id: &str, group: u32, task_id: &str) -> String {
        format!(
            "{}:cache:task:{}:{}:{}:xml",
            CACHE_KEY_VERSION, request_id, group, task_id
        )
    }

    /// Task result payload, written by W on completion.
    pub fn task_result(request_id: &str, group: u32, task_id: &str) -> String {
        format!(
            "{}:cache:task:{}:{}:{}:result",
            CACHE_KEY_VERSION, request_id, group, task_id
        )
    }

    // =========================================================================
    // Orchestration state (single logical writer at any time)
    // =========================================================================

    /// Request-level state mapping (status, current group, timestamps).
    pub fn request_state(request_id: &str) -> String {
        format!("{}:state:request:{}", CACHE_KEY_VERSION, request_id)
    }

    /// Group-level state mapping (per-task attempt/result counters).
    pub fn group_state(request_id: &str, group: u32) -> String {
        format!(
            "{}:state:request:{}:group:{}",
            CACHE_KEY_VERSION, request_id, group
        )
    }

    /// Marks that a `requestId` was once accepted, with a longer TTL than the
    /// request's own state/payload keys. Lets status/results distinguish a
    /// request that expired (`Gone`) from one that never existed (`NotFound`)
    /// once the main state key itself is gone.
    pub fn request_tombstone(request_id: &str) -> String {
        format!("{}:tombstone:request:{}", CACHE_KEY_VERSION, request_id)
    }

    // =========================================================================
    // Idempotency
    // =========================================================================

    /// Maps a submitter-supplied idempotency key to the `requestId` it was
    /// first associated with. Written with set-if-absent semantics.
    pub fn idempotency(key: &str) -> String {
        format!("{}:idempotency:{}", CACHE_KEY_VERSION, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_keys() {
        assert_eq!(CacheKey::request_xml("r1"), "v1:cache:request:r1:xml");
        assert_eq!(
            CacheKey::request_response("r1"),
            "v1:cache:request:r1:response"
        );
        assert_eq!(
            CacheKey::request_metadata("r1"),
            "v1:cache:request:r1:metadata"
        );
        assert_eq!(
            CacheKey::request_failure("r1"),
            "v1:cache:request:r1:failure"
        );
    }

    #[test]
    fn test_task_keys() {
        assert_eq!(
            CacheKey::task_xml("r1", 0, "t1"),
            "v1:cache:task:r1:0:t1:xml"
        );
        assert_eq!(
            CacheKey::task_result("r1", 2, "t9"),
            "v1:cache:task:r1:2:t9:result"
        );
    }

    #[test]
    fn test_state_keys() {
        assert_eq!(CacheKey::request_state("r1"), "v1:state:request:r1");
        assert_eq!(
            CacheKey::group_state("r1", 3),
            "v1:state:request:r1:group:3"
        );
    }

    #[test]
    fn test_tombstone_key() {
        assert_eq!(
            CacheKey::request_tombstone("r1"),
            "v1:tombstone:request:r1"
        );
    }

    #[test]
    fn test_idempotency_key() {
        assert_eq!(
            CacheKey::idempotency("client-key-1"),
            "v1:idempotency:client-key-1"
        );
    }
}
