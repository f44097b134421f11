//! Data storage layer
//!
//! Provides the two datastore facets the workflow engine needs:
//! - `cache` — the key/value cache (request/task payloads, orchestration
//!   state, idempotency mappings), backed by in-memory or Redis
//! - `topics` — streams and pub/sub (invocation, task dispatch, task
//!   updates, lifecycle broadcast), backed by in-memory or Redis

pub mod cache;
pub mod topics;
