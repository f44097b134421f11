// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "Valuation Engine";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "valuation_engine";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".valuation-engine";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "valuation-engine.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "VALENGINE_CONFIG";

// =============================================================================
// Environment Variables - Debug / Logging
// =============================================================================

/// Environment variable for debug mode
pub const ENV_DEBUG: &str = "VALENGINE_DEBUG";

/// Environment variable for the tracing filter (falls back to RUST_LOG)
pub const ENV_LOG: &str = "VALENGINE_LOG";

// =============================================================================
// Environment Variables - HTTP server (Front Orchestrator)
// =============================================================================

pub const ENV_HOST: &str = "VALENGINE_HOST";
pub const ENV_PORT: &str = "VALENGINE_PORT";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;

/// Whether the front binary exposes the HTTP surface at all (always true in
/// practice; kept configurable for running F purely as a stream producer in
/// tests).
pub const ENV_ENABLE_HTTP: &str = "VALENGINE_ENABLE_HTTP";

/// Default request body limit (1 MiB), per the payload size invariant.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;
pub const ENV_PAYLOAD_MAX_BYTES: &str = "VALENGINE_PAYLOAD_MAX_BYTES";

// =============================================================================
// Cache backend
// =============================================================================

/// Prefix applied to every cache key, so a flushed/rotated key schema never
/// collides with a previous version's entries.
pub const CACHE_KEY_VERSION: &str = "v1";

pub const ENV_CACHE_BACKEND: &str = "VALENGINE_CACHE_BACKEND";
pub const ENV_CACHE_MAX_ENTRIES: &str = "VALENGINE_CACHE_MAX_ENTRIES";
pub const ENV_CACHE_EVICTION_POLICY: &str = "VALENGINE_CACHE_EVICTION_POLICY";
pub const ENV_CACHE_REDIS_URL: &str = "VALENGINE_CACHE_REDIS_URL";

pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 100_000;

// =============================================================================
// Topics backend
// =============================================================================

pub const ENV_TOPICS_BACKEND: &str = "VALENGINE_TOPICS_BACKEND";
pub const ENV_TOPICS_REDIS_URL: &str = "VALENGINE_TOPICS_REDIS_URL";

pub const ENV_TOPIC_BUFFER_SIZE: &str = "VALENGINE_TOPIC_BUFFER_SIZE";
pub const ENV_TOPIC_CHANNEL_CAPACITY: &str = "VALENGINE_TOPIC_CHANNEL_CAPACITY";
pub const DEFAULT_TOPIC_BUFFER_SIZE: usize = 64 * 1024 * 1024;
pub const DEFAULT_TOPIC_CHANNEL_CAPACITY: usize = 4096;

/// Stream carrying newly ingested requests from F to R.
pub const STREAM_REQUEST_INVOKE: &str = "stream:request:invoke";
pub const CONSUMER_GROUP_REQUEST_ORCHESTRATORS: &str = "request-orchestrators";
/// F's own ingress consumer group on the same stream (state-init + received
/// lifecycle), independent of R's delivery cursor above.
pub const CONSUMER_GROUP_FRONT_INGRESS: &str = "front-ingress";

/// Stream carrying task dispatches from R to W.
pub const STREAM_TASK_DISPATCH: &str = "stream:task:dispatch";
pub const CONSUMER_GROUP_TASK_WORKERS: &str = "task-workers";

/// Stream carrying task completion/failure updates from W back to R.
pub const STREAM_TASK_UPDATES: &str = "stream:task:updates";
pub const CONSUMER_GROUP_TASK_UPDATE_LISTENERS: &str = "task-update-listeners";

/// Broadcast topic carrying request lifecycle events (R -> F sync-waiters).
pub const TOPIC_REQUEST_LIFECYCLE: &str = "topic:request:lifecycle";

// =============================================================================
// Workflow timing and limits
// =============================================================================

pub const ENV_SYNC_WAIT_TIMEOUT_MS: &str = "VALENGINE_SYNC_WAIT_TIMEOUT_MS";
pub const DEFAULT_SYNC_WAIT_TIMEOUT_MS: u64 = 30_000;

pub const ENV_REQUEST_TTL_SECONDS: &str = "VALENGINE_REQUEST_TTL_SECONDS";
pub const DEFAULT_REQUEST_TTL_SECONDS: u64 = 3600;

pub const ENV_LIFECYCLE_BLOCK_MS: &str = "VALENGINE_LIFECYCLE_BLOCK_MS";
pub const DEFAULT_LIFECYCLE_BLOCK_MS: u64 = 1_000;

pub const ENV_REQUEST_STREAM_BLOCK_MS: &str = "VALENGINE_REQUEST_STREAM_BLOCK_MS";
pub const DEFAULT_REQUEST_STREAM_BLOCK_MS: u64 = 5_000;

pub const ENV_MAX_TASK_RETRIES: &str = "VALENGINE_MAX_TASK_RETRIES";
pub const DEFAULT_MAX_TASK_RETRIES: u32 = 3;

pub const ENV_TASK_WAIT_TIMEOUT_MS: &str = "VALENGINE_TASK_WAIT_TIMEOUT_MS";
pub const DEFAULT_TASK_WAIT_TIMEOUT_MS: u64 = 15_000;

/// Minimum idle time before a stuck stream message becomes eligible for reclaim.
pub const STUCK_MESSAGE_MIN_IDLE_MS: u64 = 30_000;
/// How often a consumer polls for stuck messages to reclaim.
pub const CLAIM_POLL_INTERVAL_MS: u64 = 10_000;
/// Maximum stuck messages reclaimed in a single poll.
pub const STUCK_MESSAGE_CLAIM_BATCH: usize = 100;

// =============================================================================
// Shutdown
// =============================================================================

pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
