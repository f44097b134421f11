use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::{CacheBackendType, EvictionPolicy};
use super::constants::{
    ENV_CACHE_BACKEND, ENV_CACHE_EVICTION_POLICY, ENV_CACHE_MAX_ENTRIES, ENV_CACHE_REDIS_URL,
    ENV_CONFIG, ENV_DEBUG, ENV_ENABLE_HTTP, ENV_HOST, ENV_LIFECYCLE_BLOCK_MS,
    ENV_MAX_TASK_RETRIES, ENV_PAYLOAD_MAX_BYTES, ENV_PORT, ENV_REQUEST_STREAM_BLOCK_MS,
    ENV_REQUEST_TTL_SECONDS, ENV_SYNC_WAIT_TIMEOUT_MS, ENV_TASK_WAIT_TIMEOUT_MS,
    ENV_TOPICS_BACKEND, ENV_TOPICS_REDIS_URL,
};

#[derive(Parser)]
#[command(name = "valuation-engine")]
#[command(version, about = "Distributed valuation workflow orchestration engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP bind host (front orchestrator only)
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// HTTP bind port (front orchestrator only)
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Enable the HTTP ingress surface
    #[arg(long, global = true, env = ENV_ENABLE_HTTP)]
    pub enable_http: Option<bool>,

    /// Enable debug logging
    #[arg(long, global = true, env = ENV_DEBUG)]
    pub debug: Option<bool>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    // Cache options
    /// Cache backend (memory or redis)
    #[arg(long, global = true, env = ENV_CACHE_BACKEND, value_parser = parse_cache_backend_type)]
    pub cache_backend: Option<CacheBackendType>,

    /// Maximum number of cache entries (memory backend only)
    #[arg(long, global = true, env = ENV_CACHE_MAX_ENTRIES)]
    pub cache_max_entries: Option<u64>,

    /// Cache eviction policy (tinylfu or lru)
    #[arg(long, global = true, env = ENV_CACHE_EVICTION_POLICY, value_parser = parse_eviction_policy)]
    pub cache_eviction_policy: Option<EvictionPolicy>,

    /// Redis-compatible cache URL
    #[arg(long, global = true, env = ENV_CACHE_REDIS_URL)]
    pub cache_redis_url: Option<String>,

    // Topics (streams + pub/sub) options
    /// Topics backend (memory or redis)
    #[arg(long, global = true, env = ENV_TOPICS_BACKEND, value_parser = parse_cache_backend_type)]
    pub topics_backend: Option<CacheBackendType>,

    /// Redis-compatible topics URL
    #[arg(long, global = true, env = ENV_TOPICS_REDIS_URL)]
    pub topics_redis_url: Option<String>,

    // Workflow timing options
    /// How long F blocks waiting for a request's terminal lifecycle event, in ms
    #[arg(long, global = true, env = ENV_SYNC_WAIT_TIMEOUT_MS)]
    pub sync_wait_timeout_ms: Option<u64>,

    /// TTL applied to cached request/task XML and results, in seconds
    #[arg(long, global = true, env = ENV_REQUEST_TTL_SECONDS)]
    pub request_ttl_seconds: Option<u64>,

    /// Block duration for F's subscribe-and-wait on the lifecycle topic, in ms
    #[arg(long, global = true, env = ENV_LIFECYCLE_BLOCK_MS)]
    pub lifecycle_block_ms: Option<u64>,

    /// Block duration for R's consumer-group read on the invocation stream, in ms
    #[arg(long, global = true, env = ENV_REQUEST_STREAM_BLOCK_MS)]
    pub request_stream_block_ms: Option<u64>,

    /// Total attempt budget per task (first attempt + retries)
    #[arg(long, global = true, env = ENV_MAX_TASK_RETRIES)]
    pub max_task_retries: Option<u32>,

    /// How long R waits for a dispatched task's update before treating it as stuck, in ms
    #[arg(long, global = true, env = ENV_TASK_WAIT_TIMEOUT_MS)]
    pub task_wait_timeout_ms: Option<u64>,

    /// Maximum accepted request body size, in bytes
    #[arg(long, global = true, env = ENV_PAYLOAD_MAX_BYTES)]
    pub payload_max_bytes: Option<usize>,
}

/// Parse cache backend type from CLI/env string
fn parse_cache_backend_type(s: &str) -> Result<CacheBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(CacheBackendType::Memory),
        "redis" => Ok(CacheBackendType::Redis),
        _ => Err(format!(
            "Invalid backend '{}'. Valid options: memory, redis",
            s
        )),
    }
}

/// Parse eviction policy from CLI/env string
fn parse_eviction_policy(s: &str) -> Result<EvictionPolicy, String> {
    match s.to_lowercase().as_str() {
        "tinylfu" => Ok(EvictionPolicy::TinyLfu),
        "lru" => Ok(EvictionPolicy::Lru),
        _ => Err(format!(
            "Invalid eviction policy '{}'. Valid options: tinylfu, lru",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the server (default command)
    Start,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub enable_http: Option<bool>,
    pub debug: Option<bool>,
    pub config_path: Option<PathBuf>,
    pub cache_backend: Option<CacheBackendType>,
    pub cache_max_entries: Option<u64>,
    pub cache_eviction_policy: Option<EvictionPolicy>,
    pub cache_redis_url: Option<String>,
    pub topics_backend: Option<CacheBackendType>,
    pub topics_redis_url: Option<String>,
    pub sync_wait_timeout_ms: Option<u64>,
    pub request_ttl_seconds: Option<u64>,
    pub lifecycle_block_ms: Option<u64>,
    pub request_stream_block_ms: Option<u64>,
    pub max_task_retries: Option<u32>,
    pub task_wait_timeout_ms: Option<u64>,
    pub payload_max_bytes: Option<usize>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        enable_http: cli.enable_http,
        debug: cli.debug,
        config_path: cli.config,
        cache_backend: cli.cache_backend,
        cache_max_entries: cli.cache_max_entries,
        cache_eviction_policy: cli.cache_eviction_policy,
        cache_redis_url: cli.cache_redis_url,
        topics_backend: cli.topics_backend,
        topics_redis_url: cli.topics_redis_url,
        sync_wait_timeout_ms: cli.sync_wait_timeout_ms,
        request_ttl_seconds: cli.request_ttl_seconds,
        lifecycle_block_ms: cli.lifecycle_block_ms,
        request_stream_block_ms: cli.request_stream_block_ms,
        max_task_retries: cli.max_task_retries,
        task_wait_timeout_ms: cli.task_wait_timeout_ms,
        payload_max_bytes: cli.payload_max_bytes,
    };
    (config, cli.command)
}
