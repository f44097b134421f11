//! Layered application configuration
//!
//! Configuration is assembled in increasing priority order:
//! 1. Built-in defaults
//! 2. Profile config file (`~/.valuation-engine/valuation-engine.json`)
//! 3. Local/explicit config file (`./valuation-engine.json` or `--config <path>`)
//! 4. CLI flags / environment variables (clap binds `env = ...` per field)

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_BODY_LIMIT, DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_HOST,
    DEFAULT_LIFECYCLE_BLOCK_MS, DEFAULT_MAX_TASK_RETRIES, DEFAULT_PORT,
    DEFAULT_REQUEST_STREAM_BLOCK_MS, DEFAULT_REQUEST_TTL_SECONDS, DEFAULT_SYNC_WAIT_TIMEOUT_MS,
    DEFAULT_TASK_WAIT_TIMEOUT_MS,
};

// =============================================================================
// Cache Backend Enum
// =============================================================================

/// Cache backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for CacheBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackendType::Memory => write!(f, "memory"),
            CacheBackendType::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// Eviction Policy Enum
// =============================================================================

/// Cache eviction policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// TinyLFU - LRU eviction + LFU admission (near-optimal hit ratio)
    #[default]
    TinyLfu,
    /// Simple LRU (better for recency-biased workloads)
    Lru,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::TinyLfu => write!(f, "tinylfu"),
            EvictionPolicy::Lru => write!(f, "lru"),
        }
    }
}

// =============================================================================
// Runtime config structs
// =============================================================================

/// HTTP server configuration (Front Orchestrator only)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_http: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            enable_http: true,
        }
    }
}

/// Cache configuration, shared by all three binaries
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendType,
    pub max_entries: u64,
    pub eviction_policy: EvictionPolicy,
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendType::Memory,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            eviction_policy: EvictionPolicy::TinyLfu,
            redis_url: None,
        }
    }
}

/// Topics (streams + pub/sub) configuration, shared by all three binaries
#[derive(Debug, Clone)]
pub struct TopicsConfig {
    pub backend: CacheBackendType,
    pub redis_url: Option<String>,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendType::Memory,
            redis_url: None,
        }
    }
}

/// Workflow timing and limits shared by F, R, and W
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// How long F blocks waiting for a request's terminal lifecycle event.
    pub sync_wait_timeout_ms: u64,
    /// TTL applied to cached request/task XML and results.
    pub request_ttl_seconds: u64,
    /// Block duration for F's subscribe-and-wait on the lifecycle topic.
    pub lifecycle_block_ms: u64,
    /// Block duration for R's XREADGROUP on the invocation stream.
    pub request_stream_block_ms: u64,
    /// Total attempt budget per task (first attempt + retries).
    pub max_task_retries: u32,
    /// How long R waits for a dispatched task's update before treating it as stuck.
    pub task_wait_timeout_ms: u64,
    /// Maximum accepted request body size, in bytes.
    pub payload_max_bytes: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            sync_wait_timeout_ms: DEFAULT_SYNC_WAIT_TIMEOUT_MS,
            request_ttl_seconds: DEFAULT_REQUEST_TTL_SECONDS,
            lifecycle_block_ms: DEFAULT_LIFECYCLE_BLOCK_MS,
            request_stream_block_ms: DEFAULT_REQUEST_STREAM_BLOCK_MS,
            max_task_retries: DEFAULT_MAX_TASK_RETRIES,
            task_wait_timeout_ms: DEFAULT_TASK_WAIT_TIMEOUT_MS,
            payload_max_bytes: DEFAULT_BODY_LIMIT,
        }
    }
}

/// Fully resolved application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub debug: bool,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub topics: TopicsConfig,
    pub workflow: WorkflowConfig,
}

// =============================================================================
// File-backed config (JSON on disk, all fields optional)
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub enable_http: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheFileConfig {
    pub backend: Option<CacheBackendType>,
    pub max_entries: Option<u64>,
    pub eviction_policy: Option<EvictionPolicy>,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TopicsFileConfig {
    pub backend: Option<CacheBackendType>,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorkflowFileConfig {
    pub sync_wait_timeout_ms: Option<u64>,
    pub request_ttl_seconds: Option<u64>,
    pub lifecycle_block_ms: Option<u64>,
    pub request_stream_block_ms: Option<u64>,
    pub max_task_retries: Option<u32>,
    pub task_wait_timeout_ms: Option<u64>,
    pub payload_max_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FileConfig {
    pub debug: Option<bool>,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub cache: CacheFileConfig,
    #[serde(default)]
    pub topics: TopicsFileConfig,
    #[serde(default)]
    pub workflow: WorkflowFileConfig,
}

impl FileConfig {
    /// Load and parse a config file, warning (not failing) on unknown top-level keys.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let value: serde_json::Value = serde_json::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        Self::warn_unknown_fields(&value);

        serde_json::from_value(value)
            .with_context(|| format!("interpreting config file {}", path.display()))
    }

    fn warn_unknown_fields(value: &serde_json::Value) {
        const KNOWN: &[&str] = &["debug", "server", "cache", "topics", "workflow"];
        if let Some(obj) = value.as_object() {
            for key in obj.keys() {
                if !KNOWN.contains(&key.as_str()) {
                    tracing::warn!(field = %key, "Unknown top-level config field, ignoring");
                }
            }
        }
    }

    /// Merge another file config on top of this one (later values win).
    fn merge(self, other: FileConfig) -> FileConfig {
        FileConfig {
            debug: other.debug.or(self.debug),
            server: ServerFileConfig {
                host: other.server.host.or(self.server.host),
                port: other.server.port.or(self.server.port),
                enable_http: other.server.enable_http.or(self.server.enable_http),
            },
            cache: CacheFileConfig {
                backend: other.cache.backend.or(self.cache.backend),
                max_entries: other.cache.max_entries.or(self.cache.max_entries),
                eviction_policy: other.cache.eviction_policy.or(self.cache.eviction_policy),
                redis_url: other.cache.redis_url.or(self.cache.redis_url),
            },
            topics: TopicsFileConfig {
                backend: other.topics.backend.or(self.topics.backend),
                redis_url: other.topics.redis_url.or(self.topics.redis_url),
            },
            workflow: WorkflowFileConfig {
                sync_wait_timeout_ms: other
                    .workflow
                    .sync_wait_timeout_ms
                    .or(self.workflow.sync_wait_timeout_ms),
                request_ttl_seconds: other
                    .workflow
                    .request_ttl_seconds
                    .or(self.workflow.request_ttl_seconds),
                lifecycle_block_ms: other
                    .workflow
                    .lifecycle_block_ms
                    .or(self.workflow.lifecycle_block_ms),
                request_stream_block_ms: other
                    .workflow
                    .request_stream_block_ms
                    .or(self.workflow.request_stream_block_ms),
                max_task_retries: other
                    .workflow
                    .max_task_retries
                    .or(self.workflow.max_task_retries),
                task_wait_timeout_ms: other
                    .workflow
                    .task_wait_timeout_ms
                    .or(self.workflow.task_wait_timeout_ms),
                payload_max_bytes: other
                    .workflow
                    .payload_max_bytes
                    .or(self.workflow.payload_max_bytes),
            },
        }
    }
}

impl AppConfig {
    /// Resolve the fully-layered configuration: defaults -> profile file ->
    /// local/explicit file -> CLI flags/env vars.
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let mut file = FileConfig::default();

        if let Some(profile_path) = profile_config_path() {
            if profile_path.exists() {
                file = file.merge(FileConfig::load_from_file(&profile_path)?);
            }
        }

        let local_path = cli
            .config_path
            .clone()
            .map(|p| expand_path(&p))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        if local_path.exists() {
            file = file.merge(FileConfig::load_from_file(&local_path)?);
        }

        Ok(Self {
            debug: cli.debug.or(file.debug).unwrap_or(false),
            server: ServerConfig {
                host: cli
                    .host
                    .clone()
                    .or(file.server.host)
                    .unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: cli.port.or(file.server.port).unwrap_or(DEFAULT_PORT),
                enable_http: cli
                    .enable_http
                    .or(file.server.enable_http)
                    .unwrap_or(true),
            },
            cache: CacheConfig {
                backend: cli
                    .cache_backend
                    .or(file.cache.backend)
                    .unwrap_or_default(),
                max_entries: cli
                    .cache_max_entries
                    .or(file.cache.max_entries)
                    .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
                eviction_policy: cli
                    .cache_eviction_policy
                    .or(file.cache.eviction_policy)
                    .unwrap_or_default(),
                redis_url: cli.cache_redis_url.clone().or(file.cache.redis_url),
            },
            topics: TopicsConfig {
                backend: cli
                    .topics_backend
                    .or(file.topics.backend)
                    .unwrap_or_default(),
                redis_url: cli.topics_redis_url.clone().or(file.topics.redis_url),
            },
            workflow: WorkflowConfig {
                sync_wait_timeout_ms: cli
                    .sync_wait_timeout_ms
                    .or(file.workflow.sync_wait_timeout_ms)
                    .unwrap_or(DEFAULT_SYNC_WAIT_TIMEOUT_MS),
                request_ttl_seconds: cli
                    .request_ttl_seconds
                    .or(file.workflow.request_ttl_seconds)
                    .unwrap_or(DEFAULT_REQUEST_TTL_SECONDS),
                lifecycle_block_ms: cli
                    .lifecycle_block_ms
                    .or(file.workflow.lifecycle_block_ms)
                    .unwrap_or(DEFAULT_LIFECYCLE_BLOCK_MS),
                request_stream_block_ms: cli
                    .request_stream_block_ms
                    .or(file.workflow.request_stream_block_ms)
                    .unwrap_or(DEFAULT_REQUEST_STREAM_BLOCK_MS),
                max_task_retries: cli
                    .max_task_retries
                    .or(file.workflow.max_task_retries)
                    .unwrap_or(DEFAULT_MAX_TASK_RETRIES),
                task_wait_timeout_ms: cli
                    .task_wait_timeout_ms
                    .or(file.workflow.task_wait_timeout_ms)
                    .unwrap_or(DEFAULT_TASK_WAIT_TIMEOUT_MS),
                payload_max_bytes: cli
                    .payload_max_bytes
                    .or(file.workflow.payload_max_bytes)
                    .unwrap_or(DEFAULT_BODY_LIMIT),
            },
        })
    }
}

/// Path to the user-profile config file (`~/.valuation-engine/valuation-engine.json`)
fn profile_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_workflow_config() {
        let config = WorkflowConfig::default();
        assert_eq!(config.max_task_retries, DEFAULT_MAX_TASK_RETRIES);
        assert_eq!(config.sync_wait_timeout_ms, DEFAULT_SYNC_WAIT_TIMEOUT_MS);
    }

    #[test]
    fn test_file_config_merge_prefers_later() {
        let base = FileConfig {
            debug: Some(false),
            server: ServerFileConfig {
                host: Some("a".into()),
                port: Some(1),
                enable_http: None,
            },
            ..Default::default()
        };
        let overlay = FileConfig {
            debug: Some(true),
            server: ServerFileConfig {
                host: None,
                port: Some(2),
                enable_http: Some(false),
            },
            ..Default::default()
        };
        let merged = base.merge(overlay);
        assert_eq!(merged.debug, Some(true));
        assert_eq!(merged.server.host, Some("a".into()));
        assert_eq!(merged.server.port, Some(2));
        assert_eq!(merged.server.enable_http, Some(false));
    }

    #[test]
    fn test_cache_backend_display() {
        assert_eq!(CacheBackendType::Memory.to_string(), "memory");
        assert_eq!(CacheBackendType::Redis.to_string(), "redis");
    }
}
