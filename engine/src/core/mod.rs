//! Core application infrastructure shared by the front, orchestrator, and worker binaries

pub mod banner;
pub mod cli;
pub mod config;
pub mod constants;
pub mod shutdown;

pub use cli::{CliConfig, Commands};
pub use config::{AppConfig, CacheConfig, ServerConfig, TopicsConfig, WorkflowConfig};
pub use shutdown::ShutdownService;

// Re-export topic types from data::topics for convenience at the core layer
pub use crate::data::topics::{
    Publisher, Subscriber, Topic, TopicConfig, TopicError, TopicMessage, TopicService,
};

use crate::data::cache::CacheService;
use anyhow::Result;
use std::sync::Arc;

/// Shared infrastructure handles built once per process and threaded through
/// the front/orchestrator/worker binaries.
pub struct Runtime {
    pub config: AppConfig,
    pub cache: Arc<CacheService>,
    pub topics: Arc<TopicService>,
    pub shutdown: ShutdownService,
}

impl Runtime {
    /// Parse CLI/env/file configuration, initialize the cache and topic
    /// backends, and wire up a shutdown service with signal handlers installed.
    pub async fn init() -> Result<Self> {
        dotenvy::dotenv().ok();
        init_logging();

        let (cli_config, _command) = cli::parse();
        let config = AppConfig::load(&cli_config)?;

        let cache = Arc::new(
            CacheService::new(&config.cache)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize cache service: {}", e))?,
        );
        tracing::debug!(backend = cache.backend_name(), "Cache initialized");

        let topics = Arc::new(
            TopicService::from_topics_config(&config.topics)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize topic service: {}", e))?,
        );
        tracing::debug!(backend = topics.backend_name(), "Topics initialized");

        let shutdown = ShutdownService::new(topics.clone());
        shutdown.install_signal_handlers();

        Ok(Self {
            config,
            cache,
            topics,
            shutdown,
        })
    }
}

fn init_logging() {
    use constants::{APP_NAME_LOWER, ENV_LOG};

    let default_filter = format!("info,{}=info", APP_NAME_LOWER);
    let filter = std::env::var(ENV_LOG)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or(default_filter);

    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_ansi(true)
        .compact()
        .with_env_filter(filter)
        .init();
}

/// Current Unix timestamp in milliseconds, used for lifecycle event stamping.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
