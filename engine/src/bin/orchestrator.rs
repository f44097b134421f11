//! Request Orchestrator binary: sequences each request's task groups,
//! dispatching tasks to workers and collecting their results.

use std::sync::Arc;

use valuation_engine::core::Runtime;
use valuation_engine::domain::orchestrator::{OrchestratorLimits, OrchestratorService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rt = Runtime::init().await?;

    let limits = OrchestratorLimits {
        max_task_retries: rt.config.workflow.max_task_retries,
        task_wait_timeout_ms: rt.config.workflow.task_wait_timeout_ms,
        request_ttl_seconds: rt.config.workflow.request_ttl_seconds,
        request_stream_block_ms: rt.config.workflow.request_stream_block_ms,
    };
    let consumer_name = format!("orchestrator-{}", uuid::Uuid::new_v4());
    let orchestrator = Arc::new(OrchestratorService::new(
        rt.cache.clone(),
        rt.topics.clone(),
        limits,
        consumer_name,
    ));

    let shutdown_rx = rt.shutdown.subscribe();
    orchestrator.run(shutdown_rx).await;

    rt.shutdown.shutdown().await;
    Ok(())
}
