//! Task Worker binary: executes individual hydrated task fragments and
//! reports outcomes back to the orchestrator.

use std::sync::Arc;

use valuation_engine::core::Runtime;
use valuation_engine::domain::valuation::DemoValuator;
use valuation_engine::domain::worker::WorkerService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rt = Runtime::init().await?;

    let consumer_name = format!("worker-{}", uuid::Uuid::new_v4());
    let worker = WorkerService::new(
        rt.cache.clone(),
        rt.topics.clone(),
        Arc::new(DemoValuator::new()),
        consumer_name,
    );

    let shutdown_rx = rt.shutdown.subscribe();
    worker.run(shutdown_rx).await;

    rt.shutdown.shutdown().await;
    Ok(())
}
