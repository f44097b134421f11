//! Front Orchestrator binary: HTTP ingress plus the background ingress
//! consumer that claims invocations for lifecycle-event bookkeeping.

use std::sync::Arc;

use valuation_engine::api::ApiServer;
use valuation_engine::core::Runtime;
use valuation_engine::domain::front::{FrontLimits, FrontService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rt = Runtime::init().await?;

    let limits = FrontLimits {
        payload_max_bytes: rt.config.workflow.payload_max_bytes,
        sync_wait_timeout_ms: rt.config.workflow.sync_wait_timeout_ms,
        lifecycle_block_ms: rt.config.workflow.lifecycle_block_ms,
        request_ttl_seconds: rt.config.workflow.request_ttl_seconds,
    };
    let consumer_name = format!("front-{}", uuid::Uuid::new_v4());
    let front = Arc::new(FrontService::new(
        rt.cache.clone(),
        rt.topics.clone(),
        limits,
        consumer_name,
    ));

    let ingress = front.clone();
    let shutdown_rx = rt.shutdown.subscribe();
    let ingress_handle = tokio::spawn(async move {
        ingress.run_ingress_consumer(shutdown_rx).await;
    });
    rt.shutdown.register(ingress_handle).await;

    valuation_engine::core::banner::print_banner(
        &rt.config.server.host,
        rt.config.server.port,
        rt.cache.backend_name(),
        rt.topics.backend_name(),
    );

    let server = ApiServer::new(&rt, front);
    server.start().await?;

    rt.shutdown.shutdown().await;
    Ok(())
}
