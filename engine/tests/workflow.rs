//! End-to-end scenarios driving the front/orchestrator/worker roles
//! together over the in-memory datastore backends, mirroring how the three
//! binaries interact purely through `CacheService`/`TopicService` with no
//! in-process shortcuts between them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use valuation_engine::core::{CacheConfig, TopicsConfig};
use valuation_engine::data::cache::CacheService;
use valuation_engine::data::topics::TopicService;
use valuation_engine::domain::front::{FrontLimits, FrontService, SubmitOutcome};
use valuation_engine::domain::orchestrator::{OrchestratorLimits, OrchestratorService};
use valuation_engine::domain::valuation::{DemoValuator, TaskError, ValuationTask};
use valuation_engine::domain::worker::WorkerService;

async fn services() -> (Arc<CacheService>, Arc<TopicService>) {
    let cache = Arc::new(CacheService::new(&CacheConfig::default()).await.unwrap());
    let topics = Arc::new(
        TopicService::from_topics_config(&TopicsConfig::default())
            .await
            .unwrap(),
    );
    (cache, topics)
}

fn front_limits() -> FrontLimits {
    FrontLimits {
        payload_max_bytes: 1024 * 1024,
        sync_wait_timeout_ms: 5_000,
        lifecycle_block_ms: 200,
        request_ttl_seconds: 3600,
    }
}

fn orchestrator_limits() -> OrchestratorLimits {
    OrchestratorLimits {
        max_task_retries: 3,
        task_wait_timeout_ms: 2_000,
        request_ttl_seconds: 3600,
        request_stream_block_ms: 200,
    }
}

/// Spins up one front ingress consumer, one orchestrator, and one worker,
/// all sharing `cache`/`topics`, and returns the `FrontService` handle used
/// to submit requests. Background loops run until the test process exits;
/// each test uses its own isolated cache/topics instance so this is fine.
async fn spawn_pipeline(
    cache: Arc<CacheService>,
    topics: Arc<TopicService>,
    valuator: Arc<dyn ValuationTask>,
) -> Arc<FrontService> {
    spawn_pipeline_with_limits(cache, topics, valuator, front_limits(), orchestrator_limits()).await
}

/// Same as `spawn_pipeline`, with caller-supplied limits (e.g. a short
/// `sync_wait_timeout_ms` for the sync-timeout scenario).
async fn spawn_pipeline_with_limits(
    cache: Arc<CacheService>,
    topics: Arc<TopicService>,
    valuator: Arc<dyn ValuationTask>,
    front_limits: FrontLimits,
    orchestrator_limits: OrchestratorLimits,
) -> Arc<FrontService> {
    let (_tx, rx) = watch::channel(false);

    let front = Arc::new(FrontService::new(
        cache.clone(),
        topics.clone(),
        front_limits,
        "test-front",
    ));
    let ingress = front.clone();
    let ingress_rx = rx.clone();
    tokio::spawn(async move {
        ingress.run_ingress_consumer(ingress_rx).await;
    });

    let orchestrator = Arc::new(OrchestratorService::new(
        cache.clone(),
        topics.clone(),
        orchestrator_limits,
        "test-orchestrator",
    ));
    let orchestrator_rx = rx.clone();
    tokio::spawn(async move {
        orchestrator.run(orchestrator_rx).await;
    });

    let worker = WorkerService::new(cache, topics, valuator, "test-worker");
    tokio::spawn(async move {
        worker.run(rx).await;
    });

    // Give the consumer loops a moment to finish subscribing before the
    // first submission lands, so nothing is ever first-delivered to a
    // consumer group that doesn't exist yet.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    front
}

/// S1 — single-group success: one group, one task, synchronous submission.
#[tokio::test]
async fn s1_single_group_success() {
    let (cache, topics) = services().await;
    let front = spawn_pipeline(cache, topics, Arc::new(DemoValuator::new())).await;

    let xml = r#"<vnml><project><group name="G0"><t id="a"><expr>2 * 21</expr></t></group></project></vnml>"#;
    let outcome = front
        .submit(xml.to_string(), true, None, None)
        .await
        .unwrap();

    match outcome {
        SubmitOutcome::SyncSucceeded { response_xml, .. } => {
            assert!(response_xml.contains("42.0"));
            assert!(response_xml.contains("\"a\""));
        }
        other => panic!("expected SyncSucceeded, got {other:?}"),
    }
}

/// S2 — two-group sequencing: the response must contain every task from
/// both groups, in document order, and the request must reach `succeeded`
/// (group 1 can only have run after group 0 completed, since the response
/// assembly reads whichever results were recorded, in group/task order).
#[tokio::test]
async fn s2_two_group_sequencing() {
    let (cache, topics) = services().await;
    let front = spawn_pipeline(cache, topics, Arc::new(DemoValuator::new())).await;

    let xml = r#"<vnml><project>
        <group name="G0"><t id="a"><expr>1 + 1</expr></t><t id="b"><expr>2 + 2</expr></t></group>
        <group name="G1"><t id="c"><expr>3 + 3</expr></t></group>
    </project></vnml>"#;
    let outcome = front
        .submit(xml.to_string(), true, None, None)
        .await
        .unwrap();

    match outcome {
        SubmitOutcome::SyncSucceeded { response_xml, .. } => {
            let pos_a = response_xml.find("\"a\"").expect("task a in response");
            let pos_b = response_xml.find("\"b\"").expect("task b in response");
            let pos_c = response_xml.find("\"c\"").expect("task c in response");
            assert!(pos_a < pos_c, "group 0 results must precede group 1");
            assert!(pos_b < pos_c, "group 0 results must precede group 1");
        }
        other => panic!("expected SyncSucceeded, got {other:?}"),
    }
}

/// A valuator that fails a configured task id a fixed number of times
/// before succeeding, so the retry path can be exercised deterministically.
struct FlakyValuator {
    fail_task_id: String,
    fails_remaining: Mutex<HashMap<String, u32>>,
}

impl FlakyValuator {
    fn new(fail_task_id: &str, fail_count: u32) -> Self {
        let mut fails_remaining = HashMap::new();
        fails_remaining.insert(fail_task_id.to_string(), fail_count);
        Self {
            fail_task_id: fail_task_id.to_string(),
            fails_remaining: Mutex::new(fails_remaining),
        }
    }
}

impl ValuationTask for FlakyValuator {
    fn execute(&self, task_xml: &str) -> Result<String, TaskError> {
        if task_xml.contains(&format!("id=\"{}\"", self.fail_task_id)) {
            let mut remaining = self.fails_remaining.lock().unwrap();
            let count = remaining.entry(self.fail_task_id.clone()).or_insert(0);
            if *count > 0 {
                *count -= 1;
                return Err(TaskError::ExecutionFailed("simulated transient failure".into()));
            }
        }
        DemoValuator::new().execute(task_xml)
    }
}

/// S3 — task retry then success: task `x` fails twice, then succeeds on
/// the third attempt, within a 3-attempt budget.
#[tokio::test]
async fn s3_retry_then_success() {
    let (cache, topics) = services().await;
    let valuator: Arc<dyn ValuationTask> = Arc::new(FlakyValuator::new("x", 2));
    let front = spawn_pipeline(cache, topics, valuator).await;

    let xml = r#"<vnml><project><group name="G0"><t id="x"><expr>10 + 10</expr></t></group></project></vnml>"#;
    let outcome = front
        .submit(xml.to_string(), true, None, None)
        .await
        .unwrap();

    match outcome {
        SubmitOutcome::SyncSucceeded { response_xml, .. } => {
            assert!(response_xml.contains("20.0"));
        }
        other => panic!("expected SyncSucceeded after retries, got {other:?}"),
    }
}

struct AlwaysFailingValuator;

impl ValuationTask for AlwaysFailingValuator {
    fn execute(&self, _task_xml: &str) -> Result<String, TaskError> {
        Err(TaskError::ExecutionFailed("always fails".into()))
    }
}

/// S4 — retry exhaustion: a task that never succeeds ends the request in
/// `failed`, with the failure detail surfaced back through the sync path.
#[tokio::test]
async fn s4_retry_exhaustion() {
    let (cache, topics) = services().await;
    let front = spawn_pipeline(cache, topics, Arc::new(AlwaysFailingValuator)).await;

    let xml = r#"<vnml><project><group name="G0"><t id="x"><expr>1 + 1</expr></t></group></project></vnml>"#;
    let outcome = front
        .submit(xml.to_string(), true, None, None)
        .await
        .unwrap();

    match outcome {
        SubmitOutcome::SyncFailed { reason, .. } => {
            assert!(reason.is_some());
        }
        other => panic!("expected SyncFailed, got {other:?}"),
    }
}

/// S6 — idempotency reuse: two sequential submissions with the same
/// payload and the same idempotency key return the same `requestId`, and
/// the second submission observes the already-terminal result rather than
/// re-running the pipeline.
#[tokio::test]
async fn s6_idempotency_reuse() {
    let (cache, topics) = services().await;
    let front = spawn_pipeline(cache, topics, Arc::new(DemoValuator::new())).await;

    let xml = r#"<vnml><project><group name="G0"><t id="a"><expr>7 + 7</expr></t></group></project></vnml>"#;
    let key = "idem-key-1".to_string();

    let first = front
        .submit(xml.to_string(), true, Some(key.clone()), None)
        .await
        .unwrap();
    let first_id = match first {
        SubmitOutcome::SyncSucceeded { request_id, response_xml } => {
            assert!(response_xml.contains("14.0"));
            request_id
        }
        other => panic!("expected SyncSucceeded, got {other:?}"),
    };

    let second = front
        .submit(xml.to_string(), true, Some(key), None)
        .await
        .unwrap();
    match second {
        SubmitOutcome::SyncSucceeded { request_id, .. } => {
            assert_eq!(request_id, first_id, "resubmission must reuse the original requestId");
        }
        other => panic!("expected SyncSucceeded on resubmission, got {other:?}"),
    }
}

/// A valuator that blocks for a fixed duration before delegating to
/// `DemoValuator`, so the sync-wait timeout path can be exercised without
/// racing real task latency.
struct SlowValuator {
    delay: std::time::Duration,
}

impl ValuationTask for SlowValuator {
    fn execute(&self, task_xml: &str) -> Result<String, TaskError> {
        std::thread::sleep(self.delay);
        DemoValuator::new().execute(task_xml)
    }
}

/// S5 — sync-wait timeout: the task takes longer than `sync_wait_timeout_ms`,
/// so the synchronous submission returns `Pending` rather than blocking
/// indefinitely; the request still completes in the background and later
/// polling observes the terminal `succeeded` status.
#[tokio::test]
async fn s5_sync_timeout() {
    let (cache, topics) = services().await;
    let valuator: Arc<dyn ValuationTask> = Arc::new(SlowValuator {
        delay: std::time::Duration::from_millis(300),
    });
    let mut limits = front_limits();
    limits.sync_wait_timeout_ms = 50;
    let front = spawn_pipeline_with_limits(cache, topics, valuator, limits, orchestrator_limits()).await;

    let xml = r#"<vnml><project><group name="G0"><t id="a"><expr>5 + 5</expr></t></group></project></vnml>"#;
    let outcome = front
        .submit(xml.to_string(), true, None, None)
        .await
        .unwrap();

    let request_id = match outcome {
        SubmitOutcome::Pending { request_id } => request_id,
        other => panic!("expected Pending due to sync-wait timeout, got {other:?}"),
    };

    // Give the slow task time to finish in the background, then confirm the
    // request eventually reaches a terminal status.
    tokio::time::sleep(std::time::Duration::from_millis(700)).await;
    let status = front.status(request_id).await.unwrap();
    assert_eq!(
        status.status,
        valuation_engine::domain::types::RequestStatusTag::Succeeded
    );
}

/// Distinct payloads under the same idempotency key are rejected rather
/// than silently associated with the first request.
#[tokio::test]
async fn idempotency_conflict_on_different_payload() {
    let (cache, topics) = services().await;
    let front = spawn_pipeline(cache, topics, Arc::new(DemoValuator::new())).await;

    let key = "idem-key-2".to_string();
    let xml_a = r#"<vnml><project><group name="G0"><t id="a"><expr>1 + 1</expr></t></group></project></vnml>"#;
    let xml_b = r#"<vnml><project><group name="G0"><t id="a"><expr>2 + 2</expr></t></group></project></vnml>"#;

    front
        .submit(xml_a.to_string(), false, Some(key.clone()), None)
        .await
        .unwrap();

    let err = front
        .submit(xml_b.to_string(), false, Some(key), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        valuation_engine::EngineError::IdempotencyConflict { .. }
    ));
}
