//! Request Orchestrator (R): sequences a request's groups and fans out its
//! tasks, one logical instance per request.
//!
//! R is invoked with a [`RequestInvocation`] off `stream:request:invoke` and
//! drives the request to a terminal state entirely through the shared
//! datastore (cache + streams); see the module-level design notes in
//! `SPEC_FULL.md` §4.2 for the full state machine. The invocation's stream
//! message is acknowledged only once the request reaches a terminal state,
//! so a crash mid-request is recovered by redelivery and resumed at
//! `currentGroup` rather than restarted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use uuid::Uuid;

use crate::core::constants::{
    CLAIM_POLL_INTERVAL_MS, CONSUMER_GROUP_REQUEST_ORCHESTRATORS, STREAM_REQUEST_INVOKE,
    STREAM_TASK_DISPATCH, STREAM_TASK_UPDATES, STUCK_MESSAGE_CLAIM_BATCH,
    STUCK_MESSAGE_MIN_IDLE_MS, TOPIC_REQUEST_LIFECYCLE,
};
use crate::core::now_ms;
use crate::data::cache::{CacheKey, CacheService};
use crate::data::topics::{StreamStartPosition, TopicService};
use crate::domain::hydration::{self, Hydrator};
use crate::domain::types::{
    FailureDetail, GroupState, LifecycleEvent, LifecycleStatus, RequestInvocation,
    RequestState, RequestStatusTag, TaskDispatch, TaskOutcome, TaskUpdate,
};
use crate::domain::xml::{self, GroupSpec};
use crate::error::EngineError;

/// Shared configuration the orchestrator's algorithm needs from `WorkflowConfig`.
#[derive(Debug, Clone)]
pub struct OrchestratorLimits {
    pub max_task_retries: u32,
    pub task_wait_timeout_ms: u64,
    pub request_ttl_seconds: u64,
    pub request_stream_block_ms: u64,
}

pub struct OrchestratorService {
    cache: Arc<CacheService>,
    topics: Arc<TopicService>,
    limits: OrchestratorLimits,
    hydrators: Vec<Box<dyn Hydrator>>,
    consumer_name: String,
}

impl OrchestratorService {
    pub fn new(
        cache: Arc<CacheService>,
        topics: Arc<TopicService>,
        limits: OrchestratorLimits,
        consumer_name: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            topics,
            limits,
            hydrators: hydration::default_strategies(),
            consumer_name: consumer_name.into(),
        }
    }

    /// Run the invocation-consumer loop until shutdown is signalled. Each
    /// invocation is handled on its own task so a long-running request does
    /// not block others claimed by the same process.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let invoke_topic = self.topics.stream_topic::<RequestInvocation>(STREAM_REQUEST_INVOKE);
        let mut subscriber = match invoke_topic
            .subscribe(
                CONSUMER_GROUP_REQUEST_ORCHESTRATORS,
                &self.consumer_name,
                StreamStartPosition::Beginning,
            )
            .await
        {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "orchestrator failed to subscribe to invocation stream");
                return;
            }
        };
        let acker = subscriber.acker();
        let claimer = subscriber.claimer();

        let mut claim_interval =
            tokio::time::interval(Duration::from_millis(CLAIM_POLL_INTERVAL_MS));
        claim_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("orchestrator invocation loop shutting down");
                        break;
                    }
                }
                received = subscriber.recv() => {
                    match received {
                        Ok((msg_id, invocation)) => {
                            let this = Arc::clone(&self);
                            let acker = acker.clone();
                            tokio::spawn(async move {
                                this.handle_request(invocation).await;
                                // Acknowledged only after the request reaches a
                                // terminal state inside handle_request; here we
                                // just close out the stream message.
                                if let Err(e) = acker.ack(&msg_id).await {
                                    tracing::warn!(error = %e, msg_id, "failed to ack invocation");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "invocation recv error, backing off");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
                _ = claim_interval.tick() => {
                    let this = Arc::clone(&self);
                    let acker = acker.clone();
                    let claimer = claimer.clone();
                    tokio::spawn(async move {
                        this.claim_stuck_invocations(&claimer, &acker).await;
                    });
                }
            }
        }
    }

    /// Claim invocations left pending by a crashed orchestrator instance.
    async fn claim_stuck_invocations(
        self: &Arc<Self>,
        claimer: &crate::data::topics::StreamClaimer,
        acker: &crate::data::topics::StreamAcker,
    ) {
        let messages = match claimer
            .claim(
                &self.consumer_name,
                STUCK_MESSAGE_MIN_IDLE_MS,
                STUCK_MESSAGE_CLAIM_BATCH,
            )
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "failed to claim stuck invocations");
                return;
            }
        };

        if messages.is_empty() {
            return;
        }
        tracing::debug!(count = messages.len(), "claiming stuck invocations");

        for msg in messages {
            match rmp_serde::from_slice::<RequestInvocation>(&msg.payload) {
                Ok(invocation) => {
                    let this = Arc::clone(self);
                    let acker = acker.clone();
                    let msg_id = msg.id;
                    tokio::spawn(async move {
                        this.handle_request(invocation).await;
                        if let Err(e) = acker.ack(&msg_id).await {
                            tracing::warn!(error = %e, msg_id, "failed to ack claimed invocation");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, msg_id = %msg.id, "failed to decode claimed invocation, acking to discard");
                    if let Err(ack_err) = acker.ack(&msg.id).await {
                        tracing::warn!(error = %ack_err, msg_id = %msg.id, "failed to ack invalid invocation");
                    }
                }
            }
        }
    }

    /// Drive one request to a terminal state. Idempotent: safe to call more
    /// than once for the same `requestId` (e.g. on redelivery).
    pub async fn handle_request(&self, invocation: RequestInvocation) {
        let request_id = invocation.request_id;

        let mut state = match self.cache.get::<RequestState>(&CacheKey::request_state(&request_id.to_string())).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                tracing::warn!(%request_id, "invocation with no request-state, dropping");
                return;
            }
            Err(e) => {
                tracing::error!(%request_id, error = %e, "failed to load request-state");
                return;
            }
        };

        if state.status.is_terminal() {
            return;
        }

        let resume_group = if state.status == RequestStatusTag::Started {
            state.current_group
        } else {
            state.status = RequestStatusTag::Started;
            if let Err(e) = self.save_state(&request_id, &state).await {
                tracing::error!(%request_id, error = %e, "failed to persist started state");
                return;
            }
            self.publish_lifecycle(request_id, LifecycleStatus::Started, None)
                .await;
            0
        };

        let xml = match self.load_request_xml(&invocation).await {
            Ok(xml) => xml,
            Err(e) => {
                self.fail_request(&request_id, &mut state, e.to_string(), None, None)
                    .await;
                return;
            }
        };

        let groups = match xml::parse_groups(&xml) {
            Ok(groups) => groups,
            Err(e) => {
                self.fail_request(&request_id, &mut state, e.to_string(), None, None)
                    .await;
                return;
            }
        };

        let mut prior_results: HashMap<String, String> = HashMap::new();
        // Re-collect results of already-completed groups on resume so later
        // groups' hydration context is complete.
        for (idx, group) in groups.iter().enumerate().take(resume_group as usize) {
            for task in &group.tasks {
                let key = CacheKey::task_result(&request_id.to_string(), idx as u32, &task.id);
                if let Ok(Some(bytes)) = self.cache.get_raw_versioned(&key).await {
                    prior_results.insert(task.id.clone(), String::from_utf8_lossy(&bytes).into_owned());
                }
            }
        }

        let mut assembled: Vec<(u32, Vec<(String, String)>)> = Vec::new();

        for (group_idx, group) in groups.iter().enumerate() {
            let group_idx = group_idx as u32;
            if group_idx < resume_group {
                continue;
            }

            match self.run_group(&request_id, group_idx, group, &xml, &prior_results).await {
                Ok(results) => {
                    for (task_id, result) in &results {
                        prior_results.insert(task_id.clone(), result.clone());
                    }
                    assembled.push((group_idx, results));

                    state.current_group = group_idx + 1;
                    if let Err(e) = self.save_state(&request_id, &state).await {
                        tracing::error!(%request_id, error = %e, "failed to persist group advance");
                    }
                    self.publish_lifecycle(request_id, LifecycleStatus::GroupCompleted, Some(group_idx))
                        .await;
                }
                Err(reason) => {
                    self.fail_request(&request_id, &mut state, reason, Some(group_idx), None)
                        .await;
                    return;
                }
            }
        }

        self.succeed_request(&request_id, &mut state, &invocation, &assembled)
            .await;
    }

    async fn run_group(
        &self,
        request_id: &Uuid,
        group_idx: u32,
        group: &GroupSpec,
        request_xml: &str,
        prior_results: &HashMap<String, String>,
    ) -> Result<Vec<(String, String)>, String> {
        let ctx = crate::domain::hydration::HydrationContext {
            request_xml: request_xml.to_string(),
            prior_results: prior_results.clone(),
        };

        let group_state_key = CacheKey::group_state(&request_id.to_string(), group_idx);
        let mut group_state = GroupState::new(group.tasks.len() as u32);

        for task in &group.tasks {
            let hydrated = hydration::hydrate(&task.fragment_xml, &ctx, &self.hydrators)
                .map_err(|e| format!("hydration failed for task {}: {e}", task.id))?;
            let payload_key = CacheKey::task_xml(&request_id.to_string(), group_idx, &task.id);
            self.cache
                .set_raw(&payload_key, hydrated.into_bytes(), self.ttl())
                .await
                .map_err(|e| e.to_string())?;
        }

        self.cache
            .set(&group_state_key, &group_state, self.ttl())
            .await
            .map_err(|e| e.to_string())?;

        self.publish_lifecycle(*request_id, LifecycleStatus::GroupStarted, Some(group_idx))
            .await;

        let req_group = format!("req::{request_id}");
        let dispatch_topic = self.topics.stream_topic::<TaskDispatch>(STREAM_TASK_DISPATCH);
        let updates_topic = self.topics.stream_topic::<TaskUpdate>(STREAM_TASK_UPDATES);

        // Establish the per-request consumer group (starting at the stream
        // tail) before dispatching anything, so no worker's update can be
        // missed by racing ahead of group creation.
        let mut subscriber = updates_topic
            .subscribe(
                &req_group,
                &self.consumer_name,
                StreamStartPosition::Latest,
            )
            .await
            .map_err(|e| e.to_string())?;
        let acker = subscriber.acker();

        for task in &group.tasks {
            let dispatch = TaskDispatch {
                request_id: *request_id,
                group_idx,
                task_id: task.id.clone(),
                payload_key: CacheKey::task_xml(&request_id.to_string(), group_idx, &task.id),
                result_key: CacheKey::task_result(&request_id.to_string(), group_idx, &task.id),
                attempt: 1,
            };
            dispatch_topic
                .publish(&dispatch)
                .await
                .map_err(|e| e.to_string())?;
        }

        let deadline = Instant::now() + Duration::from_millis(self.limits.task_wait_timeout_ms);

        while !group_state.is_complete() && !group_state.is_failed() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err("group completion deadline exceeded".to_string());
            }

            let recv = tokio::time::timeout(remaining, subscriber.recv()).await;
            let (msg_id, update) = match recv {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => return Err(e.to_string()),
                Err(_) => return Err("group completion deadline exceeded".to_string()),
            };

            if update.request_id != *request_id || update.group_idx != group_idx {
                let _ = acker.ack(&msg_id).await;
                continue;
            }

            match update.status {
                TaskOutcome::Completed => {
                    let highest = group_state
                        .succeeded_attempt
                        .get(&update.task_id)
                        .copied()
                        .unwrap_or(0);
                    if update.attempt >= highest {
                        if highest == 0 {
                            group_state.completed += 1;
                        }
                        group_state.succeeded_attempt.insert(update.task_id.clone(), update.attempt);
                    }
                }
                TaskOutcome::Failed => {
                    if update.attempt < self.limits.max_task_retries {
                        let redispatch = TaskDispatch {
                            request_id: *request_id,
                            group_idx,
                            task_id: update.task_id.clone(),
                            payload_key: CacheKey::task_xml(&request_id.to_string(), group_idx, &update.task_id),
                            result_key: CacheKey::task_result(&request_id.to_string(), group_idx, &update.task_id),
                            attempt: update.attempt + 1,
                        };
                        if let Err(e) = dispatch_topic.publish(&redispatch).await {
                            tracing::warn!(error = %e, task_id = %update.task_id, "failed to re-dispatch task");
                        }
                    } else {
                        group_state.failed += 1;
                    }
                }
            }

            self.cache
                .set(&group_state_key, &group_state, self.ttl())
                .await
                .map_err(|e| e.to_string())?;

            let _ = acker.ack(&msg_id).await;
        }

        if group_state.is_failed() {
            return Err(format!("group {group_idx} retry budget exhausted"));
        }

        let mut results = Vec::with_capacity(group.tasks.len());
        for task in &group.tasks {
            let result_key = CacheKey::task_result(&request_id.to_string(), group_idx, &task.id);
            let bytes = self
                .cache
                .get_raw_versioned(&result_key)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("missing result for task {}", task.id))?;
            results.push((task.id.clone(), String::from_utf8_lossy(&bytes).into_owned()));
        }
        Ok(results)
    }

    async fn load_request_xml(&self, invocation: &RequestInvocation) -> Result<String, EngineError> {
        const MAX_ATTEMPTS: u32 = 5;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.cache.get_raw(&invocation.xml_key).await {
                Ok(Some(bytes)) => return Ok(String::from_utf8_lossy(&bytes).into_owned()),
                Ok(None) if attempt < MAX_ATTEMPTS => {
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                }
                Ok(None) => {
                    return Err(EngineError::not_found(Some(invocation.request_id)));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn save_state(&self, request_id: &Uuid, state: &RequestState) -> Result<(), EngineError> {
        self.cache
            .set(&CacheKey::request_state(&request_id.to_string()), state, self.ttl())
            .await?;
        Ok(())
    }

    async fn fail_request(
        &self,
        request_id: &Uuid,
        state: &mut RequestState,
        reason: String,
        group_idx: Option<u32>,
        task_id: Option<String>,
    ) {
        state.status = RequestStatusTag::Failed;
        state.completed_at = Some(now_ms());
        if let Err(e) = self.save_state(request_id, state).await {
            tracing::error!(%request_id, error = %e, "failed to persist failed state");
        }

        let detail = FailureDetail {
            request_id: *request_id,
            reason,
            group_idx,
            task_id,
        };
        if let Ok(bytes) = rmp_serde::to_vec(&detail) {
            let _ = self
                .cache
                .set_raw(&CacheKey::request_failure(&request_id.to_string()), bytes, self.ttl())
                .await;
        }

        self.publish_lifecycle(*request_id, LifecycleStatus::Failed, None).await;
    }

    async fn succeed_request(
        &self,
        request_id: &Uuid,
        state: &mut RequestState,
        invocation: &RequestInvocation,
        assembled: &[(u32, Vec<(String, String)>)],
    ) {
        let response_xml = match xml::build_response(*request_id, assembled) {
            Ok(xml) => xml,
            Err(e) => {
                self.fail_request(request_id, state, e.to_string(), None, None).await;
                return;
            }
        };

        if let Err(e) = self
            .cache
            .set_raw(&invocation.response_key, response_xml.into_bytes(), self.ttl())
            .await
        {
            self.fail_request(request_id, state, e.to_string(), None, None).await;
            return;
        }

        state.status = RequestStatusTag::Succeeded;
        state.completed_at = Some(now_ms());
        if let Err(e) = self.save_state(request_id, state).await {
            tracing::error!(%request_id, error = %e, "failed to persist succeeded state");
        }

        self.publish_lifecycle(*request_id, LifecycleStatus::Succeeded, None).await;
    }

    async fn publish_lifecycle(&self, request_id: Uuid, status: LifecycleStatus, group: Option<u32>) {
        let topic = self.topics.broadcast_topic::<LifecycleEvent>(TOPIC_REQUEST_LIFECYCLE);
        let event = LifecycleEvent::new(request_id, status, group, now_ms());
        if let Err(e) = topic.publish(&event).await {
            tracing::warn!(%request_id, error = %e, "failed to publish lifecycle event");
        }
    }

    fn ttl(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.limits.request_ttl_seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CacheConfig, TopicsConfig};
    use crate::domain::valuation::{DemoValuator, ValuationTask};
    use crate::domain::worker::WorkerService;

    async fn make_services() -> (Arc<CacheService>, Arc<TopicService>) {
        let cache = Arc::new(CacheService::new(&CacheConfig::default()).await.unwrap());
        let topics = Arc::new(
            TopicService::from_topics_config(&TopicsConfig::default())
                .await
                .unwrap(),
        );
        (cache, topics)
    }

    fn limits() -> OrchestratorLimits {
        OrchestratorLimits {
            max_task_retries: 3,
            task_wait_timeout_ms: 2_000,
            request_ttl_seconds: 3600,
            request_stream_block_ms: 1_000,
        }
    }

    /// Spawns an in-process worker loop so `run_group`'s dispatch/await cycle
    /// has something answering it, mirroring how the real binaries interact
    /// purely through the shared datastore.
    async fn spawn_worker(cache: Arc<CacheService>, topics: Arc<TopicService>) {
        let worker = WorkerService::new(cache, topics, Arc::new(DemoValuator::new()) as Arc<dyn ValuationTask>, "test-worker");
        let (_tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            worker.run(rx).await;
        });
    }

    #[tokio::test]
    async fn test_single_group_request_succeeds() {
        let (cache, topics) = make_services().await;
        spawn_worker(cache.clone(), topics.clone()).await;

        let request_id = Uuid::new_v4();
        let xml = r#"<vnml><project><group name="G0"><t id="a"><expr>2 * 21</expr></t></group></project></vnml>"#;
        let xml_key = CacheKey::request_xml(&request_id.to_string());
        let response_key = CacheKey::request_response(&request_id.to_string());
        cache.set_raw(&xml_key, xml.as_bytes().to_vec(), None).await.unwrap();

        let state = RequestState {
            status: RequestStatusTag::Received,
            xml_key: xml_key.clone(),
            response_key: response_key.clone(),
            metadata_key: None,
            group_count: None,
            current_group: 0,
            retry_count: 0,
            received_at: now_ms(),
            submitted_at: now_ms(),
            completed_at: None,
        };
        cache
            .set(&CacheKey::request_state(&request_id.to_string()), &state, None)
            .await
            .unwrap();

        let orchestrator = OrchestratorService::new(cache.clone(), topics.clone(), limits(), "test-r");
        let invocation = RequestInvocation {
            request_id,
            xml_key,
            response_key: response_key.clone(),
            metadata_key: None,
            group_count: None,
            execution_token: "tok".to_string(),
        };

        orchestrator.handle_request(invocation).await;

        let final_state: RequestState = cache
            .get(&CacheKey::request_state(&request_id.to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(final_state.status, RequestStatusTag::Succeeded);

        let response = cache.get_raw(&response_key).await.unwrap().unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.contains("42.0"));
        assert!(response.contains(&request_id.to_string()));
    }

    #[tokio::test]
    async fn test_missing_xml_fails_request() {
        let (cache, topics) = make_services().await;
        let request_id = Uuid::new_v4();
        let xml_key = CacheKey::request_xml(&request_id.to_string());
        let response_key = CacheKey::request_response(&request_id.to_string());

        let state = RequestState {
            status: RequestStatusTag::Received,
            xml_key: xml_key.clone(),
            response_key: response_key.clone(),
            metadata_key: None,
            group_count: None,
            current_group: 0,
            retry_count: 0,
            received_at: now_ms(),
            submitted_at: now_ms(),
            completed_at: None,
        };
        cache
            .set(&CacheKey::request_state(&request_id.to_string()), &state, None)
            .await
            .unwrap();

        let mut fast_limits = limits();
        fast_limits.task_wait_timeout_ms = 100;
        let orchestrator = OrchestratorService::new(cache.clone(), topics.clone(), fast_limits, "test-r");
        let invocation = RequestInvocation {
            request_id,
            xml_key,
            response_key,
            metadata_key: None,
            group_count: None,
            execution_token: "tok".to_string(),
        };

        orchestrator.handle_request(invocation).await;

        let final_state: RequestState = cache
            .get(&CacheKey::request_state(&request_id.to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(final_state.status, RequestStatusTag::Failed);
    }

    #[tokio::test]
    async fn test_terminal_state_short_circuits_reinvocation() {
        let (cache, topics) = make_services().await;
        let request_id = Uuid::new_v4();
        let xml_key = CacheKey::request_xml(&request_id.to_string());
        let response_key = CacheKey::request_response(&request_id.to_string());

        let state = RequestState {
            status: RequestStatusTag::Succeeded,
            xml_key: xml_key.clone(),
            response_key: response_key.clone(),
            metadata_key: None,
            group_count: Some(1),
            current_group: 1,
            retry_count: 0,
            received_at: now_ms(),
            submitted_at: now_ms(),
            completed_at: Some(now_ms()),
        };
        cache
            .set(&CacheKey::request_state(&request_id.to_string()), &state, None)
            .await
            .unwrap();

        let orchestrator = OrchestratorService::new(cache.clone(), topics.clone(), limits(), "test-r");
        let invocation = RequestInvocation {
            request_id,
            xml_key,
            response_key,
            metadata_key: None,
            group_count: Some(1),
            execution_token: "tok".to_string(),
        };

        // No XML was ever written; if this re-ran the algorithm it would fail.
        orchestrator.handle_request(invocation).await;

        let final_state: RequestState = cache
            .get(&CacheKey::request_state(&request_id.to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(final_state.status, RequestStatusTag::Succeeded);
    }
}
