//! Front Orchestrator (F): HTTP ingress, the ingress consumer that hands
//! requests off to R, and the synchronous-wait path layered over the
//! otherwise fully asynchronous pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use tokio::sync::watch;

use crate::core::constants::{
    CLAIM_POLL_INTERVAL_MS, CONSUMER_GROUP_FRONT_INGRESS, CONSUMER_GROUP_REQUEST_ORCHESTRATORS,
    STREAM_REQUEST_INVOKE, STUCK_MESSAGE_CLAIM_BATCH, STUCK_MESSAGE_MIN_IDLE_MS,
    TOPIC_REQUEST_LIFECYCLE,
};
use crate::core::now_ms;
use crate::data::cache::{CacheKey, CacheService};
use crate::data::topics::{StreamStartPosition, TopicService};
use crate::domain::types::{
    LifecycleEvent, LifecycleStatus, RequestInvocation, RequestState, RequestStatusTag,
    StatusResponse,
};
use crate::error::EngineError;
use crate::utils::crypto::sha256_hex;

/// Outcome of `POST /valuation`.
#[derive(Debug)]
pub enum SubmitOutcome {
    Accepted { request_id: Uuid },
    Pending { request_id: Uuid },
    SyncSucceeded { request_id: Uuid, response_xml: String },
    SyncFailed { request_id: Uuid, reason: Option<String> },
}

/// Outcome of `GET /valuation/{id}/results`.
#[derive(Debug)]
pub enum ResultsOutcome {
    Ready(String),
    Failed { reason: Option<String> },
}

#[derive(Debug, Clone)]
pub struct FrontLimits {
    pub payload_max_bytes: usize,
    pub sync_wait_timeout_ms: u64,
    pub lifecycle_block_ms: u64,
    pub request_ttl_seconds: u64,
}

pub struct FrontService {
    cache: Arc<CacheService>,
    topics: Arc<TopicService>,
    limits: FrontLimits,
    consumer_name: String,
}

impl FrontService {
    pub fn new(
        cache: Arc<CacheService>,
        topics: Arc<TopicService>,
        limits: FrontLimits,
        consumer_name: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            topics,
            limits,
            consumer_name: consumer_name.into(),
        }
    }

    fn ttl(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.limits.request_ttl_seconds))
    }

    /// Tombstone keys outlive the request's own state/payload keys so that
    /// `status`/`results` can still tell an expired request (`Gone`) apart
    /// from one that never existed (`NotFound`) after the main key is gone.
    fn tombstone_ttl(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.limits.request_ttl_seconds * 2))
    }

    /// `POST /valuation`: accept an XML payload, optionally wait synchronously.
    pub async fn submit(
        &self,
        xml: String,
        sync: bool,
        idempotency_key: Option<String>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<SubmitOutcome, EngineError> {
        if xml.trim().is_empty() {
            return Err(EngineError::invalid_input("empty request body"));
        }
        if xml.len() > self.limits.payload_max_bytes {
            return Err(EngineError::PayloadTooLarge {
                size: xml.len(),
                limit: self.limits.payload_max_bytes,
            });
        }

        let content_hash = sha256_hex(&xml);

        if let Some(key) = &idempotency_key {
            if let Some((existing_id, existing_hash)) = self.lookup_idempotency(key).await? {
                if existing_hash != content_hash {
                    return Err(EngineError::IdempotencyConflict {
                        request_id: Some(existing_id),
                    });
                }
                return self.await_or_accept(existing_id, sync).await;
            }
        }

        let request_id = Uuid::new_v4();
        let xml_key = CacheKey::request_xml(&request_id.to_string());
        let response_key = CacheKey::request_response(&request_id.to_string());

        self.cache
            .set_raw(&xml_key, xml.clone().into_bytes(), self.ttl())
            .await?;
        if !self.cache.exists(&xml_key).await? {
            return Err(EngineError::internal("payload write not yet visible"));
        }

        let metadata_key = if let Some(metadata) = metadata {
            let key = CacheKey::request_metadata(&request_id.to_string());
            self.cache.set(&key, &metadata, self.ttl()).await?;
            Some(key)
        } else {
            None
        };

        if let Some(key) = &idempotency_key {
            let idem_value = (request_id, content_hash);
            let won = self
                .cache
                .set_if_absent(&CacheKey::idempotency(key), &idem_value, self.ttl())
                .await?;
            if !won {
                if let Some((existing_id, _)) = self.lookup_idempotency(key).await? {
                    return self.await_or_accept(existing_id, sync).await;
                }
            }
        }

        let invocation = RequestInvocation {
            request_id,
            xml_key,
            response_key,
            metadata_key,
            group_count: None,
            execution_token: Uuid::new_v4().to_string(),
        };

        // Subscribe before publishing: otherwise a worker fast enough to
        // finish the request between publish and subscribe would have its
        // terminal lifecycle event missed entirely.
        let lifecycle_topic = self.topics.broadcast_topic::<LifecycleEvent>(TOPIC_REQUEST_LIFECYCLE);
        let subscriber = if sync {
            Some(lifecycle_topic.subscribe().await?)
        } else {
            None
        };

        let invoke_topic = self.topics.stream_topic::<RequestInvocation>(STREAM_REQUEST_INVOKE);
        invoke_topic.publish(&invocation).await?;

        match subscriber {
            Some(subscriber) => self.finish_sync(request_id, subscriber).await,
            None => Ok(SubmitOutcome::Accepted { request_id }),
        }
    }

    async fn await_or_accept(&self, request_id: Uuid, sync: bool) -> Result<SubmitOutcome, EngineError> {
        if !sync {
            return Ok(SubmitOutcome::Pending { request_id });
        }

        // The request may belong to an idempotent resubmission of an
        // already-terminal request; check current state before waiting on
        // an event that may have fired long ago.
        let state: Option<RequestState> = self
            .cache
            .get(&CacheKey::request_state(&request_id.to_string()))
            .await?;
        if let Some(state) = state {
            match state.status {
                RequestStatusTag::Succeeded => return self.read_success(request_id).await,
                RequestStatusTag::Failed => {
                    let reason = self.failure_reason(request_id).await;
                    return Ok(SubmitOutcome::SyncFailed { request_id, reason });
                }
                _ => {}
            }
        }

        let topic = self.topics.broadcast_topic::<LifecycleEvent>(TOPIC_REQUEST_LIFECYCLE);
        let subscriber = topic.subscribe().await?;
        self.finish_sync(request_id, subscriber).await
    }

    async fn read_success(&self, request_id: Uuid) -> Result<SubmitOutcome, EngineError> {
        let response_key = CacheKey::request_response(&request_id.to_string());
        match self.cache.get_raw(&response_key).await? {
            Some(bytes) => Ok(SubmitOutcome::SyncSucceeded {
                request_id,
                response_xml: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            None => Ok(SubmitOutcome::SyncFailed {
                request_id,
                reason: None,
            }),
        }
    }

    async fn finish_sync(
        &self,
        request_id: Uuid,
        mut subscriber: crate::data::topics::BroadcastTopicSubscriber<LifecycleEvent>,
    ) -> Result<SubmitOutcome, EngineError> {
        match self.sync_wait(request_id, &mut subscriber).await? {
            Some(true) => self.read_success(request_id).await,
            Some(false) => {
                let reason = self.failure_reason(request_id).await;
                Ok(SubmitOutcome::SyncFailed { request_id, reason })
            }
            None => Ok(SubmitOutcome::Pending { request_id }),
        }
    }

    /// Blocks on an already-subscribed lifecycle stream until a terminal
    /// event for `request_id` arrives or the sync-wait timeout elapses.
    /// Returns `Some(true)` on success, `Some(false)` on failure, `None` on
    /// timeout.
    async fn sync_wait(
        &self,
        request_id: Uuid,
        subscriber: &mut crate::data::topics::BroadcastTopicSubscriber<LifecycleEvent>,
    ) -> Result<Option<bool>, EngineError> {
        let deadline = Instant::now() + Duration::from_millis(self.limits.sync_wait_timeout_ms);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            match tokio::time::timeout(remaining, subscriber.recv()).await {
                Ok(Ok(event)) => {
                    if event.request_id != request_id {
                        continue;
                    }
                    match event.status {
                        LifecycleStatus::Succeeded => return Ok(Some(true)),
                        LifecycleStatus::Failed => return Ok(Some(false)),
                        _ => continue,
                    }
                }
                Ok(Err(_)) => return Ok(None),
                Err(_) => return Ok(None),
            }
        }
    }

    async fn failure_reason(&self, request_id: Uuid) -> Option<String> {
        let key = CacheKey::request_failure(&request_id.to_string());
        let bytes = self.cache.get_raw(&key).await.ok().flatten()?;
        let detail: crate::domain::types::FailureDetail = rmp_serde::from_slice(&bytes).ok()?;
        Some(detail.reason)
    }

    async fn lookup_idempotency(&self, key: &str) -> Result<Option<(Uuid, String)>, EngineError> {
        let value: Option<(Uuid, String)> = self.cache.get(&CacheKey::idempotency(key)).await?;
        Ok(value)
    }

    /// Distinguishes a request that expired from one that never existed,
    /// once its state key is already gone.
    async fn missing_request_error(&self, request_id: Uuid) -> EngineError {
        match self
            .cache
            .exists(&CacheKey::request_tombstone(&request_id.to_string()))
            .await
        {
            Ok(true) => EngineError::gone(Some(request_id)),
            _ => EngineError::not_found(Some(request_id)),
        }
    }

    /// `GET /valuation/{id}/status`.
    pub async fn status(&self, request_id: Uuid) -> Result<StatusResponse, EngineError> {
        let state: Option<RequestState> = self
            .cache
            .get(&CacheKey::request_state(&request_id.to_string()))
            .await?;
        match state {
            Some(state) => Ok(StatusResponse::from((request_id, state))),
            None => Err(self.missing_request_error(request_id).await),
        }
    }

    /// `GET /valuation/{id}/results`.
    pub async fn results(&self, request_id: Uuid) -> Result<ResultsOutcome, EngineError> {
        let response_key = CacheKey::request_response(&request_id.to_string());
        if let Some(bytes) = self.cache.get_raw(&response_key).await? {
            return Ok(ResultsOutcome::Ready(String::from_utf8_lossy(&bytes).into_owned()));
        }

        let state: Option<RequestState> = self
            .cache
            .get(&CacheKey::request_state(&request_id.to_string()))
            .await?;
        match state {
            Some(state) if state.status == RequestStatusTag::Failed => {
                let reason = self.failure_reason(request_id).await;
                Ok(ResultsOutcome::Failed { reason })
            }
            Some(_) => Err(EngineError::NotReady {
                request_id: Some(request_id),
            }),
            None => Err(self.missing_request_error(request_id).await),
        }
    }

    /// Background ingress consumer: initializes request-state and hands the
    /// request off, independently of R's own delivery cursor on the same
    /// stream (see `CONSUMER_GROUP_FRONT_INGRESS` vs
    /// `CONSUMER_GROUP_REQUEST_ORCHESTRATORS`).
    pub async fn run_ingress_consumer(&self, mut shutdown: watch::Receiver<bool>) {
        let invoke_topic = self.topics.stream_topic::<RequestInvocation>(STREAM_REQUEST_INVOKE);
        let mut subscriber = match invoke_topic
            .subscribe(
                CONSUMER_GROUP_FRONT_INGRESS,
                &self.consumer_name,
                StreamStartPosition::Beginning,
            )
            .await
        {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "front ingress consumer failed to subscribe");
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
                        tracing::info!("front ingress consumer shutting down");
                        break;
                    }
                }
                received = subscriber.recv() => {
                    match received {
                        Ok((msg_id, invocation)) => {
                            if self.handle_ingress(&invocation).await {
                                if let Err(e) = acker.ack(&msg_id).await {
                                    tracing::warn!(error = %e, msg_id, "failed to ack ingress envelope");
                                }
                            }
                            // On failure the envelope is left unacknowledged
                            // and is redelivered by the consumer group.
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "ingress recv error, backing off");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
                _ = claim_interval.tick() => {
                    self.claim_stuck_ingress(&claimer, &acker).await;
                }
            }
        }
    }

    /// Claim ingress envelopes left pending by a crashed ingress consumer.
    async fn claim_stuck_ingress(
        &self,
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
                tracing::warn!(error = %e, "failed to claim stuck ingress envelopes");
                return;
            }
        };

        if messages.is_empty() {
            return;
        }
        tracing::debug!(count = messages.len(), "claiming stuck ingress envelopes");

        for msg in messages {
            match rmp_serde::from_slice::<RequestInvocation>(&msg.payload) {
                Ok(invocation) => {
                    if self.handle_ingress(&invocation).await
                        && let Err(e) = acker.ack(&msg.id).await
                    {
                        tracing::warn!(error = %e, msg_id = %msg.id, "failed to ack claimed ingress envelope");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, msg_id = %msg.id, "failed to decode claimed ingress envelope, acking to discard");
                    if let Err(ack_err) = acker.ack(&msg.id).await {
                        tracing::warn!(error = %ack_err, msg_id = %msg.id, "failed to ack invalid envelope");
                    }
                }
            }
        }
    }

    /// Returns `true` if the envelope was fully processed (and should be
    /// acknowledged), `false` if it should be retried.
    async fn handle_ingress(&self, invocation: &RequestInvocation) -> bool {
        let state_key = CacheKey::request_state(&invocation.request_id.to_string());

        match self.cache.get::<RequestState>(&state_key).await {
            Ok(Some(existing)) if existing.status != RequestStatusTag::Received => {
                // Already progressed past init by a previous delivery; skip
                // re-invocation but still acknowledge.
                return true;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                let now = now_ms();
                let state = RequestState {
                    status: RequestStatusTag::Received,
                    xml_key: invocation.xml_key.clone(),
                    response_key: invocation.response_key.clone(),
                    metadata_key: invocation.metadata_key.clone(),
                    group_count: invocation.group_count,
                    current_group: 0,
                    retry_count: 0,
                    received_at: now,
                    submitted_at: now,
                    completed_at: None,
                };
                if let Err(e) = self.cache.set(&state_key, &state, self.ttl()).await {
                    tracing::warn!(error = %e, "failed to initialize request-state");
                    return false;
                }

                let tombstone_key = CacheKey::request_tombstone(&invocation.request_id.to_string());
                if let Err(e) = self
                    .cache
                    .set_raw(&tombstone_key, Vec::new(), self.tombstone_ttl())
                    .await
                {
                    tracing::warn!(error = %e, "failed to write request tombstone");
                }

                let topic = self.topics.broadcast_topic::<LifecycleEvent>(TOPIC_REQUEST_LIFECYCLE);
                let event = LifecycleEvent::new(invocation.request_id, LifecycleStatus::Received, None, now);
                if let Err(e) = topic.publish(&event).await {
                    tracing::warn!(error = %e, "failed to publish received lifecycle event");
                    return false;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read request-state during ingress");
                return false;
            }
        }

        true
    }
}

/// Helper used by the `orchestrator` binary's own consumer group name, kept
/// here since both F and R read `STREAM_REQUEST_INVOKE` but must never
/// compete for the same delivery.
pub fn orchestrator_group_name() -> &'static str {
    CONSUMER_GROUP_REQUEST_ORCHESTRATORS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CacheConfig, TopicsConfig};

    async fn make_front() -> (FrontService, Arc<CacheService>, Arc<TopicService>) {
        let cache = Arc::new(CacheService::new(&CacheConfig::default()).await.unwrap());
        let topics = Arc::new(
            TopicService::from_topics_config(&TopicsConfig::default())
                .await
                .unwrap(),
        );
        let limits = FrontLimits {
            payload_max_bytes: 1024 * 1024,
            sync_wait_timeout_ms: 500,
            lifecycle_block_ms: 100,
            request_ttl_seconds: 3600,
        };
        let front = FrontService::new(cache.clone(), topics.clone(), limits, "test-front");
        (front, cache, topics)
    }

    #[tokio::test]
    async fn test_submit_async_returns_accepted() {
        let (front, _cache, _topics) = make_front().await;
        let outcome = front
            .submit("<vnml/>".to_string(), false, None, None)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Accepted { .. }));
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_body() {
        let (front, _cache, _topics) = make_front().await;
        let err = front.submit(String::new(), false, None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_submit_rejects_oversized_payload() {
        let (front, cache, topics) = make_front().await;
        let limits = FrontLimits {
            payload_max_bytes: 4,
            sync_wait_timeout_ms: 500,
            lifecycle_block_ms: 100,
            request_ttl_seconds: 3600,
        };
        let front = FrontService::new(cache, topics, limits, "test-front");
        let _ = &front;
        let err = front
            .submit("<vnml/>".to_string(), false, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_status_not_found_for_unknown_request() {
        let (front, _cache, _topics) = make_front().await;
        let err = front.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_ingress_consumer_initializes_state_once() {
        let (front, cache, _topics) = make_front().await;
        let request_id = Uuid::new_v4();
        let invocation = RequestInvocation {
            request_id,
            xml_key: CacheKey::request_xml(&request_id.to_string()),
            response_key: CacheKey::request_response(&request_id.to_string()),
            metadata_key: None,
            group_count: None,
            execution_token: "tok".to_string(),
        };

        assert!(front.handle_ingress(&invocation).await);
        let state: RequestState = cache
            .get(&CacheKey::request_state(&request_id.to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.status, RequestStatusTag::Received);

        // Redelivery: state already exists and is still `received`, so this
        // re-initializes identically rather than erroring, and is still
        // acknowledged.
        assert!(front.handle_ingress(&invocation).await);
    }
}
