//! Task Worker (W): stateless execution of dispatched tasks.
//!
//! W never touches request or group state. It reads a task payload, runs it
//! through a [`ValuationTask`], writes the result, and reports the outcome
//! on the task-update stream. Every step is a no-op on redelivery: the
//! result write and update publish are tolerant of being repeated for the
//! same `(requestId, groupIdx, taskId, attempt)`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::core::constants::{
    CLAIM_POLL_INTERVAL_MS, CONSUMER_GROUP_TASK_WORKERS, STREAM_TASK_DISPATCH,
    STUCK_MESSAGE_CLAIM_BATCH, STUCK_MESSAGE_MIN_IDLE_MS,
};
use crate::data::cache::{CacheKey, CacheService};
use crate::data::topics::{StreamStartPosition, TopicService};
use crate::domain::types::{TaskDispatch, TaskOutcome, TaskUpdate};
use crate::domain::valuation::ValuationTask;

pub struct WorkerService {
    cache: Arc<CacheService>,
    topics: Arc<TopicService>,
    valuator: Arc<dyn ValuationTask>,
    consumer_name: String,
}

impl WorkerService {
    pub fn new(
        cache: Arc<CacheService>,
        topics: Arc<TopicService>,
        valuator: Arc<dyn ValuationTask>,
        consumer_name: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            topics,
            valuator,
            consumer_name: consumer_name.into(),
        }
    }

    /// Run the dispatch-consumer loop until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let dispatch_topic = self.topics.stream_topic::<TaskDispatch>(STREAM_TASK_DISPATCH);
        let mut subscriber = match dispatch_topic
            .subscribe(
                CONSUMER_GROUP_TASK_WORKERS,
                &self.consumer_name,
                StreamStartPosition::Beginning,
            )
            .await
        {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "worker failed to subscribe to task-dispatch stream");
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
                        tracing::info!("worker dispatch loop shutting down");
                        break;
                    }
                }
                received = subscriber.recv() => {
                    match received {
                        Ok((msg_id, dispatch)) => {
                            self.handle_dispatch(&dispatch).await;
                            if let Err(e) = acker.ack(&msg_id).await {
                                tracing::warn!(error = %e, msg_id, "failed to ack task dispatch");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "task-dispatch recv error, backing off");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
                _ = claim_interval.tick() => {
                    self.claim_stuck_dispatches(&claimer, &acker).await;
                }
            }
        }
    }

    /// Claim dispatches left pending by a crashed worker and process them.
    async fn claim_stuck_dispatches(
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
                tracing::warn!(error = %e, "failed to claim stuck task dispatches");
                return;
            }
        };

        if messages.is_empty() {
            return;
        }
        tracing::debug!(count = messages.len(), "claiming stuck task dispatches");

        for msg in messages {
            match rmp_serde::from_slice::<TaskDispatch>(&msg.payload) {
                Ok(dispatch) => {
                    self.handle_dispatch(&dispatch).await;
                    if let Err(e) = acker.ack(&msg.id).await {
                        tracing::warn!(error = %e, msg_id = %msg.id, "failed to ack claimed task dispatch");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, msg_id = %msg.id, "failed to decode claimed task dispatch, acking to discard");
                    if let Err(ack_err) = acker.ack(&msg.id).await {
                        tracing::warn!(error = %ack_err, msg_id = %msg.id, "failed to ack invalid dispatch");
                    }
                }
            }
        }
    }

    async fn handle_dispatch(&self, dispatch: &TaskDispatch) {
        let start = Instant::now();
        let task_xml = match self.cache.get_raw(&dispatch.payload_key).await {
            Ok(Some(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(None) => {
                self.report_failure(dispatch, "task payload not found".to_string())
                    .await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, task_id = %dispatch.task_id, "failed to read task payload");
                self.report_failure(dispatch, format!("payload read failed: {e}"))
                    .await;
                return;
            }
        };

        match self.valuator.execute(&task_xml) {
            Ok(result) => {
                // Guarded by attempt number: a stale lower-attempt redelivery
                // processed after a later attempt already succeeded must not
                // clobber that attempt's result.
                if let Err(e) = self
                    .cache
                    .set_raw_if_newer(&dispatch.result_key, dispatch.attempt, result.into_bytes(), None)
                    .await
                {
                    tracing::warn!(error = %e, task_id = %dispatch.task_id, "failed to write task result");
                    self.report_failure(dispatch, format!("result write failed: {e}"))
                        .await;
                    return;
                }

                let update = TaskUpdate {
                    request_id: dispatch.request_id,
                    group_idx: dispatch.group_idx,
                    task_id: dispatch.task_id.clone(),
                    status: TaskOutcome::Completed,
                    result_key: Some(dispatch.result_key.clone()),
                    error: None,
                    attempt: dispatch.attempt,
                    duration_ms: Some(start.elapsed().as_millis() as u64),
                };
                self.publish_update(update).await;
            }
            Err(e) => {
                self.report_failure(dispatch, e.to_string()).await;
            }
        }
    }

    async fn report_failure(&self, dispatch: &TaskDispatch, error: String) {
        let update = TaskUpdate {
            request_id: dispatch.request_id,
            group_idx: dispatch.group_idx,
            task_id: dispatch.task_id.clone(),
            status: TaskOutcome::Failed,
            result_key: None,
            error: Some(error),
            attempt: dispatch.attempt,
            duration_ms: None,
        };
        self.publish_update(update).await;
    }

    async fn publish_update(&self, update: TaskUpdate) {
        let updates_topic = self
            .topics
            .stream_topic::<TaskUpdate>(crate::core::constants::STREAM_TASK_UPDATES);
        if let Err(e) = updates_topic.publish(&update).await {
            tracing::error!(error = %e, task_id = %update.task_id, "failed to publish task update");
        }
    }
}

/// Build the cache key a worker writes its result to. Not attempt-suffixed:
/// every attempt for a `(requestId, groupIdx, taskId)` writes the same key,
/// and `set_raw_if_newer` arbitrates between redelivered attempts.
pub fn result_key(request_id: &str, group_idx: u32, task_id: &str) -> String {
    CacheKey::task_result(request_id, group_idx, task_id)
}
