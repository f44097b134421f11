//! Wire and storage types shared by the front, orchestrator, and worker
//! binaries: the request/group state mappings, the stream records that move
//! between them, and the lifecycle event observed by sync waiters.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::topics::TopicMessage;

/// Terminal and in-flight status of a request, as stored in `state:request:<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatusTag {
    Received,
    Started,
    Succeeded,
    Failed,
}

impl RequestStatusTag {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Request-state mapping, keyed by `requestId` (`CacheKey::request_state`).
///
/// Created by F on ingress-envelope claim; mutated afterwards only by the
/// single R instance handling this request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestState {
    pub status: RequestStatusTag,
    pub xml_key: String,
    pub response_key: String,
    pub metadata_key: Option<String>,
    pub group_count: Option<u32>,
    pub current_group: u32,
    pub retry_count: u32,
    pub received_at: i64,
    pub submitted_at: i64,
    pub completed_at: Option<i64>,
}

/// Status of a single group, as stored in `state:request:<id>:group:<g>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatusTag {
    Running,
    Completed,
    Failed,
}

/// Group-state mapping, created by R on group start and mutated only by the
/// owning R.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupState {
    pub expected: u32,
    pub completed: u32,
    pub failed: u32,
    pub status: GroupStatusTag,
    /// Highest successful `attempt` observed per task, used to enforce
    /// result-immutability (a later record with `attempt` <= this is a no-op).
    #[serde(default)]
    pub succeeded_attempt: std::collections::HashMap<String, u32>,
}

impl GroupState {
    pub fn new(expected: u32) -> Self {
        Self {
            expected,
            completed: 0,
            failed: 0,
            status: GroupStatusTag::Running,
            succeeded_attempt: std::collections::HashMap::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.expected && self.failed == 0
    }

    pub fn is_failed(&self) -> bool {
        self.failed > 0
    }
}

/// Lifecycle status observed on the request-lifecycle broadcast topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Received,
    Started,
    GroupStarted,
    GroupCompleted,
    Succeeded,
    Failed,
}

/// Lifecycle event, fanned out on `TOPIC_REQUEST_LIFECYCLE`. No consumer
/// group: every reader (mainly F's sync waiters) gets every event from the
/// point it subscribed and filters by `requestId` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub request_id: Uuid,
    pub status: LifecycleStatus,
    pub group: Option<u32>,
    pub at: i64,
}

impl LifecycleEvent {
    pub fn new(request_id: Uuid, status: LifecycleStatus, group: Option<u32>, at: i64) -> Self {
        Self {
            request_id,
            status,
            group,
            at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            LifecycleStatus::Succeeded | LifecycleStatus::Failed
        )
    }
}

impl TopicMessage for LifecycleEvent {
    fn size_bytes(&self) -> usize {
        // Fixed-size fields plus a fixed overhead estimate for the UUID/enum;
        // good enough for backpressure accounting on a tiny message.
        96
    }
}

/// Request invocation record carried on `stream:request:invoke`: the
/// internal F -> R handoff, identical in shape to the argument R is
/// "invoked with".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInvocation {
    pub request_id: Uuid,
    pub xml_key: String,
    pub response_key: String,
    pub metadata_key: Option<String>,
    pub group_count: Option<u32>,
    pub execution_token: String,
}

impl TopicMessage for RequestInvocation {
    fn size_bytes(&self) -> usize {
        self.xml_key.len() + self.response_key.len() + 128
    }
}

/// Task-dispatch record carried on `stream:task:dispatch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDispatch {
    pub request_id: Uuid,
    pub group_idx: u32,
    pub task_id: String,
    pub payload_key: String,
    pub result_key: String,
    pub attempt: u32,
}

impl TopicMessage for TaskDispatch {
    fn size_bytes(&self) -> usize {
        self.payload_key.len() + self.result_key.len() + self.task_id.len() + 64
    }
}

/// Outcome reported by a task worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed,
}

/// Task-update record carried on `stream:task:updates`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub request_id: Uuid,
    pub group_idx: u32,
    pub task_id: String,
    pub status: TaskOutcome,
    pub result_key: Option<String>,
    pub error: Option<String>,
    pub attempt: u32,
    pub duration_ms: Option<u64>,
}

impl TopicMessage for TaskUpdate {
    fn size_bytes(&self) -> usize {
        self.task_id.len() + self.error.as_ref().map(String::len).unwrap_or(0) + 96
    }
}

/// Normalized status response for `GET /valuation/{id}/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub request_id: Uuid,
    pub status: RequestStatusTag,
    pub current_group: u32,
    pub group_count: Option<u32>,
    pub received_at: i64,
    pub completed_at: Option<i64>,
}

impl From<(Uuid, RequestState)> for StatusResponse {
    fn from((request_id, state): (Uuid, RequestState)) -> Self {
        Self {
            request_id,
            status: state.status,
            current_group: state.current_group,
            group_count: state.group_count,
            received_at: state.received_at,
            completed_at: state.completed_at,
        }
    }
}

/// Failure detail persisted at `cache:request:<id>:failure`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    pub request_id: Uuid,
    pub reason: String,
    pub group_idx: Option<u32>,
    pub task_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_state_completion() {
        let mut gs = GroupState::new(3);
        assert!(!gs.is_complete());
        gs.completed = 3;
        assert!(gs.is_complete());
        assert!(!gs.is_failed());
    }

    #[test]
    fn test_group_state_failure() {
        let mut gs = GroupState::new(3);
        gs.completed = 2;
        gs.failed = 1;
        assert!(gs.is_failed());
        assert!(!gs.is_complete());
    }

    #[test]
    fn test_lifecycle_event_terminal() {
        let id = Uuid::new_v4();
        let started = LifecycleEvent::new(id, LifecycleStatus::Started, None, 0);
        assert!(!started.is_terminal());
        let succeeded = LifecycleEvent::new(id, LifecycleStatus::Succeeded, None, 0);
        assert!(succeeded.is_terminal());
    }

    #[test]
    fn test_request_status_is_terminal() {
        assert!(RequestStatusTag::Succeeded.is_terminal());
        assert!(RequestStatusTag::Failed.is_terminal());
        assert!(!RequestStatusTag::Started.is_terminal());
    }
}
