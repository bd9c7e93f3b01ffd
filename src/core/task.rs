//! Task model and status state machine.
//!
//! A [`Task`] is the unit of admitted work: immutable identity, a target
//! naming what it synchronizes, an opaque parameter bag for the execution
//! backend, and bookkeeping timestamps. Status only ever moves forward;
//! a terminal task is never mutated again.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::backend::BackendHandle;
use crate::core::error::PoolError;
use crate::util::clock::now_ms;

/// Opaque unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a task synchronizes: a source and an operation on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTarget {
    /// Data-source identifier (e.g. a connector name).
    pub source: String,
    /// Operation name within the source (e.g. `full_refresh`).
    pub operation: String,
}

impl TaskTarget {
    /// Build a target from source and operation names.
    pub fn new(source: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for TaskTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.operation)
    }
}

/// Status of a task in the pool lifecycle.
///
/// Legal transitions: `Queued -> Running -> {Completed, Failed, Cancelled}`,
/// plus `Queued -> Cancelled` (cancel before admission) and
/// `Queued -> Failed` (backend refused the start). No transition leaves a
/// terminal status.
///
/// Persisted as a plain string with a lossy reverse mapping: a status token
/// written by a newer deployment deserializes as [`TaskStatus::Failed`]
/// rather than wedging the whole snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    /// Waiting in the pending queue for a free slot.
    Queued,
    /// Admitted and started on the execution backend.
    Running,
    /// Backend reported success.
    Completed,
    /// Backend reported failure, the start was refused, or the sweeper
    /// reaped a stale heartbeat.
    Failed,
    /// Cancelled by an operator before or during execution.
    Cancelled,
}

impl TaskStatus {
    /// Stable wire token for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses accept no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Running | Self::Cancelled | Self::Failed),
            Self::Running => matches!(next, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.as_str().to_owned()
    }
}

impl From<String> for TaskStatus {
    fn from(token: String) -> Self {
        match token.as_str() {
            "queued" => Self::Queued,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            // "failed", plus any token from a newer deployment: fail safe.
            _ => Self::Failed,
        }
    }
}

/// One admitted unit of sync work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque unique identifier.
    pub id: TaskId,
    /// Source + operation this task synchronizes.
    pub target: TaskTarget,
    /// Opaque parameter bag passed to the execution backend.
    pub parameters: serde_json::Value,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Queue priority; higher is served first, ties break FIFO on
    /// `queued_at_ms`.
    pub priority: i64,
    /// When the task was created, ms since epoch.
    pub queued_at_ms: u128,
    /// When the task entered `Running`, if it did.
    pub started_at_ms: Option<u128>,
    /// When the task reached a terminal status, if it did.
    pub completed_at_ms: Option<u128>,
    /// Last liveness refresh while running.
    pub heartbeat_at_ms: Option<u128>,
    /// Handle assigned by the execution backend once running.
    pub backend_handle: Option<BackendHandle>,
    /// Failure/cancellation detail, if any.
    pub error: Option<String>,
}

impl Task {
    /// Create a fresh queued task.
    #[must_use]
    pub fn new(target: TaskTarget, parameters: serde_json::Value, priority: i64) -> Self {
        Self {
            id: TaskId::new(),
            target,
            parameters,
            status: TaskStatus::Queued,
            priority,
            queued_at_ms: now_ms(),
            started_at_ms: None,
            completed_at_ms: None,
            heartbeat_at_ms: None,
            backend_handle: None,
            error: None,
        }
    }

    /// Move the task to `Running` with the backend handle that now owns it.
    ///
    /// Entering `Running` requires the handle; the admission time doubles as
    /// the first heartbeat.
    pub fn mark_running(&mut self, handle: BackendHandle) -> Result<(), PoolError> {
        self.checked_transition(TaskStatus::Running)?;
        let now = now_ms();
        self.started_at_ms = Some(now);
        self.heartbeat_at_ms = Some(now);
        self.backend_handle = Some(handle);
        Ok(())
    }

    /// Move the task to a terminal status, recording the completion time and
    /// an optional error detail.
    pub fn mark_terminal(
        &mut self,
        status: TaskStatus,
        error: Option<String>,
    ) -> Result<(), PoolError> {
        if !status.is_terminal() {
            return Err(PoolError::IllegalTransition {
                from: self.status,
                to: status,
            });
        }
        self.checked_transition(status)?;
        self.completed_at_ms = Some(now_ms());
        self.error = error;
        Ok(())
    }

    /// Refresh the liveness heartbeat. Only meaningful while running.
    pub fn touch(&mut self) {
        if self.status == TaskStatus::Running {
            self.heartbeat_at_ms = Some(now_ms());
        }
    }

    /// Milliseconds since the last heartbeat, if the task ever had one.
    #[must_use]
    pub fn heartbeat_age_ms(&self, now: u128) -> Option<u128> {
        self.heartbeat_at_ms.map(|hb| now.saturating_sub(hb))
    }

    fn checked_transition(&mut self, next: TaskStatus) -> Result<(), PoolError> {
        if !self.status.can_transition(next) {
            return Err(PoolError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(
            TaskTarget::new("crm", "incremental"),
            serde_json::json!({"cursor": 42}),
            0,
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut t = task();
        assert_eq!(t.status, TaskStatus::Queued);

        t.mark_running(BackendHandle::from("h-1")).unwrap();
        assert_eq!(t.status, TaskStatus::Running);
        assert!(t.started_at_ms.is_some());
        assert_eq!(t.heartbeat_at_ms, t.started_at_ms);

        t.mark_terminal(TaskStatus::Completed, None).unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert!(t.completed_at_ms.is_some());
    }

    #[test]
    fn test_queued_cancel_and_failed_start() {
        let mut cancelled = task();
        cancelled
            .mark_terminal(TaskStatus::Cancelled, None)
            .unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        let mut refused = task();
        refused
            .mark_terminal(TaskStatus::Failed, Some("backend refused".into()))
            .unwrap();
        assert_eq!(refused.status, TaskStatus::Failed);
        assert_eq!(refused.error.as_deref(), Some("backend refused"));
    }

    #[test]
    fn test_terminal_is_frozen() {
        let mut t = task();
        t.mark_terminal(TaskStatus::Cancelled, None).unwrap();

        let err = t.mark_running(BackendHandle::from("h-2")).unwrap_err();
        assert!(matches!(err, PoolError::IllegalTransition { .. }));
        let err = t.mark_terminal(TaskStatus::Failed, None).unwrap_err();
        assert!(matches!(err, PoolError::IllegalTransition { .. }));
        assert_eq!(t.status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_no_regression_to_queued_or_running() {
        assert!(!TaskStatus::Running.can_transition(TaskStatus::Queued));
        assert!(!TaskStatus::Completed.can_transition(TaskStatus::Running));
        assert!(!TaskStatus::Failed.can_transition(TaskStatus::Queued));
    }

    #[test]
    fn test_non_terminal_mark_terminal_rejected() {
        let mut t = task();
        let err = t.mark_terminal(TaskStatus::Running, None).unwrap_err();
        assert!(matches!(err, PoolError::IllegalTransition { .. }));
    }

    #[test]
    fn test_status_serde_round_trip() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let back: TaskStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
        }
    }

    #[test]
    fn test_unknown_status_token_maps_to_failed() {
        // A newer deployment may persist tokens this build has never seen.
        let status: TaskStatus = serde_json::from_str("\"archived\"").unwrap();
        assert_eq!(status, TaskStatus::Failed);
    }

    #[test]
    fn test_task_serde_round_trip() {
        let mut t = task();
        t.mark_running(BackendHandle::from("celery:abc")).unwrap();

        let json = serde_json::to_value(&t).unwrap();
        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, t.id);
        assert_eq!(back.status, TaskStatus::Running);
        assert_eq!(back.backend_handle, t.backend_handle);
        assert_eq!(back.heartbeat_at_ms, t.heartbeat_at_ms);
    }

    #[test]
    fn test_touch_only_refreshes_running() {
        let mut t = task();
        t.touch();
        assert!(t.heartbeat_at_ms.is_none());

        t.mark_running(BackendHandle::from("h")).unwrap();
        let first = t.heartbeat_at_ms.unwrap();
        t.touch();
        assert!(t.heartbeat_at_ms.unwrap() >= first);
    }
}
