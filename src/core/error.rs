//! Error types for pool and semaphore operations.

use thiserror::Error;

use crate::core::task::{TaskId, TaskStatus};
use crate::infra::store::StoreError;

/// Errors produced by the worker pool, semaphore, and sweeper.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Configuration value rejected (e.g. max workers below 1).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No task with the given id in the active set or pending queue.
    #[error("unknown task: {0}")]
    NotFound(TaskId),

    /// Execution backend failure with context.
    #[error("backend error: {0}")]
    Backend(String),

    /// The shared state store failed; the operation is aborted without
    /// mutating any persisted state.
    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    /// Synthetic failure attached by the sweeper when a running task's
    /// heartbeat has not refreshed within the stale threshold.
    #[error("stale heartbeat on task {task}: no refresh for {age_ms} ms")]
    StaleHeartbeat {
        /// Task whose heartbeat went stale.
        task: TaskId,
        /// Milliseconds since the last heartbeat refresh.
        age_ms: u128,
    },

    /// Semaphore acquisition did not succeed within the caller's timeout.
    #[error("semaphore acquire timed out after {timeout_ms} ms")]
    AcquireTimeout {
        /// The timeout the caller waited for, in milliseconds.
        timeout_ms: u128,
    },

    /// A status transition that would regress or leave a terminal state.
    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition {
        /// Status the task currently holds.
        from: TaskStatus,
        /// Status the caller attempted to move to.
        to: TaskStatus,
    },
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
