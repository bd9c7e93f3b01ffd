//! Execution backend seam.
//!
//! The pool never interprets job bodies. It hands a target and an opaque
//! parameter bag to an [`ExecutionBackend`], keeps the returned handle, and
//! later polls or terminates through it. Any job runner (task queue, RPC
//! service, subprocess supervisor) can sit behind this trait.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::PoolError;
use crate::core::task::TaskTarget;

/// Opaque identifier the backend assigns to a started job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendHandle(String);

impl BackendHandle {
    /// The raw handle token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BackendHandle {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for BackendHandle {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status reported by the execution backend for a started job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    /// Accepted but not yet executing.
    Pending,
    /// Executing.
    Running,
    /// Finished successfully.
    Success,
    /// Finished with a failure reason.
    Failure(String),
    /// Terminated before completion (revoked/killed).
    Revoked,
}

impl BackendStatus {
    /// Whether this status means the job body will make no further progress.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure(_) | Self::Revoked)
    }
}

/// Interface to whatever actually executes job bodies.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Start a job for `target` with the caller's opaque parameters,
    /// returning the handle used for later polling/termination.
    async fn start(
        &self,
        target: &TaskTarget,
        parameters: &serde_json::Value,
    ) -> Result<BackendHandle, PoolError>;

    /// Report the current status of a previously started job.
    async fn poll_status(&self, handle: &BackendHandle) -> Result<BackendStatus, PoolError>;

    /// Best-effort termination of a running job. The caller treats failures
    /// as non-fatal.
    async fn terminate(&self, handle: &BackendHandle) -> Result<(), PoolError>;
}
