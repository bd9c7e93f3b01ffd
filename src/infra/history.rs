//! Job-history collaborator.
//!
//! On every terminal transition the pool tries to reconcile a higher-level
//! audit record with the task's outcome. Records are matched by an explicit
//! correlation key (the task id) rather than by scanning opaque payloads, so
//! lookups are indexed and false matches are impossible. Reconciliation is
//! best-effort: failures are logged by the caller and never block the pool.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::error::PoolError;
use crate::core::task::TaskStatus;

/// Terminal outcome pushed to the history collaborator.
#[derive(Debug, Clone)]
pub struct HistoryUpdate {
    /// Correlation key: the pool task id as a string.
    pub correlation_id: String,
    /// Terminal status the task reached.
    pub status: TaskStatus,
    /// When the task reached it, ms since epoch.
    pub completed_at_ms: u128,
    /// Failure/cancellation detail, if any.
    pub error: Option<String>,
}

/// History sink abstraction.
#[async_trait]
pub trait JobHistory: Send + Sync {
    /// Record a terminal outcome against the correlated audit record.
    async fn record_terminal(&self, update: HistoryUpdate) -> Result<(), PoolError>;
}

/// In-memory history sink for testing and dev.
#[derive(Debug, Default)]
pub struct InMemoryJobHistory {
    updates: Mutex<Vec<HistoryUpdate>>,
}

impl InMemoryJobHistory {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded updates.
    #[must_use]
    pub fn updates(&self) -> Vec<HistoryUpdate> {
        self.updates.lock().clone()
    }
}

#[async_trait]
impl JobHistory for InMemoryJobHistory {
    async fn record_terminal(&self, update: HistoryUpdate) -> Result<(), PoolError> {
        self.updates.lock().push(update);
        Ok(())
    }
}

/// Postgres-backed history sink (schema-only; DB I/O not wired).
pub struct PostgresJobHistory;

impl PostgresJobHistory {
    /// Returns SQL migration statements for the job-history table.
    #[must_use]
    pub fn migrations() -> &'static [&'static str] {
        &[
            r"
CREATE TABLE IF NOT EXISTS sync_job_history (
    correlation_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    error TEXT,
    completed_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_sync_job_history_status ON sync_job_history (status);
CREATE INDEX IF NOT EXISTS idx_sync_job_history_completed ON sync_job_history (completed_at);
",
        ]
    }
}

#[async_trait]
impl JobHistory for PostgresJobHistory {
    async fn record_terminal(&self, _update: HistoryUpdate) -> Result<(), PoolError> {
        // Stub: actual DB writes require a runtime + client; left to the
        // integration layer.
        Ok(())
    }
}
