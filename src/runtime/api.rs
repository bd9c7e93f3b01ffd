//! Administrative request/response models and helpers.
//!
//! Thin, transport-agnostic surface for operator tooling (CLIs, admin
//! endpoints): stats, limit changes, cancellation, forced queue passes, and
//! the semaphore's emergency release. Errors are flattened to user-readable
//! strings; the caller decides how to render them.

use serde::{Deserialize, Serialize};

use crate::core::semaphore::DistributedSemaphore;
use crate::core::task::TaskId;
use crate::core::worker_pool::{PoolStats, WorkerPool};
use crate::runtime::Spawn;

/// Cancellation request for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Task to cancel.
    pub task_id: TaskId,
}

/// Cancellation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    /// Task the request named.
    pub task_id: TaskId,
    /// False when the id was unknown (already finished or never existed).
    pub cancelled: bool,
}

/// Request to change the pool's soft concurrency limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetMaxWorkersRequest {
    /// New limit; must be at least 1.
    pub max_workers: usize,
}

/// Outcome of a forced queue-processing pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessQueueResponse {
    /// Number of tasks promoted to running.
    pub promoted: usize,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
}

/// Reloaded utilization snapshot.
pub async fn get_stats(pool: &WorkerPool) -> Result<PoolStats, String> {
    pool.stats().await.map_err(|e| e.to_string())
}

/// Apply a new soft concurrency limit.
pub async fn set_max_workers(
    pool: &WorkerPool,
    req: SetMaxWorkersRequest,
) -> Result<(), String> {
    pool.set_max_workers(req.max_workers)
        .await
        .map_err(|e| e.to_string())
}

/// Cancel a task by id.
pub async fn cancel_task(pool: &WorkerPool, req: CancelRequest) -> Result<CancelResponse, String> {
    let cancelled = pool.cancel(req.task_id).await.map_err(|e| e.to_string())?;
    Ok(CancelResponse {
        task_id: req.task_id,
        cancelled,
    })
}

/// Force a queue-processing pass.
pub async fn process_queue(pool: &WorkerPool) -> Result<ProcessQueueResponse, String> {
    let promoted = pool.process_queue().await.map_err(|e| e.to_string())?;
    Ok(ProcessQueueResponse { promoted })
}

/// Emergency release of every permit in a semaphore scope.
pub async fn force_release_permits<S>(semaphore: &DistributedSemaphore<S>) -> Result<(), String>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    semaphore
        .force_release_all()
        .await
        .map_err(|e| e.to_string())
}

/// Return a health payload.
#[must_use]
pub const fn health() -> Health {
    Health { ok: true }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_is_ok() {
        assert!(health().ok);
    }

    #[test]
    fn test_request_models_round_trip() {
        let req = SetMaxWorkersRequest { max_workers: 8 };
        let json = serde_json::to_string(&req).unwrap();
        let back: SetMaxWorkersRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_workers, 8);

        let cancel = CancelRequest {
            task_id: TaskId::new(),
        };
        let json = serde_json::to_string(&cancel).unwrap();
        let back: CancelRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_id, cancel.task_id);
    }
}
