//! Worker pool: admission control and priority queueing.
//!
//! Each process constructs its own `WorkerPool`, but the pool owns no state
//! of record - the active map and pending queue live in the shared store,
//! and every mutating operation is an explicit read-modify-write: load the
//! latest snapshot, apply the change, persist, return. That cycle is *not*
//! linearizable across processes: two processes racing on `submit` can both
//! observe one free slot and both admit, so `max_workers` is a soft
//! scheduling hint with transient over-admission bounded by the number of
//! racing processes. The hard resource ceiling belongs to the
//! [distributed semaphore](crate::core::semaphore::DistributedSemaphore).
//!
//! Dequeue order is strict (priority desc, queued-at asc). There is no
//! aging, so a starved low-priority task stays starved while higher
//! priorities keep arriving - callers are expected to assign priorities
//! accordingly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::backend::ExecutionBackend;
use crate::core::error::PoolError;
use crate::core::task::{Task, TaskId, TaskStatus, TaskTarget};
use crate::infra::history::{HistoryUpdate, JobHistory};
use crate::infra::store::{SharedStateStore, StoreError};
use crate::util::clock::now_ms;

/// How long persisted pool snapshots live without a refresh.
pub const DEFAULT_RETENTION_TTL: Duration = Duration::from_secs(60 * 60);

/// A queued task together with its 1-based queue position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    /// Position in the dequeue order, starting at 1.
    pub position: usize,
    /// The queued task record.
    pub task: Task,
}

/// Snapshot of pool utilization, reloaded from the store on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    /// Soft concurrency limit of this process's pool.
    pub max_workers: usize,
    /// Number of tasks currently running.
    pub active_count: usize,
    /// Number of tasks waiting in the queue.
    pub queued_count: usize,
    /// Running tasks, ordered by start time.
    pub active: Vec<Task>,
    /// Queued tasks in dequeue order with their positions.
    pub queued: Vec<QueuedTask>,
}

/// Persisted pool state: the store's copy is authoritative, this struct is
/// only ever a short-lived working copy inside one operation.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PoolSnapshot {
    active: HashMap<TaskId, Task>,
    pending: Vec<Task>,
}

impl PoolSnapshot {
    /// Strict dequeue order: priority desc, then FIFO on queue time.
    fn sort_pending(&mut self) {
        self.pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.queued_at_ms.cmp(&b.queued_at_ms))
        });
    }
}

/// Admission and queue manager for sync jobs.
pub struct WorkerPool {
    namespace: String,
    store: Arc<dyn SharedStateStore>,
    backend: Arc<dyn ExecutionBackend>,
    history: Option<Arc<dyn JobHistory>>,
    max_workers: AtomicUsize,
    retention_ttl: Duration,
}

impl WorkerPool {
    /// Create a pool bound to a store namespace.
    ///
    /// Rejects `max_workers` below 1. The namespace scopes the persisted
    /// keys (`{namespace}:active`, `{namespace}:pending`), so pools sharing
    /// a namespace share their state - that is how the fleet coordinates.
    pub fn new(
        namespace: impl Into<String>,
        store: Arc<dyn SharedStateStore>,
        backend: Arc<dyn ExecutionBackend>,
        history: Option<Arc<dyn JobHistory>>,
        max_workers: usize,
    ) -> Result<Self, PoolError> {
        if max_workers < 1 {
            return Err(PoolError::InvalidConfig(
                "max_workers must be at least 1".into(),
            ));
        }
        Ok(Self {
            namespace: namespace.into(),
            store,
            backend,
            history,
            max_workers: AtomicUsize::new(max_workers),
            retention_ttl: DEFAULT_RETENTION_TTL,
        })
    }

    /// Override the snapshot retention TTL.
    #[must_use]
    pub fn with_retention_ttl(mut self, ttl: Duration) -> Self {
        self.retention_ttl = ttl;
        self
    }

    /// Current soft concurrency limit.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers.load(Ordering::SeqCst)
    }

    /// Submit a task. Never blocks: the task either starts immediately
    /// (capacity permitting) or joins the pending queue.
    ///
    /// A backend start failure does not surface as an error here - the task
    /// is recorded as FAILED and its id is still returned, so the caller can
    /// inspect the outcome through the usual introspection surface.
    pub async fn submit(
        &self,
        target: TaskTarget,
        parameters: serde_json::Value,
        priority: i64,
    ) -> Result<TaskId, PoolError> {
        let mut snap = self.load().await?;
        let task = Task::new(target, parameters, priority);
        let id = task.id;

        if snap.active.len() < self.max_workers() {
            self.admit(&mut snap, task).await?;
        } else {
            snap.pending.push(task);
            snap.sort_pending();
            let position = snap
                .pending
                .iter()
                .position(|t| t.id == id)
                .map_or(0, |i| i + 1);
            tracing::info!(task = %id, position, "pool at capacity, task queued");
        }

        self.persist(&snap).await?;
        Ok(id)
    }

    /// Cancel a task by id.
    ///
    /// Queued tasks are removed with no backend interaction. Running tasks
    /// get a best-effort terminate (failure logged, not fatal), free their
    /// slot, and trigger a cascading dequeue. Returns false for unknown ids.
    pub async fn cancel(&self, id: TaskId) -> Result<bool, PoolError> {
        let mut snap = self.load().await?;

        if let Some(index) = snap.pending.iter().position(|t| t.id == id) {
            let mut task = snap.pending.remove(index);
            task.mark_terminal(TaskStatus::Cancelled, None)?;
            self.reconcile_history(&task).await;
            self.persist(&snap).await?;
            tracing::info!(task = %id, "cancelled queued task");
            return Ok(true);
        }

        if let Some(mut task) = snap.active.remove(&id) {
            if let Some(handle) = &task.backend_handle {
                if let Err(err) = self.backend.terminate(handle).await {
                    tracing::warn!(
                        task = %id,
                        error = %err,
                        "terminate failed, task marked cancelled anyway"
                    );
                }
            }
            task.mark_terminal(TaskStatus::Cancelled, None)?;
            self.reconcile_history(&task).await;
            self.drain_queue(&mut snap).await?;
            self.persist(&snap).await?;
            tracing::info!(task = %id, "cancelled running task");
            return Ok(true);
        }

        Ok(false)
    }

    /// Record a terminal outcome for an active task, free its slot, and
    /// cascade a dequeue. Entry point for the sweeper and status pollers.
    pub async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error: Option<String>,
    ) -> Result<(), PoolError> {
        let mut snap = self.load().await?;
        let Some(mut task) = snap.active.remove(&id) else {
            return Err(PoolError::NotFound(id));
        };
        task.mark_terminal(status, error)?;
        tracing::info!(task = %id, status = %status, "task reached terminal status");
        self.reconcile_history(&task).await;
        self.drain_queue(&mut snap).await?;
        self.persist(&snap).await?;
        Ok(())
    }

    /// Refresh the liveness heartbeat of an active task.
    pub async fn refresh_heartbeat(&self, id: TaskId) -> Result<(), PoolError> {
        let mut snap = self.load().await?;
        let Some(task) = snap.active.get_mut(&id) else {
            return Err(PoolError::NotFound(id));
        };
        task.touch();
        self.persist(&snap).await?;
        Ok(())
    }

    /// Reloaded view of the running tasks (sweeper input).
    pub async fn active_tasks(&self) -> Result<Vec<Task>, PoolError> {
        let snap = self.load().await?;
        let mut active: Vec<Task> = snap.active.into_values().collect();
        active.sort_by_key(|t| t.started_at_ms);
        Ok(active)
    }

    /// Utilization snapshot, reloaded from the store first so it reflects
    /// admissions made by other processes.
    pub async fn stats(&self) -> Result<PoolStats, PoolError> {
        let mut snap = self.load().await?;
        snap.sort_pending();

        let mut active: Vec<Task> = snap.active.into_values().collect();
        active.sort_by_key(|t| t.started_at_ms);
        let queued: Vec<QueuedTask> = snap
            .pending
            .into_iter()
            .enumerate()
            .map(|(index, task)| QueuedTask {
                position: index + 1,
                task,
            })
            .collect();

        Ok(PoolStats {
            max_workers: self.max_workers(),
            active_count: active.len(),
            queued_count: queued.len(),
            active,
            queued,
        })
    }

    /// Change the soft concurrency limit. An increase immediately cascades
    /// a dequeue to fill the new slots.
    pub async fn set_max_workers(&self, max_workers: usize) -> Result<(), PoolError> {
        if max_workers < 1 {
            return Err(PoolError::InvalidConfig(
                "max_workers must be at least 1".into(),
            ));
        }
        let previous = self.max_workers.swap(max_workers, Ordering::SeqCst);
        tracing::info!(previous, max_workers, "max workers updated");
        if max_workers > previous {
            self.process_queue().await?;
        }
        Ok(())
    }

    /// Promote queued tasks while capacity allows. Idempotent and safe to
    /// call speculatively (e.g. on a timer) - this is how dequeue
    /// opportunities missed across process crashes are recovered.
    pub async fn process_queue(&self) -> Result<usize, PoolError> {
        let mut snap = self.load().await?;
        let promoted = self.drain_queue(&mut snap).await?;
        self.persist(&snap).await?;
        if promoted > 0 {
            tracing::info!(promoted, "promoted queued tasks");
        }
        Ok(promoted)
    }

    /// Admit one task: start it on the backend and move it into the active
    /// map. A refused start records the task as FAILED (the slot stays
    /// free) and reconciles history.
    async fn admit(&self, snap: &mut PoolSnapshot, mut task: Task) -> Result<bool, PoolError> {
        match self.backend.start(&task.target, &task.parameters).await {
            Ok(handle) => {
                task.mark_running(handle)?;
                tracing::info!(task = %task.id, target = %task.target, "task started");
                snap.active.insert(task.id, task);
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(
                    task = %task.id,
                    target = %task.target,
                    error = %err,
                    "backend refused start, task failed"
                );
                task.mark_terminal(TaskStatus::Failed, Some(err.to_string()))?;
                self.reconcile_history(&task).await;
                Ok(false)
            }
        }
    }

    /// Cascading dequeue: keep admitting the best queued task while slots
    /// are free.
    async fn drain_queue(&self, snap: &mut PoolSnapshot) -> Result<usize, PoolError> {
        snap.sort_pending();
        let mut promoted = 0;
        while snap.active.len() < self.max_workers() && !snap.pending.is_empty() {
            let task = snap.pending.remove(0);
            if self.admit(snap, task).await? {
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    /// Best-effort history reconciliation on a terminal transition.
    async fn reconcile_history(&self, task: &Task) {
        let Some(history) = &self.history else {
            return;
        };
        let update = HistoryUpdate {
            correlation_id: task.id.to_string(),
            status: task.status,
            completed_at_ms: task.completed_at_ms.unwrap_or_else(now_ms),
            error: task.error.clone(),
        };
        if let Err(err) = history.record_terminal(update).await {
            tracing::warn!(task = %task.id, error = %err, "history reconciliation failed");
        }
    }

    fn active_key(&self) -> String {
        format!("{}:active", self.namespace)
    }

    fn pending_key(&self) -> String {
        format!("{}:pending", self.namespace)
    }

    async fn load(&self) -> Result<PoolSnapshot, PoolError> {
        let active = match self.store.get(&self.active_key()).await? {
            Some(value) => decode(&self.active_key(), value)?,
            None => HashMap::new(),
        };
        let pending = match self.store.get(&self.pending_key()).await? {
            Some(value) => decode(&self.pending_key(), value)?,
            None => Vec::new(),
        };
        Ok(PoolSnapshot { active, pending })
    }

    async fn persist(&self, snap: &PoolSnapshot) -> Result<(), PoolError> {
        self.store
            .set_with_ttl(
                &self.active_key(),
                encode(&self.active_key(), &snap.active)?,
                self.retention_ttl,
            )
            .await?;
        self.store
            .set_with_ttl(
                &self.pending_key(),
                encode(&self.pending_key(), &snap.pending)?,
                self.retention_ttl,
            )
            .await?;
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, value: serde_json::Value) -> Result<T, PoolError> {
    serde_json::from_value(value).map_err(|e| {
        PoolError::Store(StoreError::Corrupt {
            key: key.to_owned(),
            reason: e.to_string(),
        })
    })
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<serde_json::Value, PoolError> {
    serde_json::to_value(value).map_err(|e| {
        PoolError::Store(StoreError::Corrupt {
            key: key.to_owned(),
            reason: e.to_string(),
        })
    })
}
