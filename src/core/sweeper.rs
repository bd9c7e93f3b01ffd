//! Heartbeat sweeper: periodic reconciliation of running tasks.
//!
//! The sweeper closes the loop the backend cannot: it polls every running
//! task's backend status, records terminal outcomes through the pool,
//! refreshes heartbeats for tasks that are still making progress, and
//! force-fails tasks whose heartbeat went stale - the signature of a
//! backend or admitting process that died without reporting completion.
//!
//! It operates only on pool bookkeeping and never touches the distributed
//! semaphore; abandoned permits have their own max-age purge.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::backend::{BackendStatus, ExecutionBackend};
use crate::core::error::PoolError;
use crate::core::task::{TaskId, TaskStatus};
use crate::core::worker_pool::WorkerPool;
use crate::util::clock::now_ms;

/// Sweeper cadence and thresholds.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between reconciliation passes.
    pub interval: Duration,
    /// A running task whose heartbeat is older than this is force-failed.
    pub stale_after: Duration,
    /// How long shutdown waits for an in-flight pass before aborting.
    pub shutdown_grace: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(30 * 60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Outcome counters for one reconciliation pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    /// Running tasks whose backend status was polled.
    pub polled: usize,
    /// Tasks the backend reported as succeeded.
    pub completed: usize,
    /// Tasks the backend reported as failed.
    pub failed: usize,
    /// Tasks the backend reported as revoked.
    pub cancelled: usize,
    /// Tasks still in flight whose heartbeat was refreshed.
    pub refreshed: usize,
    /// Tasks force-failed for a stale heartbeat.
    pub reaped: usize,
}

impl SweepReport {
    /// Whether this pass changed any task's status.
    #[must_use]
    pub const fn changed_anything(&self) -> bool {
        self.completed + self.failed + self.cancelled + self.reaped > 0
    }
}

/// Periodic reconciliation loop over a pool's running tasks.
pub struct HeartbeatSweeper {
    pool: Arc<WorkerPool>,
    backend: Arc<dyn ExecutionBackend>,
    config: SweeperConfig,
}

impl HeartbeatSweeper {
    /// Create a sweeper for `pool`, polling `backend` for liveness.
    pub fn new(
        pool: Arc<WorkerPool>,
        backend: Arc<dyn ExecutionBackend>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            pool,
            backend,
            config,
        }
    }

    /// Spawn the periodic loop. Failures inside a pass are logged, never
    /// raised - the loop runs unattended. Returns a handle used to join the
    /// loop on shutdown.
    #[must_use]
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let grace = self.config.shutdown_grace;
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => match self.sweep().await {
                        Ok(report) if report.changed_anything() => {
                            tracing::info!(?report, "sweep pass reconciled tasks");
                        }
                        Ok(report) => {
                            tracing::debug!(?report, "sweep pass idle");
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "sweep pass failed");
                        }
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::info!("heartbeat sweeper stopped");
        });
        SweeperHandle {
            shutdown: shutdown_tx,
            join,
            grace,
        }
    }

    /// Run one reconciliation pass. Public so operators and tests can force
    /// a pass outside the timer.
    pub async fn sweep(&self) -> Result<SweepReport, PoolError> {
        let mut report = SweepReport::default();

        // Pass 1: reconcile against the backend's view.
        for task in self.pool.active_tasks().await? {
            let Some(handle) = &task.backend_handle else {
                continue;
            };
            report.polled += 1;
            match self.backend.poll_status(handle).await {
                Ok(BackendStatus::Success) => {
                    self.finish(task.id, TaskStatus::Completed, None).await;
                    report.completed += 1;
                }
                Ok(BackendStatus::Failure(reason)) => {
                    self.finish(task.id, TaskStatus::Failed, Some(reason)).await;
                    report.failed += 1;
                }
                Ok(BackendStatus::Revoked) => {
                    self.finish(
                        task.id,
                        TaskStatus::Cancelled,
                        Some("revoked by backend".into()),
                    )
                    .await;
                    report.cancelled += 1;
                }
                Ok(BackendStatus::Pending | BackendStatus::Running) => {
                    match self.pool.refresh_heartbeat(task.id).await {
                        Ok(()) => report.refreshed += 1,
                        // Another process finished the task between our
                        // snapshot and the refresh.
                        Err(PoolError::NotFound(_)) => {}
                        Err(err) => return Err(err),
                    }
                }
                Err(err) => {
                    // No refresh on a failed poll: if the backend stays
                    // unreachable the stale threshold reaps the task.
                    tracing::warn!(
                        task = %task.id,
                        error = %err,
                        "status poll failed, heartbeat left unrefreshed"
                    );
                }
            }
        }

        // Pass 2: reap stale heartbeats. Reload so pass-1 outcomes are seen.
        let now = now_ms();
        let stale_cutoff = self.config.stale_after.as_millis();
        for task in self.pool.active_tasks().await? {
            let Some(age_ms) = task.heartbeat_age_ms(now) else {
                continue;
            };
            if age_ms <= stale_cutoff {
                continue;
            }
            let stale = PoolError::StaleHeartbeat {
                task: task.id,
                age_ms,
            };
            tracing::warn!(
                task = %task.id,
                age_ms = u64::try_from(age_ms).unwrap_or(u64::MAX),
                "heartbeat stale, force-failing task"
            );
            match self
                .pool
                .update_status(task.id, TaskStatus::Failed, Some(stale.to_string()))
                .await
            {
                Ok(()) => report.reaped += 1,
                Err(PoolError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(report)
    }

    /// Record a terminal backend outcome; races with other processes are
    /// expected and logged at debug.
    async fn finish(&self, id: TaskId, status: TaskStatus, error: Option<String>) {
        match self.pool.update_status(id, status, error).await {
            Ok(()) => {}
            Err(PoolError::NotFound(_)) => {
                tracing::debug!(task = %id, "task already finished by another process");
            }
            Err(err) => {
                tracing::warn!(task = %id, error = %err, "failed to record terminal status");
            }
        }
    }
}

/// Handle to a started sweeper loop.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    grace: Duration,
}

impl SweeperHandle {
    /// Signal shutdown and join the loop, aborting it if the grace period
    /// elapses first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let abort = self.join.abort_handle();
        if tokio::time::timeout(self.grace, self.join).await.is_err() {
            tracing::warn!("sweeper did not stop within the grace period, aborting");
            abort.abort();
        }
    }
}
