//! Core scheduling: task model, worker pool, semaphore, sweeper, errors.

/// Execution backend seam.
pub mod backend;
/// Error taxonomy.
pub mod error;
/// Distributed semaphore.
pub mod semaphore;
/// Heartbeat sweeper.
pub mod sweeper;
/// Task model and state machine.
pub mod task;
/// Worker pool.
pub mod worker_pool;

pub use backend::{BackendHandle, BackendStatus, ExecutionBackend};
pub use error::{AppResult, PoolError};
pub use semaphore::{DistributedSemaphore, SemaphoreLimits};
pub use sweeper::{HeartbeatSweeper, SweepReport, SweeperConfig, SweeperHandle};
pub use task::{Task, TaskId, TaskStatus, TaskTarget};
pub use worker_pool::{PoolStats, QueuedTask, WorkerPool, DEFAULT_RETENTION_TTL};
