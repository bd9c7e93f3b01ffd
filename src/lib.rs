//! # Syncpool
//!
//! Distributed admission control for long-running synchronization jobs.
//!
//! This library coordinates how many sync jobs may execute simultaneously
//! across a fleet of independent processes. Each process holds its own
//! in-memory [`core::WorkerPool`], but all of them reconcile against one
//! shared external state store on every operation, so no process owns the
//! pool and any process may admit, cancel, or reap any job.
//!
//! ## Core Problem Solved
//!
//! Sync jobs have awkward operational properties:
//!
//! - **Long-running**: a single job can run for minutes to hours
//! - **Fleet-wide**: many processes schedule against the same capacity
//! - **Crash-prone collaborators**: the execution backend, or the process
//!   that admitted a job, can die without ever reporting completion
//! - **Shared downstream resources**: several pools that each believe they
//!   have spare capacity can jointly over-commit one upstream system
//!
//! ## Key Features
//!
//! - **Admission control**: jobs run immediately under capacity, otherwise
//!   queue by (priority desc, FIFO) and are promoted as slots free up
//! - **Cross-process bookkeeping**: active map and pending queue live in a
//!   shared TTL store; every mutation is an explicit read-modify-write
//! - **Distributed semaphore**: a hard cluster-wide ceiling enforced with an
//!   atomic check-count-then-add against the store, independent of any
//!   pool's soft limit
//! - **Heartbeat sweeping**: a periodic reconciliation loop polls the
//!   execution backend, refreshes liveness, and force-fails stale jobs
//!
//! ## WorkerPool - Admission and Queueing
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use syncpool::core::{TaskTarget, WorkerPool};
//! use syncpool::infra::store::memory::InMemoryStore;
//!
//! let store = Arc::new(InMemoryStore::new());
//! let pool = WorkerPool::new("sync", store, backend, None, 4);
//!
//! let id = pool
//!     .submit(
//!         TaskTarget::new("crm", "full_refresh"),
//!         serde_json::json!({"cursor": null}),
//!         0,
//!     )
//!     .await?;
//! let stats = pool.stats().await?;
//! ```
//!
//! ## DistributedSemaphore - Hard Cluster-Wide Ceiling
//!
//! ```rust,ignore
//! use syncpool::core::DistributedSemaphore;
//!
//! let sem = DistributedSemaphore::new("heavy-sync", store, spawner, limits);
//! let report = sem
//!     .acquire_scoped("worker-7", Duration::from_secs(30), || async {
//!         run_heavy_sync().await
//!     })
//!     .await?;
//! ```
//!
//! For complete examples, see:
//! - `tests/worker_pool_test.rs` - admission, cancellation, priority order
//! - `tests/semaphore_test.rs` - permits, stale purge, scoped acquisition
//! - `tests/sweeper_test.rs` - heartbeat refresh and stale reaping

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling: task model, worker pool, semaphore, sweeper, errors.
pub mod core;
/// Configuration models for the pool, semaphore, sweeper, and store.
pub mod config;
/// Builders to construct a wired coordinator from configuration.
pub mod builders;
/// Infrastructure adapters for the shared state store and job history.
pub mod infra;
/// Runtime adapters (spawner) and the administrative API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
