//! Comprehensive integration tests for WorkerPool
//!
//! These tests validate real-world functionality including:
//! - Admission under and over the soft capacity limit
//! - Priority-desc / FIFO dequeue ordering
//! - Cancellation of queued and running tasks
//! - Cascading dequeue on freed slots and raised limits
//! - Best-effort history reconciliation
//! - Fail-closed behavior on store outage
//! - Cross-process visibility through a shared store

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use syncpool::core::{
    BackendHandle, BackendStatus, ExecutionBackend, PoolError, TaskId, TaskStatus, TaskTarget,
    WorkerPool,
};
use syncpool::infra::history::InMemoryJobHistory;
use syncpool::infra::store::InMemoryStore;

// ============================================================================
// TEST DOUBLES
// ============================================================================

#[derive(Default)]
struct BackendState {
    started: Vec<(String, BackendHandle)>,
    terminated: Vec<BackendHandle>,
    statuses: HashMap<BackendHandle, BackendStatus>,
    fail_next_start: bool,
    next_handle: u64,
}

/// Scriptable execution backend recording every interaction.
#[derive(Clone, Default)]
struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    fn new() -> Self {
        Self::default()
    }

    fn started_count(&self) -> usize {
        self.state.lock().started.len()
    }

    fn terminated(&self) -> Vec<BackendHandle> {
        self.state.lock().terminated.clone()
    }

    fn fail_next_start(&self) {
        self.state.lock().fail_next_start = true;
    }
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    async fn start(
        &self,
        target: &TaskTarget,
        _parameters: &serde_json::Value,
    ) -> Result<BackendHandle, PoolError> {
        let mut state = self.state.lock();
        if state.fail_next_start {
            state.fail_next_start = false;
            return Err(PoolError::Backend("injected start failure".into()));
        }
        state.next_handle += 1;
        let handle = BackendHandle::from(format!("job-{}", state.next_handle));
        state.started.push((target.to_string(), handle.clone()));
        state.statuses.insert(handle.clone(), BackendStatus::Running);
        Ok(handle)
    }

    async fn poll_status(&self, handle: &BackendHandle) -> Result<BackendStatus, PoolError> {
        self.state
            .lock()
            .statuses
            .get(handle)
            .cloned()
            .ok_or_else(|| PoolError::Backend(format!("unknown handle {handle}")))
    }

    async fn terminate(&self, handle: &BackendHandle) -> Result<(), PoolError> {
        self.state.lock().terminated.push(handle.clone());
        Ok(())
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

struct Fixture {
    pool: Arc<WorkerPool>,
    backend: MockBackend,
    store: Arc<InMemoryStore>,
    history: Arc<InMemoryJobHistory>,
}

fn make_fixture(max_workers: usize) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let backend = MockBackend::new();
    let history = Arc::new(InMemoryJobHistory::new());
    let pool = Arc::new(
        WorkerPool::new(
            "test-pool",
            store.clone(),
            Arc::new(backend.clone()),
            Some(history.clone()),
            max_workers,
        )
        .unwrap(),
    );
    Fixture {
        pool,
        backend,
        store,
        history,
    }
}

fn target(name: &str) -> TaskTarget {
    TaskTarget::new(name, "incremental")
}

async fn submit(pool: &WorkerPool, name: &str, priority: i64) -> TaskId {
    pool.submit(target(name), serde_json::json!({}), priority)
        .await
        .unwrap()
}

// ============================================================================
// ADMISSION
// ============================================================================

#[tokio::test]
async fn test_submit_under_capacity_runs_immediately() {
    let fx = make_fixture(2);
    let id = submit(&fx.pool, "crm", 0).await;

    let stats = fx.pool.stats().await.unwrap();
    assert_eq!(stats.active_count, 1);
    assert_eq!(stats.queued_count, 0);
    assert_eq!(stats.active[0].id, id);
    assert_eq!(stats.active[0].status, TaskStatus::Running);
    assert!(stats.active[0].backend_handle.is_some());
    assert_eq!(fx.backend.started_count(), 1);
}

#[tokio::test]
async fn test_submit_over_capacity_queues_at_tail_position() {
    let fx = make_fixture(1);
    submit(&fx.pool, "a", 0).await;
    let b = submit(&fx.pool, "b", 0).await;
    let c = submit(&fx.pool, "c", 0).await;

    let stats = fx.pool.stats().await.unwrap();
    assert_eq!(stats.active_count, 1);
    assert_eq!(stats.queued_count, 2);
    assert_eq!(stats.queued[0].task.id, b);
    assert_eq!(stats.queued[0].position, 1);
    assert_eq!(stats.queued[1].task.id, c);
    assert_eq!(stats.queued[1].position, 2);
    assert_eq!(stats.queued[0].task.status, TaskStatus::Queued);
    // Only the first submit reached the backend.
    assert_eq!(fx.backend.started_count(), 1);
}

#[tokio::test]
async fn test_soft_limit_never_exceeded_in_process() {
    let fx = make_fixture(3);
    for i in 0..10 {
        submit(&fx.pool, &format!("source-{i}"), 0).await;
        let stats = fx.pool.stats().await.unwrap();
        assert!(stats.active_count <= 3);
    }
    let stats = fx.pool.stats().await.unwrap();
    assert_eq!(stats.active_count, 3);
    assert_eq!(stats.queued_count, 7);
}

// ============================================================================
// PRIORITY ORDERING
// ============================================================================

#[tokio::test]
async fn test_priority_beats_fifo_and_fifo_breaks_ties() {
    let fx = make_fixture(2);
    let a = submit(&fx.pool, "a", 0).await;
    let b = submit(&fx.pool, "b", 0).await;
    let c = submit(&fx.pool, "c", 5).await;

    let stats = fx.pool.stats().await.unwrap();
    let active_ids: Vec<TaskId> = stats.active.iter().map(|t| t.id).collect();
    assert!(active_ids.contains(&a));
    assert!(active_ids.contains(&b));
    assert_eq!(stats.queued[0].task.id, c);
    assert_eq!(stats.queued[0].position, 1);

    // A later priority-0 submit must not overtake c.
    let d = submit(&fx.pool, "d", 0).await;
    let stats = fx.pool.stats().await.unwrap();
    assert_eq!(stats.queued[0].task.id, c);
    assert_eq!(stats.queued[1].task.id, d);

    // When a slot frees, c is promoted first because its priority is
    // strictly higher.
    fx.pool
        .update_status(a, TaskStatus::Completed, None)
        .await
        .unwrap();
    let stats = fx.pool.stats().await.unwrap();
    let active_ids: Vec<TaskId> = stats.active.iter().map(|t| t.id).collect();
    assert!(active_ids.contains(&c));
    assert_eq!(stats.queued[0].task.id, d);
    assert_eq!(stats.queued[0].position, 1);
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[tokio::test]
async fn test_cancel_queued_has_zero_backend_interaction() {
    let fx = make_fixture(1);
    submit(&fx.pool, "a", 0).await;
    let b = submit(&fx.pool, "b", 0).await;

    assert!(fx.pool.cancel(b).await.unwrap());

    let stats = fx.pool.stats().await.unwrap();
    assert_eq!(stats.queued_count, 0);
    assert_eq!(fx.backend.started_count(), 1);
    assert!(fx.backend.terminated().is_empty());

    let updates = fx.history.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].correlation_id, b.to_string());
    assert_eq!(updates[0].status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_running_terminates_and_promotes_next() {
    let fx = make_fixture(1);
    let a = submit(&fx.pool, "a", 0).await;
    let b = submit(&fx.pool, "b", 0).await;

    let handle = fx.pool.stats().await.unwrap().active[0]
        .backend_handle
        .clone()
        .unwrap();

    assert!(fx.pool.cancel(a).await.unwrap());

    assert_eq!(fx.backend.terminated(), vec![handle]);
    let stats = fx.pool.stats().await.unwrap();
    assert_eq!(stats.active_count, 1);
    assert_eq!(stats.active[0].id, b);
    assert_eq!(stats.queued_count, 0);
}

#[tokio::test]
async fn test_cancel_unknown_returns_false() {
    let fx = make_fixture(1);
    assert!(!fx.pool.cancel(TaskId::new()).await.unwrap());
}

// ============================================================================
// LIMIT CHANGES AND QUEUE PROCESSING
// ============================================================================

#[tokio::test]
async fn test_raising_limit_admits_exactly_min_of_slots_and_queue() {
    let fx = make_fixture(1);
    submit(&fx.pool, "a", 0).await;
    let b = submit(&fx.pool, "b", 0).await;
    let c = submit(&fx.pool, "c", 0).await;
    let d = submit(&fx.pool, "d", 0).await;

    // +2 slots, 3 queued: exactly 2 admitted, FIFO.
    fx.pool.set_max_workers(3).await.unwrap();
    let stats = fx.pool.stats().await.unwrap();
    assert_eq!(stats.active_count, 3);
    assert_eq!(stats.queued_count, 1);
    let active_ids: Vec<TaskId> = stats.active.iter().map(|t| t.id).collect();
    assert!(active_ids.contains(&b));
    assert!(active_ids.contains(&c));
    assert_eq!(stats.queued[0].task.id, d);

    // +7 slots, 1 queued: exactly 1 admitted.
    fx.pool.set_max_workers(10).await.unwrap();
    let stats = fx.pool.stats().await.unwrap();
    assert_eq!(stats.active_count, 4);
    assert_eq!(stats.queued_count, 0);
}

#[tokio::test]
async fn test_set_max_workers_rejects_zero() {
    let fx = make_fixture(1);
    let err = fx.pool.set_max_workers(0).await.unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(_)));
    // Constructor applies the same rule.
    let store = Arc::new(InMemoryStore::new());
    assert!(WorkerPool::new(
        "zero",
        store,
        Arc::new(MockBackend::new()),
        None,
        0
    )
    .is_err());
}

#[tokio::test]
async fn test_process_queue_is_idempotent() {
    let fx = make_fixture(2);
    submit(&fx.pool, "a", 0).await;
    submit(&fx.pool, "b", 0).await;
    submit(&fx.pool, "c", 0).await;

    // No free slots: speculative passes promote nothing.
    assert_eq!(fx.pool.process_queue().await.unwrap(), 0);
    assert_eq!(fx.pool.process_queue().await.unwrap(), 0);

    // A second process with more headroom recovers the missed dequeue.
    let wide_pool = WorkerPool::new(
        "test-pool",
        fx.store.clone(),
        Arc::new(fx.backend.clone()),
        None,
        3,
    )
    .unwrap();
    assert_eq!(wide_pool.process_queue().await.unwrap(), 1);
    assert_eq!(wide_pool.process_queue().await.unwrap(), 0);
}

// ============================================================================
// TERMINAL TRANSITIONS AND HISTORY
// ============================================================================

#[tokio::test]
async fn test_update_status_records_history_and_cascades() {
    let fx = make_fixture(1);
    let a = submit(&fx.pool, "a", 0).await;
    let b = submit(&fx.pool, "b", 0).await;

    fx.pool
        .update_status(a, TaskStatus::Failed, Some("connector exploded".into()))
        .await
        .unwrap();

    let stats = fx.pool.stats().await.unwrap();
    assert_eq!(stats.active[0].id, b);

    let updates = fx.history.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].correlation_id, a.to_string());
    assert_eq!(updates[0].status, TaskStatus::Failed);
    assert_eq!(updates[0].error.as_deref(), Some("connector exploded"));
    assert!(updates[0].completed_at_ms > 0);
}

#[tokio::test]
async fn test_update_status_unknown_id_is_not_found() {
    let fx = make_fixture(1);
    let err = fx
        .pool
        .update_status(TaskId::new(), TaskStatus::Completed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::NotFound(_)));
}

#[tokio::test]
async fn test_update_status_rejects_non_terminal() {
    let fx = make_fixture(1);
    let a = submit(&fx.pool, "a", 0).await;
    let err = fx
        .pool
        .update_status(a, TaskStatus::Running, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::IllegalTransition { .. }));
    // The failed update must not have eaten the task.
    assert_eq!(fx.pool.stats().await.unwrap().active_count, 1);
}

#[tokio::test]
async fn test_backend_start_failure_surfaces_as_failed_task() {
    let fx = make_fixture(2);
    fx.backend.fail_next_start();
    let id = submit(&fx.pool, "a", 0).await;

    let stats = fx.pool.stats().await.unwrap();
    assert_eq!(stats.active_count, 0);
    assert_eq!(stats.queued_count, 0);

    let updates = fx.history.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].correlation_id, id.to_string());
    assert_eq!(updates[0].status, TaskStatus::Failed);
    assert!(updates[0]
        .error
        .as_deref()
        .unwrap()
        .contains("injected start failure"));
}

// ============================================================================
// STORE SEMANTICS
// ============================================================================

#[tokio::test]
async fn test_store_outage_fails_closed() {
    let fx = make_fixture(2);
    submit(&fx.pool, "a", 0).await;

    fx.store.set_offline(true);
    let err = fx
        .pool
        .submit(target("b"), serde_json::json!({}), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Store(_)));
    assert!(fx.pool.stats().await.is_err());

    // Nothing was lost or half-written.
    fx.store.set_offline(false);
    let stats = fx.pool.stats().await.unwrap();
    assert_eq!(stats.active_count, 1);
    assert_eq!(stats.queued_count, 0);
}

#[tokio::test]
async fn test_two_pools_share_state_through_the_store() {
    let fx = make_fixture(2);
    let a = submit(&fx.pool, "a", 0).await;

    // A second process: same namespace, same store.
    let other = WorkerPool::new(
        "test-pool",
        fx.store.clone(),
        Arc::new(fx.backend.clone()),
        None,
        2,
    )
    .unwrap();

    let stats = other.stats().await.unwrap();
    assert_eq!(stats.active_count, 1);
    assert_eq!(stats.active[0].id, a);

    // Either process may cancel.
    assert!(other.cancel(a).await.unwrap());
    let stats = fx.pool.stats().await.unwrap();
    assert_eq!(stats.active_count, 0);
}
