//! Composition root: build the pool, semaphore, and sweeper from config.
//!
//! One `Coordinator` is constructed at process start and torn down at
//! shutdown. Everything is constructor-injected - there is no hidden
//! process-wide singleton behind these functions.

use std::sync::Arc;

use crate::config::{CoordinatorConfig, StoreBackendConfig};
use crate::core::backend::ExecutionBackend;
use crate::core::error::PoolError;
use crate::core::semaphore::DistributedSemaphore;
use crate::core::sweeper::{HeartbeatSweeper, SweeperHandle};
use crate::core::worker_pool::WorkerPool;
use crate::infra::history::JobHistory;
use crate::infra::store::{InMemoryStore, RedisStore, SharedStateStore};
use crate::runtime::TokioSpawner;

/// A process's wired scheduling components.
pub struct Coordinator {
    /// Admission and queue manager.
    pub pool: Arc<WorkerPool>,
    /// Hard cluster-wide concurrency guard.
    pub semaphore: DistributedSemaphore<TokioSpawner>,
    sweeper: SweeperHandle,
}

impl Coordinator {
    /// Stop the sweeper loop, waiting up to its configured grace period.
    pub async fn shutdown(self) {
        self.sweeper.shutdown().await;
    }
}

/// Build the shared-store backend selected by config.
///
/// Selecting Redis without the `store-redis` feature fails loudly here, at
/// startup, rather than on the first lost write.
pub async fn build_store(
    cfg: &StoreBackendConfig,
) -> Result<Arc<dyn SharedStateStore>, PoolError> {
    match cfg {
        StoreBackendConfig::InMemory => Ok(Arc::new(InMemoryStore::new())),
        StoreBackendConfig::Redis { url } => {
            let store = RedisStore::connect(url).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Validate `cfg` and wire a [`Coordinator`] around the caller's execution
/// backend and optional history collaborator. The sweeper starts
/// immediately; call [`Coordinator::shutdown`] to join it.
///
/// Must run inside a tokio runtime (the semaphore's release guard and the
/// sweeper both spawn onto it).
pub async fn build_coordinator(
    cfg: &CoordinatorConfig,
    backend: Arc<dyn ExecutionBackend>,
    history: Option<Arc<dyn JobHistory>>,
) -> Result<Coordinator, PoolError> {
    cfg.validate().map_err(PoolError::InvalidConfig)?;

    let store = build_store(&cfg.store).await?;
    let pool = Arc::new(
        WorkerPool::new(
            cfg.pool.namespace.clone(),
            Arc::clone(&store),
            Arc::clone(&backend),
            history,
            cfg.pool.max_workers,
        )?
        .with_retention_ttl(cfg.pool.retention_ttl()),
    );
    let semaphore = DistributedSemaphore::new(
        cfg.pool.namespace.clone(),
        cfg.semaphore.scope.clone(),
        Arc::clone(&store),
        TokioSpawner::current(),
        cfg.semaphore.limits(),
    );
    let sweeper = HeartbeatSweeper::new(
        Arc::clone(&pool),
        backend,
        cfg.sweeper.sweeper_config(),
    )
    .start();

    tracing::info!(
        namespace = %cfg.pool.namespace,
        max_workers = cfg.pool.max_workers,
        max_permits = cfg.semaphore.max_permits,
        "coordinator built"
    );
    Ok(Coordinator {
        pool,
        semaphore,
        sweeper,
    })
}
