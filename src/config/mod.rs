//! Configuration models for the pool, semaphore, sweeper, and store.

/// Pool, semaphore, sweeper, and store configuration structures.
pub mod pool;

pub use pool::{
    CoordinatorConfig, PoolSettings, SemaphoreSettings, StoreBackendConfig, SweeperSettings,
};
