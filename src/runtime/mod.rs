//! Runtime adapters and the administrative API surface.

/// Administrative request/response models and helpers.
pub mod api;
/// Tokio runtime spawner implementation.
pub mod tokio_spawner;

use std::future::Future;

pub use tokio_spawner::TokioSpawner;

/// Abstraction for spawning background work on a runtime.
///
/// The semaphore's permit guard uses this to fire its release from a drop
/// hook, where no `.await` is possible.
pub trait Spawn {
    /// Spawn an async task that runs to completion in the background.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
