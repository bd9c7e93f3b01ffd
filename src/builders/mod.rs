//! Builders to construct a wired coordinator from configuration.

/// Coordinator and store builders.
pub mod pool_builder;

pub use pool_builder::{build_coordinator, build_store, Coordinator};
