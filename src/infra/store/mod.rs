//! Shared state store abstraction.
//!
//! The store is the single source of truth for cross-process state: the
//! active-task map, the pending queue, and the semaphore permit sets. It is
//! modeled as a narrow key/value interface with TTLs plus a small family of
//! sorted-set score operations, so any compliant backend (in-memory for
//! tests, Redis in production) can implement it.
//!
//! Persisted layout:
//!
//! - `{ns}:active`  - JSON object, task id -> task record (TTL ~1h)
//! - `{ns}:pending` - JSON array of queued task records (TTL ~1h)
//! - `{ns}:semaphore:{scope}` - sorted set, member = holder identifier,
//!   score = acquisition time in epoch-ms (TTL refreshed on each acquire)
//!
//! Only [`SharedStateStore::sorted_add_if_below`] is required to be atomic;
//! everything else is plain read-modify-write and documented as weakly
//! consistent across processes.

/// In-memory adapter for development and tests.
pub mod memory;
/// Redis adapter (requires the `store-redis` feature).
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryStore;
pub use redis::RedisStore;

/// Errors surfaced by state-store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend is unreachable or refused the operation. Callers fail
    /// closed: no partial state is persisted.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted entry could not be decoded.
    #[error("corrupt entry at key {key}: {reason}")]
    Corrupt {
        /// Store key holding the undecodable entry.
        key: String,
        /// Decoder detail.
        reason: String,
    },
}

/// Narrow key/value + sorted-set interface over the shared store.
#[async_trait]
pub trait SharedStateStore: Send + Sync {
    /// Fetch the value at `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// Write `value` at `key` with a fresh time-to-live.
    async fn set_with_ttl(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Remove `key` entirely. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomic semaphore admission: if `member` is absent from the sorted set
    /// at `key` AND the set currently holds fewer than `limit` members, add
    /// it with `score` and return true; otherwise return false. The set's
    /// TTL is refreshed either way. The check-count-then-add must be atomic
    /// in the backend.
    async fn sorted_add_if_below(
        &self,
        key: &str,
        member: &str,
        score: u128,
        limit: usize,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Remove one member from the sorted set. Returns whether it was held.
    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Remove every member whose score is strictly below `cutoff_score`,
    /// returning how many were dropped.
    async fn sorted_remove_below(&self, key: &str, cutoff_score: u128)
        -> Result<usize, StoreError>;

    /// Number of members currently in the sorted set.
    async fn sorted_count(&self, key: &str) -> Result<usize, StoreError>;
}
