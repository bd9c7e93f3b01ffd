//! Redis shared-store adapter (requires the `store-redis` feature).
//!
//! Maps the store interface onto Redis primitives: plain keys with `PX`
//! expiry for the task snapshots, and one sorted set per semaphore scope
//! (member = holder identifier, score = acquisition epoch-ms). The
//! check-count-then-add admission runs as a single Lua script, which is what
//! makes it atomic against concurrent processes.
//!
//! When the feature is disabled, the constructor bails with a clear message
//! and no Redis dependency is compiled in.

use async_trait::async_trait;

use super::{SharedStateStore, StoreError};

#[cfg(feature = "store-redis")]
use std::time::Duration;

/// Lua admission script: reject when the member already holds a permit or
/// the set is at the limit; refresh the set TTL on every attempt.
#[cfg(feature = "store-redis")]
const ADMIT_SCRIPT: &str = r"
if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
  redis.call('PEXPIRE', KEYS[1], ARGV[4])
  return 0
end
if redis.call('ZCARD', KEYS[1]) >= tonumber(ARGV[3]) then
  redis.call('PEXPIRE', KEYS[1], ARGV[4])
  return 0
end
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
redis.call('PEXPIRE', KEYS[1], ARGV[4])
return 1
";

/// Redis-backed shared store.
#[cfg(feature = "store-redis")]
pub struct RedisStore {
    conn: redis::aio::MultiplexedConnection,
}

#[cfg(feature = "store-redis")]
impl RedisStore {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(unavailable)?;
        Ok(Self { conn })
    }
}

#[cfg(feature = "store-redis")]
fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[cfg(feature = "store-redis")]
fn ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(feature = "store-redis")]
fn score_arg(score: u128) -> u64 {
    u64::try_from(score).unwrap_or(u64::MAX)
}

#[cfg(feature = "store-redis")]
#[async_trait]
impl SharedStateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        match raw {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: key.to_owned(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let text = value.to_string();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(text)
            .arg("PX")
            .arg(ms(ttl))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: usize = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn sorted_add_if_below(
        &self,
        key: &str,
        member: &str,
        score: u128,
        limit: usize,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let admitted: i64 = redis::Script::new(ADMIT_SCRIPT)
            .key(key)
            .arg(member)
            .arg(score_arg(score))
            .arg(limit)
            .arg(ms(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(admitted == 1)
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: usize = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn sorted_remove_below(
        &self,
        key: &str,
        cutoff_score: u128,
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let removed: usize = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(format!("({}", score_arg(cutoff_score)))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(removed)
    }

    async fn sorted_count(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let count: usize = redis::cmd("ZCARD")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(count)
    }
}

/// Redis store placeholder compiled when the `store-redis` feature is off.
///
/// Every operation bails, so a deployment that selects the Redis backend
/// without the feature fails loudly at startup instead of losing state.
#[cfg(not(feature = "store-redis"))]
pub struct RedisStore;

#[cfg(not(feature = "store-redis"))]
impl RedisStore {
    /// Always fails: the `store-redis` feature is not compiled in.
    pub async fn connect(_url: &str) -> Result<Self, StoreError> {
        Err(StoreError::Unavailable(
            "Redis store requires the 'store-redis' Cargo feature".into(),
        ))
    }
}

#[cfg(not(feature = "store-redis"))]
#[async_trait]
impl SharedStateStore for RedisStore {
    async fn get(&self, _key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Err(feature_missing())
    }

    async fn set_with_ttl(
        &self,
        _key: &str,
        _value: serde_json::Value,
        _ttl: std::time::Duration,
    ) -> Result<(), StoreError> {
        Err(feature_missing())
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Err(feature_missing())
    }

    async fn sorted_add_if_below(
        &self,
        _key: &str,
        _member: &str,
        _score: u128,
        _limit: usize,
        _ttl: std::time::Duration,
    ) -> Result<bool, StoreError> {
        Err(feature_missing())
    }

    async fn sorted_remove(&self, _key: &str, _member: &str) -> Result<bool, StoreError> {
        Err(feature_missing())
    }

    async fn sorted_remove_below(
        &self,
        _key: &str,
        _cutoff_score: u128,
    ) -> Result<usize, StoreError> {
        Err(feature_missing())
    }

    async fn sorted_count(&self, _key: &str) -> Result<usize, StoreError> {
        Err(feature_missing())
    }
}

#[cfg(not(feature = "store-redis"))]
fn feature_missing() -> StoreError {
    StoreError::Unavailable("Redis store requires the 'store-redis' Cargo feature".into())
}
