//! Distributed semaphore: a hard cluster-wide concurrency ceiling.
//!
//! Independent of any pool's soft limit, the semaphore protects a shared
//! resource that several pools could otherwise jointly over-commit. Permits
//! live only inside the shared store's sorted-set structure (member = holder
//! identifier, score = acquisition epoch-ms) and are never cached
//! in-process. The check-count-then-add admission is atomic against the
//! store; everything else tolerates weaker consistency.
//!
//! Crash recovery is time-based: a holder that dies without releasing
//! leaves its permit to the max-age purge, which runs before every
//! admission attempt and count.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::error::PoolError;
use crate::infra::store::{SharedStateStore, StoreError};
use crate::runtime::Spawn;
use crate::util::clock::now_ms;

/// Upper bound for the error backoff inside the acquire poll loop.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Tunables for a semaphore scope.
#[derive(Debug, Clone)]
pub struct SemaphoreLimits {
    /// Maximum permits held concurrently across the whole fleet.
    pub max_permits: usize,
    /// TTL of the permit structure, refreshed on each admission attempt.
    pub permit_ttl: Duration,
    /// Permits older than this are presumed abandoned by a crashed holder
    /// and purged before any admission or count.
    pub max_permit_age: Duration,
    /// Fixed poll interval while waiting for a permit.
    pub poll_interval: Duration,
}

impl Default for SemaphoreLimits {
    fn default() -> Self {
        Self {
            max_permits: 1,
            permit_ttl: Duration::from_secs(60 * 60),
            max_permit_age: Duration::from_secs(60 * 60),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Cluster-wide semaphore over one shared-store sorted set.
pub struct DistributedSemaphore<S: Spawn + Clone + Send + Sync + 'static> {
    scope_key: String,
    store: Arc<dyn SharedStateStore>,
    spawner: S,
    limits: SemaphoreLimits,
}

impl<S: Spawn + Clone + Send + Sync + 'static> DistributedSemaphore<S> {
    /// Create a semaphore for `scope` inside `namespace`.
    pub fn new(
        namespace: impl Into<String>,
        scope: impl Into<String>,
        store: Arc<dyn SharedStateStore>,
        spawner: S,
        limits: SemaphoreLimits,
    ) -> Self {
        Self {
            scope_key: format!("{}:semaphore:{}", namespace.into(), scope.into()),
            store,
            spawner,
            limits,
        }
    }

    /// Acquire a permit for `identifier`, polling until admitted or
    /// `timeout` elapses. Returns false on timeout with no permit held.
    ///
    /// Transient store errors are retried with a short capped backoff - the
    /// only place in the crate that retries the store - but an error still
    /// standing at the deadline propagates instead of masquerading as a
    /// plain timeout.
    pub async fn acquire(&self, identifier: &str, timeout: Duration) -> Result<bool, PoolError> {
        let deadline = Instant::now() + timeout;
        let mut retry_backoff = self.limits.poll_interval;
        #[allow(unused_assignments)]
        let mut last_store_err: Option<StoreError> = None;

        loop {
            match self.try_admit(identifier).await {
                Ok(true) => {
                    tracing::debug!(scope = %self.scope_key, holder = identifier, "permit acquired");
                    return Ok(true);
                }
                Ok(false) => {
                    last_store_err = None;
                    retry_backoff = self.limits.poll_interval;
                }
                Err(err) => {
                    tracing::warn!(
                        scope = %self.scope_key,
                        holder = identifier,
                        error = %err,
                        "store error during semaphore poll, backing off"
                    );
                    last_store_err = Some(err);
                    retry_backoff = (retry_backoff * 2).min(MAX_RETRY_BACKOFF);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = if last_store_err.is_some() {
                retry_backoff
            } else {
                self.limits.poll_interval
            };
            tokio::time::sleep(wait.min(deadline - now)).await;
        }

        match last_store_err {
            Some(err) => Err(err.into()),
            None => {
                tracing::debug!(
                    scope = %self.scope_key,
                    holder = identifier,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "permit not acquired within timeout"
                );
                Ok(false)
            }
        }
    }

    /// Release the permit held by `identifier`. Returns false if it was
    /// already purged or never held.
    pub async fn release(&self, identifier: &str) -> Result<bool, PoolError> {
        let released = self.store.sorted_remove(&self.scope_key, identifier).await?;
        if released {
            tracing::debug!(scope = %self.scope_key, holder = identifier, "permit released");
        }
        Ok(released)
    }

    /// Number of live permits, after purging those past the max age.
    pub async fn current_count(&self) -> Result<usize, PoolError> {
        self.purge_stale().await?;
        Ok(self.store.sorted_count(&self.scope_key).await?)
    }

    /// Acquire, run the caller's critical section, and release on every
    /// exit path: normal return, panic, and cancellation of the returned
    /// future (a drop guard spawns the release in the last two cases).
    ///
    /// On acquisition timeout the body never runs and
    /// [`PoolError::AcquireTimeout`] is returned.
    pub async fn acquire_scoped<F, Fut, T>(
        &self,
        identifier: &str,
        timeout: Duration,
        body: F,
    ) -> Result<T, PoolError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.acquire(identifier, timeout).await? {
            return Err(PoolError::AcquireTimeout {
                timeout_ms: timeout.as_millis(),
            });
        }

        let guard = PermitGuard {
            store: Arc::clone(&self.store),
            key: self.scope_key.clone(),
            member: identifier.to_owned(),
            spawner: self.spawner.clone(),
            armed: true,
        };
        let output = body().await;
        guard.disarm_and_release().await;
        Ok(output)
    }

    /// Emergency clear of every permit in this scope. Manual recovery only;
    /// nothing in the crate calls this automatically.
    pub async fn force_release_all(&self) -> Result<(), PoolError> {
        self.store.delete(&self.scope_key).await?;
        tracing::warn!(scope = %self.scope_key, "force-released all semaphore permits");
        Ok(())
    }

    /// One admission round: purge abandoned permits, then run the store's
    /// atomic check-count-then-add.
    async fn try_admit(&self, identifier: &str) -> Result<bool, StoreError> {
        let now = now_ms();
        let cutoff = now.saturating_sub(self.limits.max_permit_age.as_millis());
        self.store
            .sorted_remove_below(&self.scope_key, cutoff)
            .await?;
        self.store
            .sorted_add_if_below(
                &self.scope_key,
                identifier,
                now,
                self.limits.max_permits,
                self.limits.permit_ttl,
            )
            .await
    }

    async fn purge_stale(&self) -> Result<(), PoolError> {
        let cutoff = now_ms().saturating_sub(self.limits.max_permit_age.as_millis());
        self.store
            .sorted_remove_below(&self.scope_key, cutoff)
            .await?;
        Ok(())
    }
}

/// Releases the permit when dropped without an explicit release - the
/// unwind and cancellation path of [`DistributedSemaphore::acquire_scoped`].
struct PermitGuard<S: Spawn> {
    store: Arc<dyn SharedStateStore>,
    key: String,
    member: String,
    spawner: S,
    armed: bool,
}

impl<S: Spawn> PermitGuard<S> {
    /// Normal-path release: disarm the drop hook and release inline.
    async fn disarm_and_release(mut self) {
        self.armed = false;
        release_permit(Arc::clone(&self.store), self.key.clone(), self.member.clone()).await;
    }
}

impl<S: Spawn> Drop for PermitGuard<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let member = std::mem::take(&mut self.member);
        self.spawner.spawn(async move {
            release_permit(store, key, member).await;
        });
    }
}

/// Best-effort release: a failure is logged and the permit is left to the
/// max-age purge.
async fn release_permit(store: Arc<dyn SharedStateStore>, key: String, member: String) {
    match store.sorted_remove(&key, &member).await {
        Ok(true) => {
            tracing::debug!(scope = %key, holder = %member, "permit released");
        }
        Ok(false) => {
            tracing::debug!(scope = %key, holder = %member, "permit already gone at release");
        }
        Err(err) => {
            tracing::warn!(
                scope = %key,
                holder = %member,
                error = %err,
                "permit release failed, leaving it to the max-age purge"
            );
        }
    }
}
