//! Pool, semaphore, sweeper, and store configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::semaphore::SemaphoreLimits;
use crate::core::sweeper::SweeperConfig;

/// Shared-store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendConfig {
    /// In-memory store for development/testing (single process only).
    InMemory,
    /// Redis store (requires the `store-redis` feature).
    Redis {
        /// Connection URL, e.g. `redis://127.0.0.1:6379/0`.
        url: String,
    },
}

impl Default for StoreBackendConfig {
    fn default() -> Self {
        Self::InMemory
    }
}

/// Worker-pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Store-key namespace; pools sharing it share their state.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Soft concurrency limit. Defaults to the machine's logical CPUs.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// TTL of persisted snapshots, seconds.
    #[serde(default = "default_retention_ttl_secs")]
    pub retention_ttl_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            max_workers: default_max_workers(),
            retention_ttl_secs: default_retention_ttl_secs(),
        }
    }
}

impl PoolSettings {
    /// Snapshot retention as a [`Duration`].
    #[must_use]
    pub const fn retention_ttl(&self) -> Duration {
        Duration::from_secs(self.retention_ttl_secs)
    }
}

/// Distributed-semaphore settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemaphoreSettings {
    /// Scope name; one permit set exists per scope.
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Hard cluster-wide permit ceiling.
    #[serde(default = "default_max_permits")]
    pub max_permits: usize,
    /// TTL of the permit structure, seconds.
    #[serde(default = "default_permit_ttl_secs")]
    pub permit_ttl_secs: u64,
    /// Permits older than this are presumed abandoned, seconds.
    #[serde(default = "default_max_permit_age_secs")]
    pub max_permit_age_secs: u64,
    /// Poll interval while waiting for a permit, milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SemaphoreSettings {
    fn default() -> Self {
        Self {
            scope: default_scope(),
            max_permits: default_max_permits(),
            permit_ttl_secs: default_permit_ttl_secs(),
            max_permit_age_secs: default_max_permit_age_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SemaphoreSettings {
    /// Convert to the semaphore's runtime limits.
    #[must_use]
    pub const fn limits(&self) -> SemaphoreLimits {
        SemaphoreLimits {
            max_permits: self.max_permits,
            permit_ttl: Duration::from_secs(self.permit_ttl_secs),
            max_permit_age: Duration::from_secs(self.max_permit_age_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// Heartbeat-sweeper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperSettings {
    /// Time between reconciliation passes, seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Stale-heartbeat threshold, seconds.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Shutdown grace period, seconds.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl SweeperSettings {
    /// Convert to the sweeper's runtime config.
    #[must_use]
    pub const fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.interval_secs),
            stale_after: Duration::from_secs(self.stale_after_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}

/// Root configuration for one process's coordinator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Shared-store backend selection.
    #[serde(default)]
    pub store: StoreBackendConfig,
    /// Worker-pool settings.
    #[serde(default)]
    pub pool: PoolSettings,
    /// Semaphore settings.
    #[serde(default)]
    pub semaphore: SemaphoreSettings,
    /// Sweeper settings.
    #[serde(default)]
    pub sweeper: SweeperSettings,
}

impl CoordinatorConfig {
    /// Validate all sections.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool.namespace.is_empty() {
            return Err("pool.namespace must not be empty".into());
        }
        if self.pool.max_workers == 0 {
            return Err("pool.max_workers must be greater than 0".into());
        }
        if self.pool.retention_ttl_secs == 0 {
            return Err("pool.retention_ttl_secs must be greater than 0".into());
        }
        if self.semaphore.scope.is_empty() {
            return Err("semaphore.scope must not be empty".into());
        }
        if self.semaphore.max_permits == 0 {
            return Err("semaphore.max_permits must be greater than 0".into());
        }
        if self.semaphore.permit_ttl_secs == 0 {
            return Err("semaphore.permit_ttl_secs must be greater than 0".into());
        }
        if self.semaphore.max_permit_age_secs == 0 {
            return Err("semaphore.max_permit_age_secs must be greater than 0".into());
        }
        if self.semaphore.poll_interval_ms == 0 {
            return Err("semaphore.poll_interval_ms must be greater than 0".into());
        }
        if self.sweeper.interval_secs == 0 {
            return Err("sweeper.interval_secs must be greater than 0".into());
        }
        if self.sweeper.stale_after_secs == 0 {
            return Err("sweeper.stale_after_secs must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the environment (after a `.env` pass).
    ///
    /// `SYNCPOOL_CONFIG_JSON` supplies a full JSON document; otherwise the
    /// defaults apply with `SYNCPOOL_NAMESPACE`, `SYNCPOOL_MAX_WORKERS`, and
    /// `SYNCPOOL_REDIS_URL` (selects the Redis store) as overrides.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        if let Ok(json) = std::env::var("SYNCPOOL_CONFIG_JSON") {
            return Self::from_json_str(&json);
        }

        let mut cfg = Self::default();
        if let Ok(namespace) = std::env::var("SYNCPOOL_NAMESPACE") {
            cfg.pool.namespace = namespace;
        }
        if let Ok(raw) = std::env::var("SYNCPOOL_MAX_WORKERS") {
            cfg.pool.max_workers = raw
                .parse()
                .map_err(|e| format!("SYNCPOOL_MAX_WORKERS invalid: {e}"))?;
        }
        if let Ok(url) = std::env::var("SYNCPOOL_REDIS_URL") {
            cfg.store = StoreBackendConfig::Redis { url };
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn default_namespace() -> String {
    "syncpool".into()
}

fn default_max_workers() -> usize {
    num_cpus::get()
}

const fn default_retention_ttl_secs() -> u64 {
    60 * 60
}

fn default_scope() -> String {
    "heavy-sync".into()
}

const fn default_max_permits() -> usize {
    2
}

const fn default_permit_ttl_secs() -> u64 {
    60 * 60
}

const fn default_max_permit_age_secs() -> u64 {
    60 * 60
}

const fn default_poll_interval_ms() -> u64 {
    250
}

const fn default_sweep_interval_secs() -> u64 {
    60
}

const fn default_stale_after_secs() -> u64 {
    30 * 60
}

const fn default_shutdown_grace_secs() -> u64 {
    5
}
