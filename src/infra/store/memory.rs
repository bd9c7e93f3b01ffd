//! In-memory shared-store adapter.
//!
//! A single-process stand-in for the production store, used by tests and
//! local development. One `parking_lot::Mutex` guards the whole keyspace,
//! which makes the compound admission check atomic by construction - the
//! same guarantee a Redis backend gets from a Lua script.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{SharedStateStore, StoreError};

/// One stored value: plain JSON or a sorted set of scored members.
#[derive(Debug, Clone)]
enum Entry {
    Kv(serde_json::Value),
    Sorted(BTreeMap<String, u128>),
}

#[derive(Debug, Clone)]
struct Slot {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory store with TTL support for development and tests.
///
/// `set_offline(true)` makes every operation fail with
/// [`StoreError::Unavailable`], simulating an outage for fail-closed tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    slots: Mutex<HashMap<String, Slot>>,
    offline: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle outage simulation.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }

    /// Drop the slot at `key` if its TTL has lapsed, then return a handle to
    /// whatever is still live.
    fn live_slot<'a>(
        slots: &'a mut HashMap<String, Slot>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Slot> {
        if slots.get(key).is_some_and(|slot| slot.expired(now)) {
            slots.remove(key);
        }
        slots.get_mut(key)
    }
}

#[async_trait]
impl SharedStateStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        self.check_online()?;
        let mut slots = self.slots.lock();
        match Self::live_slot(&mut slots, key, Instant::now()) {
            Some(slot) => match &slot.entry {
                Entry::Kv(value) => Ok(Some(value.clone())),
                Entry::Sorted(_) => Err(StoreError::Corrupt {
                    key: key.to_owned(),
                    reason: "expected a plain value, found a sorted set".into(),
                }),
            },
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        let mut slots = self.slots.lock();
        slots.insert(
            key.to_owned(),
            Slot {
                entry: Entry::Kv(value),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check_online()?;
        let mut slots = self.slots.lock();
        let now = Instant::now();
        let live = Self::live_slot(&mut slots, key, now).is_some();
        slots.remove(key);
        Ok(live)
    }

    async fn sorted_add_if_below(
        &self,
        key: &str,
        member: &str,
        score: u128,
        limit: usize,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check_online()?;
        let mut slots = self.slots.lock();
        let now = Instant::now();
        if slots.get(key).is_some_and(|slot| slot.expired(now)) {
            slots.remove(key);
        }
        let slot = slots.entry(key.to_owned()).or_insert_with(|| Slot {
            entry: Entry::Sorted(BTreeMap::new()),
            expires_at: None,
        });
        // Every admission attempt refreshes the structure's TTL.
        slot.expires_at = Some(now + ttl);
        match &mut slot.entry {
            Entry::Sorted(members) => {
                if members.contains_key(member) || members.len() >= limit {
                    return Ok(false);
                }
                members.insert(member.to_owned(), score);
                Ok(true)
            }
            Entry::Kv(_) => Err(StoreError::Corrupt {
                key: key.to_owned(),
                reason: "expected a sorted set, found a plain value".into(),
            }),
        }
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.check_online()?;
        let mut slots = self.slots.lock();
        match Self::live_slot(&mut slots, key, Instant::now()) {
            Some(Slot {
                entry: Entry::Sorted(members),
                ..
            }) => Ok(members.remove(member).is_some()),
            _ => Ok(false),
        }
    }

    async fn sorted_remove_below(
        &self,
        key: &str,
        cutoff_score: u128,
    ) -> Result<usize, StoreError> {
        self.check_online()?;
        let mut slots = self.slots.lock();
        match Self::live_slot(&mut slots, key, Instant::now()) {
            Some(Slot {
                entry: Entry::Sorted(members),
                ..
            }) => {
                let before = members.len();
                members.retain(|_, score| *score >= cutoff_score);
                Ok(before - members.len())
            }
            _ => Ok(0),
        }
    }

    async fn sorted_count(&self, key: &str) -> Result<usize, StoreError> {
        self.check_online()?;
        let mut slots = self.slots.lock();
        match Self::live_slot(&mut slots, key, Instant::now()) {
            Some(Slot {
                entry: Entry::Sorted(members),
                ..
            }) => Ok(members.len()),
            _ => Ok(0),
        }
    }
}
