//! In-process backend
//!
//! Same semantics as the Redis backend (atomic increments, millisecond TTLs,
//! prefix scans) over a sharded concurrent map. Used by tests and by local runs
//! without a Redis instance.

use crate::{CacheError, CacheResult, KeyValueCache};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<DashMap<String, Entry>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail as if the connection dropped.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remaining TTL of a live key; `None` if absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> CacheResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable(
                "in-memory cache marked unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry.value.clone())
    }
}

#[async_trait::async_trait]
impl KeyValueCache for InMemoryCache {
    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.check_available()?;
        let now = Instant::now();

        // The entry guard holds the shard lock, which makes the update atomic.
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    entry.value = delta.to_string();
                    entry.expires_at = None;
                    return Ok(delta);
                }
                let current: i64 = entry.value.parse().map_err(|_| {
                    CacheError::InvalidData(format!("value at {} is not an integer", key))
                })?;
                let next = current.checked_add(delta).ok_or_else(|| {
                    CacheError::InvalidData(format!("increment at {} overflows", key))
                })?;
                entry.value = next.to_string();
                Ok(next)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: delta.to_string(),
                    expires_at: None,
                });
                Ok(delta)
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.check_available()?;
        if ttl.is_zero() {
            return Err(CacheError::InvalidData(format!("zero TTL for key {}", key)));
        }

        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.check_available()?;
        if ttl.is_zero() {
            return Err(CacheError::InvalidData(format!("zero TTL for key {}", key)));
        }

        let now = Instant::now();
        let fresh = Entry {
            value: value.to_string(),
            expires_at: Some(now + ttl),
        };
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return Ok(false);
                }
                occupied.insert(fresh);
                Ok(true)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.check_available()?;
        if ttl.is_zero() {
            return Err(CacheError::InvalidData(format!("zero TTL for key {}", key)));
        }

        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check_available()?;
        Ok(self.live_value(key))
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        self.check_available()?;
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.check_available()?;
        Ok(self.live_value(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        self.check_available()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        self.check_available()?;
        Ok(keys.iter().map(|key| self.live_value(key)).collect())
    }

    async fn ping(&self) -> CacheResult<()> {
        self.check_available()
    }
}
