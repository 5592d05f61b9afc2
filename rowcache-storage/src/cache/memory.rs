//! In-process cache transport.
//!
//! A `RwLock<HashMap>` with per-entry expiry. Useful for tests and for
//! single-process deployments that want the row cache without an external
//! service.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use rowcache_core::{CacheError, RowCacheResult};

use super::traits::{CacheStats, CacheTransport};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Vec<u8>, timeout: Option<Duration>) -> Self {
        Self {
            value,
            // A timeout past the clock's range never expires.
            expires_at: timeout.and_then(|t| Instant::now().checked_add(t)),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory cache transport with expiry.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    entries: RwLock<HashMap<String, Entry>>,
    stats: RwLock<CacheStats>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| entries.values().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live entry exists, without touching statistics.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| entries.get(key).is_some_and(|e| !e.is_expired(now)))
            .unwrap_or(false)
    }

    /// All live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, e)| !e.is_expired(now))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn record(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }

    fn record_eviction(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.evictions += 1;
        }
    }

    fn insert(
        entries: &mut HashMap<String, Entry>,
        key: &str,
        value: Vec<u8>,
        timeout: Option<Duration>,
    ) {
        entries.insert(key.to_string(), Entry::new(value, timeout));
    }
}

impl CacheTransport for InMemoryTransport {
    fn add(&self, key: &str, value: Vec<u8>, timeout: Option<Duration>) -> RowCacheResult<bool> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| !e.is_expired(now)) {
            return Ok(false);
        }
        Self::insert(&mut entries, key, value, timeout);
        Ok(true)
    }

    fn get(&self, key: &str) -> RowCacheResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let found = {
            let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
            entries.get(key).cloned()
        };

        match found {
            Some(entry) if !entry.is_expired(now) => {
                self.record(true);
                Ok(Some(entry.value))
            }
            Some(_) => {
                // Drop the expired entry so it stops counting toward the size.
                let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
                if entries.get(key).is_some_and(|e| e.is_expired(now)) {
                    entries.remove(key);
                    self.record_eviction();
                }
                self.record(false);
                Ok(None)
            }
            None => {
                self.record(false);
                Ok(None)
            }
        }
    }

    fn set(&self, key: &str, value: Vec<u8>, timeout: Option<Duration>) -> RowCacheResult<()> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        Self::insert(&mut entries, key, value, timeout);
        Ok(())
    }

    fn set_many(
        &self,
        values: HashMap<String, Vec<u8>>,
        timeout: Option<Duration>,
    ) -> RowCacheResult<()> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        for (key, value) in values {
            Self::insert(&mut entries, &key, value, timeout);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> RowCacheResult<bool> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }

    fn stats(&self) -> RowCacheResult<CacheStats> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.entry_count = entries.len() as u64;
        stats.memory_bytes = entries
            .iter()
            .map(|(k, e)| (k.len() + e.value.len()) as u64)
            .sum();
        Ok(stats)
    }
}
