//! Cache transport trait and statistics.
//!
//! This module defines the key-value surface every transport must provide.
//! Values are opaque bytes; the [`ValueCodec`](super::codec::ValueCodec)
//! layered on top owns their encoding.

use std::collections::HashMap;
use std::time::Duration;

use rowcache_core::RowCacheResult;

/// Key-value cache transport for pluggable cache implementations.
///
/// This trait abstracts over different transports (e.g., LMDB, memcached,
/// in-memory). Implementations must be thread-safe and support concurrent
/// access.
///
/// # Expiry
///
/// `timeout` is the entry lifetime: `None` keeps the entry until it is
/// deleted or evicted, `Some(d)` expires it `d` after the write. Expired
/// entries must read as absent.
///
/// # Consistency
///
/// Read-your-writes and the atomicity of `get_many`/`set_many` are whatever
/// the implementation offers; callers treat a missing entry as a miss.
pub trait CacheTransport: Send + Sync {
    /// Store a value only if the key is not already present.
    ///
    /// Returns true if the value was stored.
    fn add(&self, key: &str, value: Vec<u8>, timeout: Option<Duration>) -> RowCacheResult<bool>;

    /// Get a value, or `None` if absent or expired.
    fn get(&self, key: &str) -> RowCacheResult<Option<Vec<u8>>>;

    /// Get several values. Absent keys are omitted from the result.
    fn get_many(&self, keys: &[String]) -> RowCacheResult<HashMap<String, Vec<u8>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Store a value, replacing any previous one.
    fn set(&self, key: &str, value: Vec<u8>, timeout: Option<Duration>) -> RowCacheResult<()>;

    /// Store several values with a shared timeout.
    fn set_many(
        &self,
        entries: HashMap<String, Vec<u8>>,
        timeout: Option<Duration>,
    ) -> RowCacheResult<()> {
        for (key, value) in entries {
            self.set(&key, value, timeout)?;
        }
        Ok(())
    }

    /// Delete a value. Returns true if something was deleted.
    fn delete(&self, key: &str) -> RowCacheResult<bool>;

    /// Delete several values. Returns the number deleted.
    fn delete_many(&self, keys: &[String]) -> RowCacheResult<u64> {
        let mut deleted = 0u64;
        for key in keys {
            if self.delete(key)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Get cache statistics.
    fn stats(&self) -> RowCacheResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because they expired.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
