//! LMDB-backed cache transport.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store that survives process restarts.
//!
//! # Value Format
//!
//! Each stored value is `[expires_at: 8 bytes][payload]`, where `expires_at`
//! is a little-endian UTC timestamp in milliseconds and `0` means the entry
//! never expires. Expired entries read as absent; `purge_expired` reclaims
//! their space.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The transport uses:
//! - Read transactions for `get` and `get_many`
//! - Write transactions for `add`, `set`, `set_many`, `delete` and purging
//! - Statistics are tracked behind an `RwLock`

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use rowcache_core::{CacheError, RowCacheError, RowCacheResult};

use super::traits::{CacheStats, CacheTransport};

/// Length of the expiry header in front of every value.
const HEADER_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stored value is shorter than its header.
    #[error("Corrupt entry for key {0}")]
    CorruptEntry(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbCacheError to RowCacheError.
impl From<LmdbCacheError> for RowCacheError {
    fn from(e: LmdbCacheError) -> Self {
        RowCacheError::Cache(CacheError::Transport {
            reason: e.to_string(),
        })
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed cache transport with per-entry expiry.
///
/// # Example
///
/// ```ignore
/// use rowcache_storage::cache::LmdbTransport;
///
/// let transport = LmdbTransport::new("/tmp/rowcache", 100)?;
/// transport.set("RowCache:1:auth.user.7", bytes, Some(Duration::from_secs(60)))?;
/// ```
pub struct LmdbTransport {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Hit/miss/eviction counters.
    stats: RwLock<CacheStats>,
}

impl LmdbTransport {
    /// Create a new LMDB cache transport.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit().map_err(txn_error)?;

        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    /// Delete every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> RowCacheResult<u64> {
        let now = now_millis();
        let expired: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            let iter = self.db.iter(&rtxn).map_err(txn_error)?;
            let mut expired = Vec::new();
            for result in iter {
                let (key, value) = result.map_err(txn_error)?;
                if is_expired(value, now) {
                    expired.push(key.to_vec());
                }
            }
            expired
        };

        if expired.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;

        if let Ok(mut stats) = self.stats.write() {
            stats.evictions += deleted;
        }
        Ok(deleted)
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

    /// Read one live payload inside an open read transaction.
    fn read_live(&self, rtxn: &RoTxn, key: &str, now: i64) -> RowCacheResult<Option<Vec<u8>>> {
        match self.db.get(rtxn, key.as_bytes()).map_err(txn_error)? {
            Some(bytes) if bytes.len() < HEADER_LEN => {
                Err(LmdbCacheError::CorruptEntry(key.to_string()).into())
            }
            Some(bytes) if !is_expired(bytes, now) => Ok(Some(bytes[HEADER_LEN..].to_vec())),
            _ => Ok(None),
        }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expires_at(timeout: Option<Duration>) -> i64 {
    let Some(timeout) = timeout else {
        return 0;
    };
    // A timeout past the timestamp range never expires.
    i64::try_from(timeout.as_millis())
        .ok()
        .and_then(|millis| now_millis().checked_add(millis))
        // Clamp to at least 1 so a zero timeout is not mistaken for "never".
        .map_or(0, |at| at.max(1))
}

fn encode_entry(value: &[u8], timeout: Option<Duration>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + value.len());
    bytes.extend_from_slice(&expires_at(timeout).to_le_bytes());
    bytes.extend_from_slice(value);
    bytes
}

fn is_expired(bytes: &[u8], now: i64) -> bool {
    let Some(header) = bytes.get(..HEADER_LEN) else {
        return true;
    };
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(header);
    let expires_at = i64::from_le_bytes(raw);
    expires_at != 0 && expires_at <= now
}

impl CacheTransport for LmdbTransport {
    fn add(&self, key: &str, value: Vec<u8>, timeout: Option<Duration>) -> RowCacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;

        let occupied = match self.db.get(&wtxn, key.as_bytes()).map_err(txn_error)? {
            Some(bytes) => !is_expired(bytes, now_millis()),
            None => false,
        };
        if occupied {
            return Ok(false);
        }

        self.db
            .put(&mut wtxn, key.as_bytes(), &encode_entry(&value, timeout))
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(true)
    }

    fn get(&self, key: &str) -> RowCacheResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let found = self.read_live(&rtxn, key, now_millis())?;
        self.record(found.is_some());
        Ok(found)
    }

    fn get_many(&self, keys: &[String]) -> RowCacheResult<HashMap<String, Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let now = now_millis();
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            let value = self.read_live(&rtxn, key, now)?;
            self.record(value.is_some());
            if let Some(value) = value {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    fn set(&self, key: &str, value: Vec<u8>, timeout: Option<Duration>) -> RowCacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &encode_entry(&value, timeout))
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    fn set_many(
        &self,
        entries: HashMap<String, Vec<u8>>,
        timeout: Option<Duration>,
    ) -> RowCacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        for (key, value) in &entries {
            self.db
                .put(&mut wtxn, key.as_bytes(), &encode_entry(value, timeout))
                .map_err(txn_error)?;
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> RowCacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    fn delete_many(&self, keys: &[String]) -> RowCacheResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0u64;
        for key in keys {
            if self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_error)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    fn stats(&self) -> RowCacheResult<CacheStats> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut entry_count = 0u64;
        let mut memory_bytes = 0u64;
        for result in self.db.iter(&rtxn).map_err(txn_error)? {
            let (key, value) = result.map_err(txn_error)?;
            entry_count += 1;
            memory_bytes += (key.len() + value.len()) as u64;
        }

        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.entry_count = entry_count;
        stats.memory_bytes = memory_bytes;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_transport() -> (LmdbTransport, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let transport =
            LmdbTransport::new(temp_dir.path(), 10).expect("transport creation should succeed");
        (transport, temp_dir)
    }

    #[test]
    fn test_set_and_get() {
        let (transport, _temp_dir) = create_test_transport();
        transport
            .set("RowCache:1:auth.user.7", b"payload".to_vec(), None)
            .expect("set should succeed");

        let found = transport
            .get("RowCache:1:auth.user.7")
            .expect("get should succeed");
        assert_eq!(found, Some(b"payload".to_vec()));
    }

    #[test]
    fn test_get_missing() {
        let (transport, _temp_dir) = create_test_transport();
        assert_eq!(transport.get("nope").expect("get should succeed"), None);
    }

    #[test]
    fn test_overwrite() {
        let (transport, _temp_dir) = create_test_transport();
        transport.set("k", b"one".to_vec(), None).expect("set");
        transport.set("k", b"two".to_vec(), None).expect("set");
        assert_eq!(transport.get("k").expect("get"), Some(b"two".to_vec()));
    }

    #[test]
    fn test_add_respects_existing() {
        let (transport, _temp_dir) = create_test_transport();
        assert!(transport.add("k", b"one".to_vec(), None).expect("add"));
        assert!(!transport.add("k", b"two".to_vec(), None).expect("add"));
        assert_eq!(transport.get("k").expect("get"), Some(b"one".to_vec()));
    }

    #[test]
    fn test_expiry_and_purge() {
        let (transport, _temp_dir) = create_test_transport();
        transport
            .set("expired", b"x".to_vec(), Some(Duration::ZERO))
            .expect("set");
        transport
            .set("live", b"y".to_vec(), Some(Duration::from_secs(600)))
            .expect("set");

        assert_eq!(transport.get("expired").expect("get"), None);
        assert_eq!(transport.get("live").expect("get"), Some(b"y".to_vec()));

        // An expired key may be added again.
        assert!(transport.add("expired", b"z".to_vec(), Some(Duration::ZERO)).expect("add"));

        let purged = transport.purge_expired().expect("purge should succeed");
        assert_eq!(purged, 1);
        let stats = transport.stats().expect("stats");
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn test_huge_timeout_never_expires() {
        let (transport, _temp_dir) = create_test_transport();
        assert_eq!(expires_at(Some(Duration::MAX)), 0);
        assert_eq!(expires_at(Some(Duration::from_millis(i64::MAX as u64))), 0);
        assert_eq!(expires_at(Some(Duration::ZERO)).signum(), 1);

        transport
            .set("forever", b"x".to_vec(), Some(Duration::MAX))
            .expect("set should succeed");
        assert_eq!(
            transport.get("forever").expect("get should succeed"),
            Some(b"x".to_vec())
        );
        assert_eq!(transport.purge_expired().expect("purge should succeed"), 0);
    }

    #[test]
    fn test_many_operations() {
        let (transport, _temp_dir) = create_test_transport();
        let mut entries = HashMap::new();
        for i in 0..5 {
            entries.insert(format!("item:{}", i), vec![i as u8]);
        }
        transport.set_many(entries, None).expect("set_many");

        let keys: Vec<String> = (0..7).map(|i| format!("item:{}", i)).collect();
        let found = transport.get_many(&keys).expect("get_many");
        assert_eq!(found.len(), 5);
        assert_eq!(found.get("item:3"), Some(&vec![3u8]));

        let deleted = transport.delete_many(&keys).expect("delete_many");
        assert_eq!(deleted, 5);
        assert!(transport.get_many(&keys).expect("get_many").is_empty());
    }

    #[test]
    fn test_stats() {
        let (transport, _temp_dir) = create_test_transport();
        let _ = transport.get("k");
        transport.set("k", b"v".to_vec(), None).expect("set");
        let _ = transport.get("k");
        let _ = transport.get("k");

        let stats = transport.stats().expect("stats should succeed");
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.memory_bytes, (1 + HEADER_LEN + 1) as u64);
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let transport = LmdbTransport::new(temp_dir.path(), 10).expect("open");
            transport.set("k", b"kept".to_vec(), None).expect("set");
        }
        let transport = LmdbTransport::new(temp_dir.path(), 10).expect("reopen");
        assert_eq!(transport.get("k").expect("get"), Some(b"kept".to_vec()));
    }
}
