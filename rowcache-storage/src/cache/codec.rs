//! Value codec over a raw cache transport.
//!
//! Transports only know bytes, and a missing key looks the same as a key that
//! was deliberately cached as "nothing". Every value written through the codec
//! is wrapped in a tagged [`Slot`] so the two cases stay distinct:
//!
//! - `Slot::Null`: the cached value is the absence of a value
//! - `Slot::Raise`: a direct read must fail with `NotFound`
//! - `Slot::Value(v)`: an ordinary value

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rowcache_core::{CacheConfig, CacheError, RowCacheResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::traits::CacheTransport;

/// Tagged cache payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "slot", content = "value", rename_all = "snake_case")]
enum Slot<T> {
    Null,
    Raise,
    Value(T),
}

impl<'a, T> Slot<&'a T> {
    fn from_option(value: Option<&'a T>) -> Self {
        match value {
            Some(v) => Slot::Value(v),
            None => Slot::Null,
        }
    }
}

/// What `get` returns when the key is not cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback<T> {
    /// Return this value.
    Value(Option<T>),
    /// Fail with `CacheError::NotFound`.
    Raise,
}

impl<T> Default for Fallback<T> {
    fn default() -> Self {
        Fallback::Value(None)
    }
}

/// Result of [`ValueCodec::get_or_miss`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// The key is cached; `None` means it was cached as absent.
    Hit(Option<T>),
    /// The key is not cached at all.
    Missed,
}

impl<T> Lookup<T> {
    pub fn is_missed(&self) -> bool {
        matches!(self, Lookup::Missed)
    }

    /// The hit value, flattening "cached as absent" and "missed" together.
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => value,
            Lookup::Missed => None,
        }
    }
}

/// Sentinel-aware wrapper around a [`CacheTransport`].
///
/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct ValueCodec {
    transport: Arc<dyn CacheTransport>,
    default_timeout: Option<Duration>,
}

impl fmt::Debug for ValueCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCodec")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl ValueCodec {
    /// Wrap a transport. `default_timeout` applies whenever a write passes
    /// no timeout; `None` means entries never expire.
    pub fn new(transport: Arc<dyn CacheTransport>, default_timeout: Option<Duration>) -> Self {
        Self {
            transport,
            default_timeout,
        }
    }

    pub fn from_config(transport: Arc<dyn CacheTransport>, config: &CacheConfig) -> Self {
        Self::new(transport, config.default_timeout())
    }

    pub fn transport(&self) -> &Arc<dyn CacheTransport> {
        &self.transport
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Read a value.
    ///
    /// A value cached as absent returns `Ok(None)` regardless of `fallback`.
    /// A key holding the raise marker fails with `NotFound`.
    pub fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        fallback: Fallback<T>,
    ) -> RowCacheResult<Option<T>> {
        match self.read_slot(key)? {
            Some(slot) => restore(key, slot),
            None => match fallback {
                Fallback::Value(value) => Ok(value),
                Fallback::Raise => Err(not_found(key).into()),
            },
        }
    }

    /// Read a value, `None` when absent or cached as absent.
    pub fn get_or_none<T: DeserializeOwned>(&self, key: &str) -> RowCacheResult<Option<T>> {
        self.get(key, Fallback::Value(None))
    }

    /// Read a value, failing with `NotFound` when the key is not cached.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> RowCacheResult<Option<T>> {
        self.get(key, Fallback::Raise)
    }

    /// Read a value, telling "cached as absent" apart from "not cached".
    pub fn get_or_miss<T: DeserializeOwned>(&self, key: &str) -> RowCacheResult<Lookup<T>> {
        match self.read_slot(key)? {
            Some(slot) => restore(key, slot).map(Lookup::Hit),
            None => Ok(Lookup::Missed),
        }
    }

    /// [`get_or_miss`](Self::get_or_miss), or `Missed` without reading when
    /// `force_miss` is set so the caller reloads and overwrites the entry.
    pub fn get_or_force_miss<T: DeserializeOwned>(
        &self,
        key: &str,
        force_miss: bool,
    ) -> RowCacheResult<Lookup<T>> {
        if force_miss {
            return Ok(Lookup::Missed);
        }
        self.get_or_miss(key)
    }

    /// Read several values. Keys that are not cached are omitted.
    pub fn get_many<T: DeserializeOwned>(
        &self,
        keys: &[String],
    ) -> RowCacheResult<HashMap<String, Option<T>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let raw = self.transport.get_many(keys)?;
        let mut restored = HashMap::with_capacity(raw.len());
        for (key, bytes) in raw {
            if let Some(slot) = decode::<T>(&key, &bytes) {
                let value = restore(&key, slot)?;
                restored.insert(key, value);
            }
        }
        Ok(restored)
    }

    /// Store a value only if the key is not cached. Returns true if stored.
    pub fn add<T: Serialize>(
        &self,
        key: &str,
        value: Option<&T>,
        timeout: Option<Duration>,
    ) -> RowCacheResult<bool> {
        let bytes = encode(key, &Slot::from_option(value))?;
        self.transport.add(key, bytes, self.timeout(timeout))
    }

    /// Store a value; `None` is cached as absent.
    pub fn set<T: Serialize>(
        &self,
        key: &str,
        value: Option<&T>,
        timeout: Option<Duration>,
    ) -> RowCacheResult<()> {
        let bytes = encode(key, &Slot::from_option(value))?;
        self.transport.set(key, bytes, self.timeout(timeout))
    }

    /// Store the raise marker, so direct reads of `key` fail with `NotFound`.
    pub fn set_raise(&self, key: &str, timeout: Option<Duration>) -> RowCacheResult<()> {
        let bytes = encode::<()>(key, &Slot::Raise)?;
        self.transport.set(key, bytes, self.timeout(timeout))
    }

    /// Store several values with a shared timeout.
    pub fn set_many<'a, T, I>(&self, entries: I, timeout: Option<Duration>) -> RowCacheResult<()>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = (String, Option<&'a T>)>,
    {
        let mut prepared = HashMap::new();
        for (key, value) in entries {
            let bytes = encode(&key, &Slot::from_option(value))?;
            prepared.insert(key, bytes);
        }
        if prepared.is_empty() {
            return Ok(());
        }
        self.transport.set_many(prepared, self.timeout(timeout))
    }

    pub fn delete(&self, key: &str) -> RowCacheResult<bool> {
        self.transport.delete(key)
    }

    pub fn delete_many(&self, keys: &[String]) -> RowCacheResult<u64> {
        self.transport.delete_many(keys)
    }

    fn timeout(&self, timeout: Option<Duration>) -> Option<Duration> {
        timeout.or(self.default_timeout)
    }

    fn read_slot<T: DeserializeOwned>(&self, key: &str) -> RowCacheResult<Option<Slot<T>>> {
        Ok(self
            .transport
            .get(key)?
            .and_then(|bytes| decode(key, &bytes)))
    }
}

fn not_found(key: &str) -> CacheError {
    CacheError::NotFound {
        key: key.to_string(),
    }
}

fn restore<T>(key: &str, slot: Slot<T>) -> RowCacheResult<Option<T>> {
    match slot {
        Slot::Null => Ok(None),
        Slot::Raise => Err(not_found(key).into()),
        Slot::Value(value) => Ok(Some(value)),
    }
}

fn encode<T: Serialize>(key: &str, slot: &Slot<&T>) -> RowCacheResult<Vec<u8>> {
    serde_json::to_vec(slot).map_err(|e| {
        CacheError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Undecodable payloads are stale data from another schema; treat as a miss.
fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Option<Slot<T>> {
    match serde_json::from_slice(bytes) {
        Ok(slot) => Some(slot),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
            None
        }
    }
}
