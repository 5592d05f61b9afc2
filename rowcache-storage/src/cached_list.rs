//! Externalizing list.
//!
//! A [`CachedList`] caches each item under its own key and serializes as
//! nothing but the item identifiers. A list of a thousand rows fits in a
//! small cache entry, and rows shared between lists are stored once.
//!
//! # Representations
//!
//! - **Expanded**: the items are in memory.
//! - **Packed**: only identifiers are held, pending unpack.
//!
//! Packing happens on every serialization and writes every item through
//! `set_many`. Unpacking happens on the first read of a packed list, at most
//! once: cached items come back through `get_many`, and anything evicted is
//! rebuilt in one call to [`ListItems::rebuild_items`] and cached again.
//! Order is always the identifier order.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use rowcache_core::RowCacheResult;
use serde::{de::DeserializeOwned, Deserialize, Serialize, Serializer};

use crate::cache::ValueCodec;

/// Caller-supplied identity and rebuild hooks for a [`CachedList`].
pub trait ListItems: Send + Sync {
    type Item: Clone + Serialize + DeserializeOwned + Send + Sync;
    /// Enough to rebuild the item it names.
    type Id: Clone + Eq + Hash + fmt::Debug + Serialize + DeserializeOwned + Send + Sync;

    /// Identifiers for every item, in the same order.
    fn identify_items(&self, items: &[Self::Item]) -> Vec<Self::Id>;

    /// Cache keys for every identifier, in the same order.
    fn make_cache_keys(&self, ids: &[Self::Id]) -> Vec<String>;

    /// The items the identifiers name, in any order. Identifiers that no
    /// longer name anything may be left out.
    fn rebuild_items(&self, ids: &[Self::Id]) -> RowCacheResult<Vec<Self::Item>>;
}

/// Serialized form of a [`CachedList`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedList<Id> {
    pub ids: Vec<Id>,
    /// Per-item timeout to reuse when the list repacks its members.
    pub cache_timeout_secs: Option<u64>,
}

/// Ordered list whose items live in individual cache entries.
pub struct CachedList<H: ListItems> {
    hooks: Arc<H>,
    codec: ValueCodec,
    cache_timeout: Option<Duration>,
    /// Identifiers awaiting unpack; `None` for lists built from items.
    pending: Option<Vec<H::Id>>,
    items: OnceCell<Vec<H::Item>>,
}

impl<H: ListItems> CachedList<H> {
    /// An expanded list.
    pub fn new(items: Vec<H::Item>, hooks: Arc<H>, codec: ValueCodec) -> Self {
        Self {
            hooks,
            codec,
            cache_timeout: None,
            pending: None,
            items: OnceCell::with_value(items),
        }
    }

    /// A packed list, unpacked on first read.
    pub fn from_packed(packed: PackedList<H::Id>, hooks: Arc<H>, codec: ValueCodec) -> Self {
        Self {
            hooks,
            codec,
            cache_timeout: packed.cache_timeout_secs.map(Duration::from_secs),
            pending: Some(packed.ids),
            items: OnceCell::new(),
        }
    }

    /// Read a list stored with [`cache_under`](Self::cache_under).
    pub fn fetch(key: &str, hooks: Arc<H>, codec: ValueCodec) -> RowCacheResult<Option<Self>> {
        let packed = codec.get_or_none::<PackedList<H::Id>>(key)?;
        Ok(packed.map(|packed| Self::from_packed(packed, hooks, codec)))
    }

    /// Per-item timeout; `None` uses the codec default.
    pub fn with_cache_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.cache_timeout = timeout;
        self
    }

    pub fn cache_timeout(&self) -> Option<Duration> {
        self.cache_timeout
    }

    pub fn is_packed(&self) -> bool {
        self.items.get().is_none()
    }

    /// Length of the current representation. Does not unpack.
    ///
    /// A packed list may shrink on unpack if some items cannot be rebuilt.
    pub fn len(&self) -> usize {
        match self.items.get() {
            Some(items) => items.len(),
            None => self.pending.as_ref().map_or(0, Vec::len),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cache every item and return their identifiers in order.
    ///
    /// A list still pending unpack is unpacked first, so evicted members are
    /// rebuilt and every member is written again.
    pub fn pack(&self) -> RowCacheResult<Vec<H::Id>> {
        self.pack_with(self.cache_timeout)
    }

    /// Expand the list. Only the first call does any cache work.
    pub fn unpack(&self) -> RowCacheResult<()> {
        self.expanded().map(|_| ())
    }

    pub fn as_slice(&self) -> RowCacheResult<&[H::Item]> {
        Ok(self.expanded()?.as_slice())
    }

    pub fn get(&self, index: usize) -> RowCacheResult<Option<&H::Item>> {
        Ok(self.expanded()?.get(index))
    }

    pub fn iter(&self) -> RowCacheResult<std::slice::Iter<'_, H::Item>> {
        Ok(self.expanded()?.iter())
    }

    /// A new expanded list holding `range`.
    ///
    /// Slicing a packed list unpacks only the sliced identifiers; this list
    /// stays packed. The range is clamped to the list bounds.
    pub fn slice(&self, range: Range<usize>) -> RowCacheResult<Self> {
        let items = match (self.items.get(), &self.pending) {
            (Some(items), _) => items[clamp(&range, items.len())].to_vec(),
            (None, Some(ids)) => self.load_items(&ids[clamp(&range, ids.len())])?,
            (None, None) => Vec::new(),
        };
        Ok(Self::new(items, Arc::clone(&self.hooks), self.codec.clone())
            .with_cache_timeout(self.cache_timeout))
    }

    pub fn push(&mut self, item: H::Item) -> RowCacheResult<()> {
        self.expanded()?;
        if let Some(items) = self.items.get_mut() {
            items.push(item);
        }
        Ok(())
    }

    pub fn into_vec(self) -> RowCacheResult<Vec<H::Item>> {
        self.expanded()?;
        Ok(self.items.into_inner().unwrap_or_default())
    }

    /// Pack into the serialized form.
    pub fn to_packed(&self) -> RowCacheResult<PackedList<H::Id>> {
        Ok(PackedList {
            ids: self.pack()?,
            cache_timeout_secs: self.cache_timeout.map(whole_secs),
        })
    }

    /// Store this list under `key`.
    ///
    /// Members are cached with the same `timeout` as the list entry so they
    /// do not expire first and force rebuilds on the next fetch.
    pub fn cache_under(&self, key: &str, timeout: Option<Duration>) -> RowCacheResult<()> {
        let packed = PackedList {
            ids: self.pack_with(timeout)?,
            cache_timeout_secs: timeout.map(whole_secs),
        };
        self.codec.set(key, Some(&packed), timeout)
    }

    fn pack_with(&self, timeout: Option<Duration>) -> RowCacheResult<Vec<H::Id>> {
        let items = self.expanded()?;
        self.store_items(items, timeout)
    }

    fn expanded(&self) -> RowCacheResult<&Vec<H::Item>> {
        self.items.get_or_try_init(|| {
            let ids = self.pending.as_deref().unwrap_or_default();
            self.load_items(ids)
        })
    }

    fn store_items(&self, items: &[H::Item], timeout: Option<Duration>) -> RowCacheResult<Vec<H::Id>> {
        let ids = self.hooks.identify_items(items);
        let keys = self.hooks.make_cache_keys(&ids);
        self.codec
            .set_many(keys.into_iter().zip(items.iter().map(Some)), timeout)?;
        Ok(ids)
    }

    fn load_items(&self, ids: &[H::Id]) -> RowCacheResult<Vec<H::Item>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys = self.hooks.make_cache_keys(ids);
        let cached = self.codec.get_many::<H::Item>(&keys)?;

        let mut found: HashMap<H::Id, H::Item> = HashMap::with_capacity(ids.len());
        let mut seen: HashSet<&H::Id> = HashSet::with_capacity(ids.len());
        let mut missed: Vec<H::Id> = Vec::new();
        for (id, key) in ids.iter().zip(&keys) {
            if !seen.insert(id) {
                continue;
            }
            // An entry cached as absent is a miss too.
            match cached.get(key) {
                Some(Some(item)) => {
                    found.insert(id.clone(), item.clone());
                }
                _ => missed.push(id.clone()),
            }
        }

        if !missed.is_empty() {
            tracing::debug!(
                requested = ids.len(),
                missed = missed.len(),
                "Rebuilding evicted list items"
            );
            let rebuilt = self.hooks.rebuild_items(&missed)?;
            let rebuilt_ids = self.store_items(&rebuilt, self.cache_timeout)?;
            found.extend(rebuilt_ids.into_iter().zip(rebuilt));
        }

        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }
}

/// Seconds, rounded up so a sub-second timeout never becomes zero.
fn whole_secs(timeout: Duration) -> u64 {
    timeout
        .as_secs()
        .saturating_add(u64::from(timeout.subsec_nanos() > 0))
}

fn clamp(range: &Range<usize>, len: usize) -> Range<usize> {
    let end = range.end.min(len);
    range.start.min(end)..end
}

impl<H: ListItems> fmt::Debug for CachedList<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedList")
            .field("len", &self.len())
            .field("packed", &self.is_packed())
            .field("cache_timeout", &self.cache_timeout)
            .finish()
    }
}

/// Serializing packs the list, writing its items to the cache.
impl<H: ListItems> Serialize for CachedList<H> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_packed()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}
