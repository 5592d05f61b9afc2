//! Deduplicating table of lazy references.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rowcache_core::{CacheError, Identifier, Model, RowCacheResult};

use crate::lazy_ref::LazyRef;
use crate::model_cache::ModelCache;

/// At most one [`LazyRef`] per identifier.
///
/// `get_or_add` resolves new references eagerly. A reference that resolves
/// absent is stored as `None`, which still answers `contains` and keeps the
/// table from trying the same identity again.
pub struct ReferenceTable<M: Model> {
    entries: RwLock<HashMap<Identifier, Option<Arc<LazyRef<M>>>>>,
}

impl<M: Model> Default for ReferenceTable<M> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<M: Model> ReferenceTable<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the reference already stored for this identity, or resolve
    /// `reference` and store it.
    ///
    /// Returns `None` when the identity resolves absent.
    pub fn get_or_add(
        &self,
        reference: LazyRef<M>,
        cache: &ModelCache,
    ) -> RowCacheResult<Option<Arc<LazyRef<M>>>> {
        let identifier = reference.identifier(cache)?.clone();

        {
            let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
            if let Some(existing) = entries.get(&identifier) {
                return Ok(existing.clone());
            }
        }

        // Resolve outside the lock; a concurrent insert for the same
        // identity wins and this resolution is discarded.
        let entry = if reference.is_present(cache)? {
            Some(Arc::new(reference))
        } else {
            None
        };

        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        Ok(entries.entry(identifier).or_insert(entry).clone())
    }

    /// The stored reference, `None` if absent or never added.
    pub fn get(&self, identifier: &Identifier) -> Option<Arc<LazyRef<M>>> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(identifier).cloned().flatten())
    }

    /// Whether the identity has been added, including ones that resolved absent.
    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(identifier))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn identifiers(&self) -> Vec<Identifier> {
        let mut identifiers: Vec<Identifier> = self
            .entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        identifiers.sort();
        identifiers
    }
}
