//! Two-level get-by-lookup.
//!
//! ```text
//! criteria ──lookup key──▶ primary key ──row key──▶ entity
//! ```
//!
//! A primary-key-only lookup skips the first level. Saving an entity only
//! has to delete its row key: the lookup level maps to primary keys, which
//! stay valid across saves.

use std::marker::PhantomData;

use rowcache_core::{Criteria, Identifier, IdentityError, Model, RowCacheResult};

use crate::cache::Lookup;
use crate::model_cache::ModelCache;

/// Cached `get(criteria)` for one model type.
///
/// The storage layer wraps its single-row query path with this instead of
/// querying directly.
#[derive(Debug, Clone)]
pub struct RowCacheResolver<M: Model> {
    cache: ModelCache,
    scope: Option<Criteria>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> RowCacheResolver<M> {
    pub fn new(cache: ModelCache) -> Self {
        Self {
            cache,
            scope: None,
            _model: PhantomData,
        }
    }

    /// Ambient filters merged under every lookup, e.g. the owner of a
    /// related collection.
    pub fn with_scope(mut self, scope: Criteria) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Get the single entity matching `criteria`.
    ///
    /// Backfills the row key (and the lookup key, if one was used) on a miss;
    /// a hit writes nothing.
    ///
    /// # Errors
    ///
    /// `NotFoundLookup` when nothing matches, `AmbiguousLookup` when more
    /// than one row matches.
    pub fn get(&self, criteria: &Criteria) -> RowCacheResult<M> {
        let model_type = M::model_type();

        let (row_identifier, lookup_key) = match criteria.single_primary_key() {
            Some(key) => (Some(Identifier::render(&model_type, key)), None),
            None => {
                let full = self.full_criteria(criteria);
                let lookup_key = self.cache.lookup_key(&model_type, &full);
                let cached_key = self
                    .cache
                    .codec()
                    .get_or_miss::<String>(lookup_key.as_str())?;
                let row_identifier = match cached_key {
                    Lookup::Hit(Some(key)) => Some(Identifier::render(&model_type, key)),
                    Lookup::Hit(None) | Lookup::Missed => None,
                };
                (row_identifier, Some(lookup_key))
            }
        };

        if let Some(identifier) = &row_identifier {
            let row_key = self.cache.row_key(identifier);
            if let Some(cached) = self.cache.codec().get_or_none::<M>(row_key.as_str())? {
                return Ok(cached);
            }
        }

        let full = self.full_criteria(criteria);
        tracing::debug!(
            model_type = %model_type,
            criteria = %full,
            "Row cache miss, querying loader"
        );
        let found = self
            .cache
            .registry()
            .loader::<M>()?
            .find(&full)?
            .ok_or_else(|| IdentityError::NotFoundLookup {
                model_type: model_type.type_name(),
                criteria: full.to_string(),
            })?;

        let identifier = self.cache.store_row(&found)?;
        if let (Some(lookup_key), Some(key)) = (lookup_key, identifier.key()) {
            self.cache
                .codec()
                .set(lookup_key.as_str(), Some(&key.to_string()), None)?;
        }
        Ok(found)
    }

    fn full_criteria(&self, criteria: &Criteria) -> Criteria {
        match &self.scope {
            Some(scope) => criteria.merged_over(scope),
            None => criteria.clone(),
        }
    }
}
