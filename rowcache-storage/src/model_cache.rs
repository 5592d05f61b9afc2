//! Explicitly scoped model cache.
//!
//! [`ModelCache`] bundles the value codec, the versioned key deriver and the
//! type registry. There is no process-wide instance: build one and hand
//! clones to whatever needs it. Lazy references, reference tables and the
//! row cache resolver all read and write rows through the same instance, so
//! they share row keys and a single invalidation point.

use std::sync::Arc;

use rowcache_core::{
    CacheConfig, CacheKey, Criteria, Identifier, IdentityError, KeyDeriver, Model, ModelType,
    RowCacheResult,
};

use crate::cache::{CacheTransport, Lookup, ValueCodec};
use crate::registry::{ModelLoader, TypeRegistry};

/// Where an entity's identity comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource<M> {
    /// A ready-made entity.
    Instance(M),
    /// A string already in `namespace.kind.key` form.
    Identifier(String),
    /// An explicit primary key for `M`.
    Key(String),
    /// Lookup criteria for `M`, resolved through the lookup cache.
    Lookup(Criteria),
}

/// Cache handle shared by every row-level component.
#[derive(Debug, Clone)]
pub struct ModelCache {
    codec: ValueCodec,
    keys: KeyDeriver,
    registry: Arc<TypeRegistry>,
}

impl ModelCache {
    pub fn new(transport: Arc<dyn CacheTransport>, config: &CacheConfig) -> Self {
        Self::from_parts(
            ValueCodec::from_config(transport, config),
            KeyDeriver::new(config.versions.clone()),
            Arc::new(TypeRegistry::new()),
        )
    }

    pub fn from_parts(codec: ValueCodec, keys: KeyDeriver, registry: Arc<TypeRegistry>) -> Self {
        Self {
            codec,
            keys,
            registry,
        }
    }

    pub fn codec(&self) -> &ValueCodec {
        &self.codec
    }

    /// The live key versions. `set_version` here busts a whole key purpose.
    pub fn keys(&self) -> &KeyDeriver {
        &self.keys
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn register<M: Model>(&self, loader: Arc<dyn ModelLoader<M>>) -> RowCacheResult<()> {
        self.registry.register(loader)
    }

    pub fn row_key(&self, identifier: &Identifier) -> CacheKey {
        self.keys.row_key(identifier)
    }

    pub fn lookup_key(&self, model_type: &ModelType, criteria: &Criteria) -> CacheKey {
        self.keys.lookup_key(model_type, criteria)
    }

    /// Compute the identifier of `source` as an `M`.
    ///
    /// # Errors
    ///
    /// - `InvalidIdentifier` for a malformed identifier string
    /// - `TypeMismatch` when the string names another model type
    /// - `AmbiguousLookup` when lookup criteria match more than one row
    ///
    /// Criteria matching no row yield the null identifier, not an error.
    pub fn identify<M: Model>(&self, source: &ModelSource<M>) -> RowCacheResult<Identifier> {
        let model_type = M::model_type();
        match source {
            ModelSource::Instance(model) => Ok(Identifier::for_model(model)),
            ModelSource::Identifier(value) => {
                let identifier = Identifier::parse(value)?;
                if !identifier.is_type(&model_type) {
                    return Err(IdentityError::TypeMismatch {
                        identifier: identifier.into_string(),
                        expected: model_type.type_name(),
                    }
                    .into());
                }
                Ok(identifier)
            }
            ModelSource::Key(key) => Ok(Identifier::render(&model_type, key)),
            ModelSource::Lookup(criteria) => {
                let key = match criteria.primary_key() {
                    Some(key) => Some(key),
                    None => self.lookup_primary_key::<M>(criteria)?,
                };
                Ok(match key {
                    Some(key) => Identifier::render(&model_type, key),
                    None => Identifier::null(&model_type),
                })
            }
        }
    }

    /// Resolve criteria to a primary key through the lookup cache.
    ///
    /// Both positive and negative results are cached at the lookup key.
    pub fn lookup_primary_key<M: Model>(
        &self,
        criteria: &Criteria,
    ) -> RowCacheResult<Option<String>> {
        let model_type = M::model_type();
        let lookup_key = self.lookup_key(&model_type, criteria);

        if let Lookup::Hit(key) = self.codec.get_or_miss::<String>(lookup_key.as_str())? {
            return Ok(key);
        }

        tracing::debug!(
            model_type = %model_type,
            criteria = %criteria,
            "Lookup cache miss, querying loader"
        );
        let found = self.registry.loader::<M>()?.find(criteria)?;
        let key = found.as_ref().and_then(|model| model.primary_key());
        self.codec.set(lookup_key.as_str(), key.as_ref(), None)?;
        Ok(key)
    }

    /// Read-through load of one row.
    ///
    /// The null identifier resolves to `None` without touching the cache or
    /// the loader. On a row cache miss the loader runs and its result is
    /// cached, `None` included. Loader identity errors are logged and treated
    /// as not found; storage and transport faults propagate.
    pub fn load_row<M: Model>(&self, identifier: &Identifier) -> RowCacheResult<Option<M>> {
        let Some(key) = identifier.key() else {
            return Ok(None);
        };
        let row_key = self.row_key(identifier);

        match self.codec.require::<M>(row_key.as_str()) {
            Ok(cached) => return Ok(cached),
            Err(e) if e.is_cache_not_found() => {}
            Err(e) => return Err(e),
        }

        tracing::debug!(identifier = %identifier, "Row cache miss, loading from storage");
        let loaded = match self.registry.loader::<M>()?.load(key) {
            Ok(loaded) => loaded,
            Err(e) if e.is_absorbable() => {
                tracing::warn!(identifier = %identifier, error = %e, "Could not load row");
                None
            }
            Err(e) => return Err(e),
        };

        if loaded.is_none() {
            tracing::warn!(identifier = %identifier, "Could not find row");
        }
        self.codec.set(row_key.as_str(), loaded.as_ref(), None)?;
        Ok(loaded)
    }

    /// Cache `model` under its row key.
    pub fn store_row<M: Model>(&self, model: &M) -> RowCacheResult<Identifier> {
        let identifier = Identifier::for_model(model);
        self.codec
            .set(self.row_key(&identifier).as_str(), Some(model), None)?;
        Ok(identifier)
    }

    /// Delete the row key of `identifier`. Returns true if an entry existed.
    ///
    /// This is the entry point for mutation hooks. Lookup keys are left alone:
    /// they map to primary keys, which a save does not change.
    pub fn invalidate(&self, identifier: &Identifier) -> RowCacheResult<bool> {
        let row_key = self.row_key(identifier);
        let deleted = self.codec.delete(row_key.as_str())?;
        tracing::debug!(identifier = %identifier, deleted, "Invalidated row");
        Ok(deleted)
    }

    /// Delete the row key of an entity instance.
    pub fn invalidate_model<M: Model>(&self, model: &M) -> RowCacheResult<bool> {
        self.invalidate(&Identifier::for_model(model))
    }
}
