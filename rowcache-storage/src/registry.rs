//! Type registry and per-type loaders.
//!
//! The storage layer is external to this crate. It plugs in by registering a
//! [`ModelLoader`] for each model type it wants cached.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use rowcache_core::{
    CacheError, Criteria, Identifier, IdentityError, Model, ModelType, RowCacheResult,
};

/// Loads entities of one model type from persistent storage.
///
/// # Errors
///
/// Return `Ok(None)` when nothing matches. Infrastructure failures must be
/// reported as `StorageError::Fault`, never as `Ok(None)`: callers cache a
/// `None` as a negative result.
pub trait ModelLoader<M: Model>: Send + Sync {
    /// Load the entity whose primary key renders as `key`.
    fn load(&self, key: &str) -> RowCacheResult<Option<M>>;

    /// Find the single entity matching `criteria`.
    ///
    /// More than one match is `IdentityError::AmbiguousLookup`.
    fn find(&self, criteria: &Criteria) -> RowCacheResult<Option<M>>;
}

struct RegisteredType {
    model_type: ModelType,
    /// Holds an `Arc<dyn ModelLoader<M>>` for the registered `M`.
    loader: Arc<dyn Any + Send + Sync>,
}

/// Maps `namespace.kind` type names to model types and their loaders.
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, RegisteredType>>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.type_names();
        names.sort();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the loader for `M`.
    pub fn register<M: Model>(&self, loader: Arc<dyn ModelLoader<M>>) -> RowCacheResult<()> {
        let model_type = M::model_type();
        let mut types = self.types.write().map_err(|_| CacheError::LockPoisoned)?;
        tracing::debug!(model_type = %model_type, "Registered model loader");
        types.insert(
            model_type.type_name(),
            RegisteredType {
                model_type,
                loader: Arc::new(loader),
            },
        );
        Ok(())
    }

    pub fn contains(&self, model_type: &ModelType) -> bool {
        self.types
            .read()
            .map(|types| types.contains_key(&model_type.type_name()))
            .unwrap_or(false)
    }

    pub fn type_names(&self) -> Vec<String> {
        self.types
            .read()
            .map(|types| types.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Map an identifier's type segment back to a registered model type.
    pub fn resolve_type(&self, identifier: &Identifier) -> RowCacheResult<ModelType> {
        let types = self.types.read().map_err(|_| CacheError::LockPoisoned)?;
        types
            .get(identifier.type_name())
            .map(|registered| registered.model_type.clone())
            .ok_or_else(|| {
                IdentityError::UnknownType {
                    type_name: identifier.type_name().to_string(),
                }
                .into()
            })
    }

    /// The loader registered for `M`.
    pub fn loader<M: Model>(&self) -> RowCacheResult<Arc<dyn ModelLoader<M>>> {
        let model_type = M::model_type();
        let types = self.types.read().map_err(|_| CacheError::LockPoisoned)?;
        types
            .get(&model_type.type_name())
            .and_then(|registered| {
                registered
                    .loader
                    .downcast_ref::<Arc<dyn ModelLoader<M>>>()
                    .cloned()
            })
            .ok_or_else(|| {
                IdentityError::UnknownType {
                    type_name: model_type.type_name(),
                }
                .into()
            })
    }
}
