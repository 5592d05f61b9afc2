//! Deferred, cache-backed handle to one entity.
//!
//! A [`LazyRef`] remembers where its entity's identity comes from and loads
//! the entity on first [`resolve`](LazyRef::resolve). The outcome is kept in
//! memory, so later calls never touch the cache again.
//!
//! # States
//!
//! ```text
//! Unresolved ──resolve──▶ ResolvedValue
//!                    └──▶ ResolvedAbsent
//! ```
//!
//! Resolution runs at most once per instance, even when several threads
//! resolve the same reference concurrently.
//!
//! # Serialization
//!
//! Only the identity source and the fail-silently flag are serialized. A
//! ready-made entity is replaced by its identifier string, and any resolved
//! value is dropped, so a deserialized reference starts unresolved and runs
//! the full read-through protocol against whichever cache it is resolved with.

use std::fmt;

use once_cell::sync::OnceCell;
use rowcache_core::{Criteria, Identifier, IdentityError, Model, RowCacheResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model_cache::{ModelCache, ModelSource};

/// Resolution state of a [`LazyRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceState {
    Unresolved,
    ResolvedValue,
    ResolvedAbsent,
}

/// Lazy reference to an entity of type `M`.
#[derive(Clone)]
pub struct LazyRef<M: Model> {
    source: ModelSource<M>,
    fail_silently: bool,
    identifier: OnceCell<Identifier>,
    resolved: OnceCell<Option<M>>,
}

impl<M: Model> LazyRef<M> {
    /// Wrap a ready-made entity. The reference starts resolved.
    pub fn new(instance: M) -> Self {
        let identifier = Identifier::for_model(&instance);
        Self {
            source: ModelSource::Instance(instance.clone()),
            fail_silently: true,
            identifier: OnceCell::with_value(identifier),
            resolved: OnceCell::with_value(Some(instance)),
        }
    }

    /// Reference by an identifier string such as `"auth.user.1"`.
    pub fn from_identifier(identifier: impl Into<String>) -> Self {
        Self::from_source(ModelSource::Identifier(identifier.into()))
    }

    /// Reference by primary key.
    pub fn with_key(key: impl fmt::Display) -> Self {
        Self::from_source(ModelSource::Key(key.to_string()))
    }

    /// Reference by lookup criteria.
    pub fn lookup(criteria: Criteria) -> Self {
        Self::from_source(ModelSource::Lookup(criteria))
    }

    pub fn from_source(source: ModelSource<M>) -> Self {
        match source {
            ModelSource::Instance(instance) => Self::new(instance),
            source => Self {
                source,
                fail_silently: true,
                identifier: OnceCell::new(),
                resolved: OnceCell::new(),
            },
        }
    }

    /// Whether identity failures resolve to absent (the default) or raise.
    pub fn fail_silently(mut self, fail_silently: bool) -> Self {
        self.fail_silently = fail_silently;
        self
    }

    pub fn is_fail_silently(&self) -> bool {
        self.fail_silently
    }

    pub fn source(&self) -> &ModelSource<M> {
        &self.source
    }

    pub fn state(&self) -> ReferenceState {
        match self.resolved.get() {
            None => ReferenceState::Unresolved,
            Some(Some(_)) => ReferenceState::ResolvedValue,
            Some(None) => ReferenceState::ResolvedAbsent,
        }
    }

    /// The identifier, computed once. Lookup criteria may hit the lookup
    /// cache and the loader.
    pub fn identifier(&self, cache: &ModelCache) -> RowCacheResult<&Identifier> {
        self.identifier
            .get_or_try_init(|| cache.identify(&self.source))
    }

    /// Resolve the entity, loading it on first call.
    ///
    /// # Errors
    ///
    /// With fail-silently off, identity failures and a missing row surface
    /// as `IdentityError`. Cache and storage faults always propagate and
    /// leave the reference unresolved.
    pub fn resolve(&self, cache: &ModelCache) -> RowCacheResult<Option<&M>> {
        let resolved = self.resolved.get_or_try_init(|| self.load(cache))?;
        Ok(resolved.as_ref())
    }

    /// Resolve and report whether an entity was found.
    pub fn is_present(&self, cache: &ModelCache) -> RowCacheResult<bool> {
        Ok(self.resolve(cache)?.is_some())
    }

    /// The resolved entity, without resolving.
    pub fn get(&self) -> Option<&M> {
        self.resolved.get().and_then(Option::as_ref)
    }

    /// The primary key as text.
    ///
    /// Uses the resolved entity when there is one; otherwise reads the key
    /// segment of the identifier without loading the entity. `None` for the
    /// null key.
    pub fn primary_key_text(&self, cache: &ModelCache) -> RowCacheResult<Option<String>> {
        if let Some(instance) = self.get() {
            return Ok(instance.primary_key());
        }
        Ok(self.identifier(cache)?.key().map(str::to_string))
    }

    fn load(&self, cache: &ModelCache) -> RowCacheResult<Option<M>> {
        let identifier = match self.identifier(cache) {
            Ok(identifier) => identifier,
            Err(e) if e.is_absorbable() && self.fail_silently => {
                tracing::debug!(error = %e, "Lazy reference could not be identified");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let loaded = match cache.load_row::<M>(identifier) {
            Ok(loaded) => loaded,
            Err(e) if e.is_absorbable() && self.fail_silently => {
                tracing::debug!(identifier = %identifier, error = %e, "Lazy reference resolved absent");
                None
            }
            Err(e) => return Err(e),
        };
        if loaded.is_none() && !self.fail_silently {
            return Err(IdentityError::NotFound {
                identifier: identifier.to_string(),
            }
            .into());
        }
        Ok(loaded)
    }
}

impl<M: Model> fmt::Debug for LazyRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRef")
            .field("identifier", &self.identifier.get())
            .field("state", &self.state())
            .field("fail_silently", &self.fail_silently)
            .finish()
    }
}

/// Wire form of a reference's identity source.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SourceRepr {
    Identifier(String),
    Key(String),
    Lookup(Criteria),
}

#[derive(Serialize, Deserialize)]
struct LazyRefRepr {
    source: SourceRepr,
    fail_silently: bool,
}

impl<M: Model> Serialize for LazyRef<M> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let source = match &self.source {
            ModelSource::Instance(instance) => {
                SourceRepr::Identifier(Identifier::for_model(instance).into_string())
            }
            ModelSource::Identifier(identifier) => SourceRepr::Identifier(identifier.clone()),
            ModelSource::Key(key) => SourceRepr::Key(key.clone()),
            ModelSource::Lookup(criteria) => SourceRepr::Lookup(criteria.clone()),
        };
        LazyRefRepr {
            source,
            fail_silently: self.fail_silently,
        }
        .serialize(serializer)
    }
}

impl<'de, M: Model> Deserialize<'de> for LazyRef<M> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = LazyRefRepr::deserialize(deserializer)?;
        let source = match repr.source {
            SourceRepr::Identifier(identifier) => ModelSource::Identifier(identifier),
            SourceRepr::Key(key) => ModelSource::Key(key),
            SourceRepr::Lookup(criteria) => ModelSource::Lookup(criteria),
        };
        Ok(Self::from_source(source).fail_silently(repr.fail_silently))
    }
}
