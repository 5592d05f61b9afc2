//! Model types and the trait persistent entities implement.

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Type name of a persistent entity, rendered as `namespace.kind`.
///
/// Both segments take part in every identifier and cache key, so they must
/// stay stable for as long as cached data is expected to be reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelType {
    namespace: String,
    kind: String,
}

impl ModelType {
    /// Create a model type from its namespace and kind, e.g. `("auth", "user")`.
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
        }
    }

    /// Parse a `namespace.kind` type name.
    pub fn from_type_name(type_name: &str) -> Option<Self> {
        let (namespace, kind) = type_name.split_once('.')?;
        if namespace.is_empty() || kind.is_empty() || kind.contains('.') {
            return None;
        }
        Some(Self::new(namespace, kind))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The `namespace.kind` form used as the registry key.
    pub fn type_name(&self) -> String {
        format!("{}.{}", self.namespace, self.kind)
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.kind)
    }
}

/// A persistent entity that can be cached by identity.
///
/// # Implementation Requirements
///
/// - `model_type()` must return the same value for all instances
/// - `primary_key()` returns `None` only for rows that have not been saved
/// - Implementations must be `Clone`, `Serialize`, and `DeserializeOwned` for cache storage
pub trait Model: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The type this entity is registered under.
    fn model_type() -> ModelType;

    /// The primary key rendered as text.
    fn primary_key(&self) -> Option<String>;
}
