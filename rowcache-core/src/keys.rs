//! Versioned cache key derivation.
//!
//! Every key embeds the configured version of its purpose. Bumping a version
//! makes all earlier keys of that purpose unreachable, which is how a whole
//! namespace is invalidated without touching the transport.

use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::criteria::Criteria;
use crate::identifier::Identifier;
use crate::model::ModelType;

/// What a cache key is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// Identifier to cached entity.
    RowCache,
    /// Criteria signature to primary key.
    RowCacheLookup,
}

impl KeyPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RowCache => "RowCache",
            Self::RowCacheLookup => "RowCacheLookup",
        }
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version strings per key purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyVersions {
    pub row_cache: String,
    pub row_cache_lookup: String,
}

impl Default for KeyVersions {
    fn default() -> Self {
        Self {
            row_cache: "1".to_string(),
            row_cache_lookup: "1".to_string(),
        }
    }
}

impl KeyVersions {
    pub fn get(&self, purpose: KeyPurpose) -> &str {
        match purpose {
            KeyPurpose::RowCache => &self.row_cache,
            KeyPurpose::RowCacheLookup => &self.row_cache_lookup,
        }
    }

    pub fn set(&mut self, purpose: KeyPurpose, version: impl Into<String>) {
        match purpose {
            KeyPurpose::RowCache => self.row_cache = version.into(),
            KeyPurpose::RowCacheLookup => self.row_cache_lookup = version.into(),
        }
    }
}

/// A transport key. Computed on every access, never stored as a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    fn new(purpose: KeyPurpose, version: &str, identifier: &Identifier) -> Self {
        Self(format!("{}:{}:{}", purpose, version, identifier))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Shared handle to the live key versions.
///
/// Clones share the same versions, so `set_version` through any clone takes
/// effect for every key derived afterwards.
#[derive(Debug, Clone, Default)]
pub struct KeyDeriver {
    versions: Arc<RwLock<KeyVersions>>,
}

impl KeyDeriver {
    pub fn new(versions: KeyVersions) -> Self {
        Self {
            versions: Arc::new(RwLock::new(versions)),
        }
    }

    /// The current version for a purpose, read at call time.
    pub fn version(&self, purpose: KeyPurpose) -> String {
        // Versions are plain strings; a poisoned lock still holds a usable value.
        match self.versions.read() {
            Ok(versions) => versions.get(purpose).to_string(),
            Err(poisoned) => poisoned.into_inner().get(purpose).to_string(),
        }
    }

    pub fn set_version(&self, purpose: KeyPurpose, version: impl Into<String>) {
        match self.versions.write() {
            Ok(mut versions) => versions.set(purpose, version),
            Err(poisoned) => poisoned.into_inner().set(purpose, version),
        }
    }

    pub fn versions(&self) -> KeyVersions {
        match self.versions.read() {
            Ok(versions) => versions.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// `RowCache:<version>:<identifier>`
    pub fn row_key(&self, identifier: &Identifier) -> CacheKey {
        CacheKey::new(
            KeyPurpose::RowCache,
            &self.version(KeyPurpose::RowCache),
            identifier,
        )
    }

    /// `RowCacheLookup:<version>:<namespace.kind.content-hash>`
    pub fn lookup_key(&self, model_type: &ModelType, criteria: &Criteria) -> CacheKey {
        let identifier = Identifier::render(model_type, criteria.content_hash());
        CacheKey::new(
            KeyPurpose::RowCacheLookup,
            &self.version(KeyPurpose::RowCacheLookup),
            &identifier,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_type() -> ModelType {
        ModelType::new("auth", "user")
    }

    #[test]
    fn test_row_key_scenario() {
        let deriver = KeyDeriver::new(KeyVersions {
            row_cache: "v1".to_string(),
            ..KeyVersions::default()
        });
        let identifier = Identifier::render(&user_type(), 7);
        assert_eq!(identifier.as_str(), "auth.user.7");
        assert_eq!(deriver.row_key(&identifier).as_str(), "RowCache:v1:auth.user.7");

        deriver.set_version(KeyPurpose::RowCache, "v2");
        assert_eq!(deriver.row_key(&identifier).as_str(), "RowCache:v2:auth.user.7");
        assert_eq!(identifier.as_str(), "auth.user.7");
    }

    #[test]
    fn test_version_change_is_visible_through_clones() {
        let deriver = KeyDeriver::default();
        let clone = deriver.clone();
        clone.set_version(KeyPurpose::RowCacheLookup, "9");
        assert_eq!(deriver.version(KeyPurpose::RowCacheLookup), "9");
        assert_eq!(deriver.version(KeyPurpose::RowCache), "1");
    }

    #[test]
    fn test_lookup_key_format() {
        let deriver = KeyDeriver::default();
        let criteria = Criteria::new().with("slug", "holiday");
        let key = deriver.lookup_key(&user_type(), &criteria);
        let expected = format!("RowCacheLookup:1:auth.user.{}", criteria.content_hash());
        assert_eq!(key.as_str(), expected);
    }

    #[test]
    fn test_lookup_version_does_not_touch_row_keys() {
        let deriver = KeyDeriver::default();
        let identifier = Identifier::render(&user_type(), 1);
        let criteria = Criteria::new().with("slug", "a");
        let row_before = deriver.row_key(&identifier);
        let lookup_before = deriver.lookup_key(&user_type(), &criteria);

        deriver.set_version(KeyPurpose::RowCacheLookup, "2");

        assert_eq!(deriver.row_key(&identifier), row_before);
        assert_ne!(deriver.lookup_key(&user_type(), &criteria), lookup_before);
    }
}
