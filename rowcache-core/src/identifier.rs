//! Canonical identifiers for persistent entities.
//!
//! An identifier is the text `namespace.kind.key`, e.g. `auth.user.1`. It is
//! independent of any cache state and is the only thing a lazy reference needs
//! to survive serialization.
//!
//! # Known limitation
//!
//! The key segment may not contain dots. A key such as `a.b` renders to
//! `shop.sku.a.b`, which [`Identifier::parse`] rejects. Keys with other
//! characters outside `[A-Za-z0-9_]` (hyphenated UUIDs for instance) render
//! fine but do not parse back either.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IdentityError;
use crate::model::{Model, ModelType};

/// Key text used when an entity has no primary key.
pub const NULL_KEY: &str = "None";

static IDENTIFIER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+\.[A-Za-z0-9_]+\.[A-Za-z0-9_]+$")
        .expect("identifier pattern is a valid regex")
});

/// Canonical `namespace.kind.key` identifier.
///
/// # Invariants
/// - Immutable once produced.
/// - Two different entities never share one; the same entity always renders the same text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Validate a string already in identifier form.
    pub fn parse(value: &str) -> Result<Self, IdentityError> {
        if IDENTIFIER_PATTERN.is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(IdentityError::InvalidIdentifier {
                value: value.to_string(),
            })
        }
    }

    /// Render the canonical form for a type and key. Whitespace in the key is removed.
    pub fn render(model_type: &ModelType, key: impl fmt::Display) -> Self {
        let key: String = key
            .to_string()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        Self(format!("{}.{}", model_type, key))
    }

    /// The identifier of an entity that has no key, e.g. an unmatched lookup.
    pub fn null(model_type: &ModelType) -> Self {
        Self::render(model_type, NULL_KEY)
    }

    /// The identifier of an entity instance.
    pub fn for_model<M: Model>(model: &M) -> Self {
        match model.primary_key() {
            Some(key) => Self::render(&M::model_type(), key),
            None => Self::null(&M::model_type()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The `namespace.kind` segment.
    pub fn type_name(&self) -> &str {
        match self.split() {
            Some((namespace, kind, _)) => &self.0[..namespace.len() + 1 + kind.len()],
            None => &self.0,
        }
    }

    /// The model type this identifier names.
    pub fn model_type(&self) -> Option<ModelType> {
        self.split()
            .map(|(namespace, kind, _)| ModelType::new(namespace, kind))
    }

    /// The raw key segment, `None` included.
    pub fn key_text(&self) -> &str {
        self.split().map(|(_, _, key)| key).unwrap_or_default()
    }

    /// The key segment, or `None` for the null key.
    pub fn key(&self) -> Option<&str> {
        match self.key_text() {
            "" | NULL_KEY => None,
            key => Some(key),
        }
    }

    pub fn is_null(&self) -> bool {
        self.key().is_none()
    }

    /// Whether this identifier names an entity of the given type.
    pub fn is_type(&self, model_type: &ModelType) -> bool {
        self.split().is_some_and(|(namespace, kind, _)| {
            namespace == model_type.namespace() && kind == model_type.kind()
        })
    }

    // Splits at the first two dots; anything after belongs to the key.
    fn split(&self) -> Option<(&str, &str, &str)> {
        let mut parts = self.0.splitn(3, '.');
        let namespace = parts.next()?;
        let kind = parts.next()?;
        let key = parts.next()?;
        Some((namespace, kind, key))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Identifier {
    type Error = IdentityError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_type() -> ModelType {
        ModelType::new("auth", "user")
    }

    #[test]
    fn test_render_user_identifier() {
        let identifier = Identifier::render(&user_type(), 7);
        assert_eq!(identifier.as_str(), "auth.user.7");
        assert_eq!(identifier.type_name(), "auth.user");
        assert_eq!(identifier.key(), Some("7"));
        assert_eq!(identifier.model_type(), Some(user_type()));
    }

    #[test]
    fn test_render_strips_whitespace() {
        let identifier = Identifier::render(&user_type(), " 12 3\t");
        assert_eq!(identifier.as_str(), "auth.user.123");
    }

    #[test]
    fn test_parse_valid() {
        let identifier = Identifier::parse("gallery.photo_gallery.42").expect("valid identifier");
        assert_eq!(identifier.to_string(), "gallery.photo_gallery.42");
        assert!(identifier.is_type(&ModelType::new("gallery", "photo_gallery")));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for value in ["auth.user", "auth..1", "auth.user.1.2", "auth user.x.1", "", "auth.user.a-b"] {
            let err = Identifier::parse(value).expect_err("should be rejected");
            assert_eq!(
                err,
                IdentityError::InvalidIdentifier {
                    value: value.to_string()
                }
            );
        }
    }

    #[test]
    fn test_null_key() {
        let identifier = Identifier::null(&user_type());
        assert_eq!(identifier.as_str(), "auth.user.None");
        assert!(identifier.is_null());
        assert_eq!(identifier.key(), None);
        assert_eq!(identifier.key_text(), NULL_KEY);
        // The null form is still a parseable identifier.
        assert_eq!(Identifier::parse("auth.user.None"), Ok(identifier));
    }

    #[test]
    fn test_dotted_key_does_not_parse_back() {
        let identifier = Identifier::render(&ModelType::new("shop", "sku"), "a.b");
        assert_eq!(identifier.as_str(), "shop.sku.a.b");
        assert_eq!(identifier.key(), Some("a.b"));
        assert!(Identifier::parse(identifier.as_str()).is_err());
    }

    #[test]
    fn test_serde_is_plain_string() {
        let identifier = Identifier::render(&user_type(), 5);
        let json = serde_json::to_string(&identifier).expect("serialize");
        assert_eq!(json, "\"auth.user.5\"");
        let back: Identifier = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, identifier);
        assert!(serde_json::from_str::<Identifier>("\"nope\"").is_err());
    }
}
