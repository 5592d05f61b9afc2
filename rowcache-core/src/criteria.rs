//! Lookup criteria and their canonical signature.
//!
//! Criteria are field/value filters such as `slug = "holiday"`. The lookup
//! cache keys them by a content hash that is independent of argument order,
//! of nested mapping order, and of whether a scalar was given as a number or
//! as text.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Field names that address the primary key directly.
pub const PRIMARY_KEY_FIELDS: [&str; 4] = ["id", "id__exact", "pk", "pk__exact"];

/// A set of field filters identifying (at most) one row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Criteria(BTreeMap<String, Value>);

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter, builder style.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Combine ambient filters with these criteria. Fields in `self` win.
    pub fn merged_over(&self, scope: &Criteria) -> Criteria {
        let mut merged = scope.0.clone();
        merged.extend(self.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Criteria(merged)
    }

    /// The primary key if any field addresses it.
    pub fn primary_key(&self) -> Option<String> {
        PRIMARY_KEY_FIELDS
            .iter()
            .find_map(|field| self.0.get(*field))
            .map(scalar_text)
    }

    /// The primary key when the criteria are exactly one primary-key equality.
    pub fn single_primary_key(&self) -> Option<String> {
        if self.0.len() == 1 {
            self.primary_key()
        } else {
            None
        }
    }

    /// Canonical, order-independent form of the criteria.
    pub fn normalized(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|(field, value)| Value::Array(vec![Value::String(field.clone()), normalize(value)]))
                .collect(),
        )
    }

    /// SHA-256 of the normalized form, as lowercase hex.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.normalized().to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", field, value)?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Criteria {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Criteria(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Reduce a value to its canonical form.
///
/// Scalars become text, sequences are normalized element-wise, and mappings
/// become sequences of `[key, value]` pairs sorted by key.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => Value::String(scalar_text(value)),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => {
            let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));
            Value::Array(
                pairs
                    .into_iter()
                    .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), normalize(v)]))
                    .collect(),
            )
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_order_independent() {
        let a = Criteria::new().with("slug", "holiday").with("owner", 3);
        let b = Criteria::new().with("owner", 3).with("slug", "holiday");
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_hash_treats_numbers_as_text() {
        let a = Criteria::new().with("owner", 3);
        let b = Criteria::new().with("owner", "3");
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_hash_normalizes_nested_mappings() {
        let a = Criteria::new().with("tags", json!({"b": [1, {"y": 2, "x": 1}], "a": "z"}));
        let b = Criteria::new().with("tags", json!({"a": "z", "b": ["1", {"x": "1", "y": 2}]}));
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_hash_distinguishes_values() {
        let a = Criteria::new().with("slug", "holiday");
        let b = Criteria::new().with("slug", "birthday");
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn test_primary_key_detection() {
        let criteria = Criteria::new().with("pk", 9).with("slug", "x");
        assert_eq!(criteria.primary_key(), Some("9".to_string()));
        assert_eq!(criteria.single_primary_key(), None);

        let only_pk = Criteria::new().with("id__exact", "12");
        assert_eq!(only_pk.single_primary_key(), Some("12".to_string()));

        let no_pk = Criteria::new().with("slug", "x");
        assert_eq!(no_pk.primary_key(), None);
    }

    #[test]
    fn test_merged_over_scope() {
        let scope = Criteria::new().with("owner", 1).with("slug", "scope");
        let criteria = Criteria::new().with("slug", "mine");
        let merged = criteria.merged_over(&scope);
        assert_eq!(merged.get("owner"), Some(&json!(1)));
        assert_eq!(merged.get("slug"), Some(&json!("mine")));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_display() {
        let criteria = Criteria::new().with("slug", "x").with("owner", 2);
        assert_eq!(criteria.to_string(), "owner=2, slug=\"x\"");
    }
}
