//! Configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::keys::{KeyPurpose, KeyVersions};

/// One day, the default lifetime of a cache entry.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60 * 60 * 24;

/// Cache configuration.
///
/// Loadable from TOML:
///
/// ```toml
/// default_timeout_secs = 3600
///
/// [versions]
/// row_cache = "7"
/// row_cache_lookup = "3"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime used when a caller gives none. `None` means no expiry.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: Option<u64>,
    /// Key versions per purpose.
    #[serde(default)]
    pub versions: KeyVersions,
}

fn default_timeout_secs() -> Option<u64> {
    Some(DEFAULT_TIMEOUT_SECS)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            versions: KeyVersions::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Set the default entry lifetime. `None` disables expiry.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout_secs = timeout.map(|t| t.as_secs());
        self
    }

    /// Set the key versions.
    pub fn with_versions(mut self, versions: KeyVersions) -> Self {
        self.versions = versions;
        self
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }

    /// Versions end up inside `:`-separated keys, so they must be non-empty and colon-free.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for purpose in [KeyPurpose::RowCache, KeyPurpose::RowCacheLookup] {
            let version = self.versions.get(purpose);
            let field = format!("versions.{}", field_name(purpose));
            if version.is_empty() {
                return Err(ConfigError::MissingRequired { field });
            }
            if version.contains(':') || version.chars().any(char::is_whitespace) {
                return Err(ConfigError::InvalidValue {
                    field,
                    value: version.to_string(),
                    reason: "must not contain ':' or whitespace".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn field_name(purpose: KeyPurpose) -> &'static str {
    match purpose {
        KeyPurpose::RowCache => "row_cache",
        KeyPurpose::RowCacheLookup => "row_cache_lookup",
    }
}
