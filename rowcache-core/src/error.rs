//! Error types for rowcache operations

use thiserror::Error;

/// Identity and lookup errors.
///
/// These are the only errors a fail-silently reference absorbs into an
/// absent result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Provided string {value:?} is not a valid identifier")]
    InvalidIdentifier { value: String },

    #[error("Unknown model type: {type_name}")]
    UnknownType { type_name: String },

    #[error("Identifier {identifier} does not belong to model type {expected}")]
    TypeMismatch { identifier: String, expected: String },

    #[error("Lookup on {model_type} matched more than one row: {criteria}")]
    AmbiguousLookup { model_type: String, criteria: String },

    #[error("Lookup on {model_type} matched no rows: {criteria}")]
    NotFoundLookup { model_type: String, criteria: String },

    #[error("{identifier} not found")]
    NotFound { identifier: String },
}

/// Cache transport and value codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("\"{key}\" was not found in the cache")]
    NotFound { key: String },

    #[error("Serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Cache transport failed: {reason}")]
    Transport { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Storage loader errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage fault while loading {target}: {reason}")]
    Fault { target: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all rowcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RowCacheError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl RowCacheError {
    /// Whether a fail-silently caller may turn this error into "absent".
    ///
    /// Transport and storage faults never qualify: reporting an outage as a
    /// missing row would poison the cache with false negatives.
    pub fn is_absorbable(&self) -> bool {
        matches!(self, Self::Identity(_))
    }

    /// Whether this is the `NotFound` raised by a direct cache read.
    pub fn is_cache_not_found(&self) -> bool {
        matches!(self, Self::Cache(CacheError::NotFound { .. }))
    }
}

/// Result type alias for rowcache operations.
pub type RowCacheResult<T> = Result<T, RowCacheError>;

// =============================================================================
// TESTS
// =============================================================================
