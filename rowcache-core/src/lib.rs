//! rowcache Core - Identity and Key Types
//!
//! Pure data types shared by every other crate: the canonical identifier
//! scheme, lookup criteria, versioned cache keys, configuration and errors.
//! This crate performs no I/O.

pub mod config;
pub mod criteria;
pub mod error;
pub mod identifier;
pub mod keys;
pub mod model;

pub use config::{CacheConfig, DEFAULT_TIMEOUT_SECS};
pub use criteria::{normalize, Criteria, PRIMARY_KEY_FIELDS};
pub use error::{
    CacheError, ConfigError, IdentityError, RowCacheError, RowCacheResult, StorageError,
};
pub use identifier::{Identifier, NULL_KEY};
pub use keys::{CacheKey, KeyDeriver, KeyPurpose, KeyVersions};
pub use model::{Model, ModelType};
