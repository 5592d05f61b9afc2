//! rowcache Storage - Row Cache over a Key-Value Transport
//!
//! Caches persistent entities under versioned row keys, caches the mapping
//! from lookup criteria to primary keys, and stores large ordered lists as
//! one cache entry per item. The persistent store is reached only through
//! [`ModelLoader`] implementations registered by the caller.
//!
//! # Components
//!
//! - [`cache`]: transports and the sentinel-aware [`ValueCodec`]
//! - [`ModelCache`]: identify, read-through row loads, invalidation
//! - [`LazyRef`] and [`ReferenceTable`]: deferred, deduplicated references
//! - [`CachedList`]: the externalizing list
//! - [`RowCacheResolver`]: cached get-by-criteria
//!
//! Everything is synchronous. Instances may be shared across threads.

pub mod cache;
pub mod cached_list;
pub mod lazy_ref;
pub mod model_cache;
pub mod reference_table;
pub mod registry;
pub mod row_cache;

#[cfg(test)]
mod test_support;

pub use cache::{
    CacheStats, CacheTransport, Fallback, InMemoryTransport, LmdbCacheError, LmdbTransport,
    Lookup, ValueCodec,
};
pub use cached_list::{CachedList, ListItems, PackedList};
pub use lazy_ref::{LazyRef, ReferenceState};
pub use model_cache::{ModelCache, ModelSource};
pub use reference_table::ReferenceTable;
pub use registry::{ModelLoader, TypeRegistry};
pub use row_cache::RowCacheResolver;
