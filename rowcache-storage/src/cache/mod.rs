//! Cache transports and the value codec layered on them.
//!
//! # Layers
//!
//! - [`CacheTransport`]: raw bytes under string keys with per-entry expiry.
//!   Eviction policy belongs to the transport.
//! - [`ValueCodec`]: serde payloads with a tagged slot, so "cached as absent"
//!   and "not cached" stay distinguishable.
//!
//! # Example
//!
//! ```ignore
//! let transport = Arc::new(InMemoryTransport::new());
//! let codec = ValueCodec::new(transport, Some(Duration::from_secs(300)));
//!
//! codec.set::<User>("RowCache:1:auth.user.7", None, None)?;
//! match codec.get_or_miss::<User>("RowCache:1:auth.user.7")? {
//!     Lookup::Hit(None) => { /* known to be absent */ }
//!     Lookup::Hit(Some(user)) => { /* cached row */ }
//!     Lookup::Missed => { /* load and backfill */ }
//! }
//! ```

pub mod codec;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use codec::{Fallback, Lookup, ValueCodec};
pub use lmdb_backend::{LmdbCacheError, LmdbTransport};
pub use memory::InMemoryTransport;
pub use traits::{CacheStats, CacheTransport};
