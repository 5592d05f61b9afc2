//! rowcache Test Utilities
//!
//! Shared test infrastructure for the rowcache workspace:
//! - Proptest generators for identifiers, keys and criteria
//! - Model fixtures and a list-hooks fixture
//! - Call-counting mock loader and cache transport
//! - Custom assertions for rowcache error kinds

pub use rowcache_core::{
    CacheConfig, CacheError, Criteria, Identifier, IdentityError, KeyVersions, Model, ModelType,
    RowCacheError, RowCacheResult, StorageError, PRIMARY_KEY_FIELDS,
};
pub use rowcache_storage::{
    CacheStats, CacheTransport, CachedList, InMemoryTransport, LazyRef, ListItems, ModelCache,
    ModelLoader, ReferenceTable, RowCacheResolver, ValueCodec,
};

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::Value;

/// Install a fmt subscriber honouring `RUST_LOG`, once per process.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCK LOADER
// ============================================================================

/// In-memory [`ModelLoader`] that counts its calls.
///
/// `find` matches a row when every criterion equals the row's field of the
/// same name (compared as text). Primary-key fields compare against
/// [`Model::primary_key`].
pub struct MockLoader<M: Model> {
    rows: RwLock<Vec<M>>,
    load_calls: AtomicUsize,
    find_calls: AtomicUsize,
    faulty: AtomicBool,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Default for MockLoader<M> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<M: Model> MockLoader<M> {
    pub fn new(rows: Vec<M>) -> Self {
        Self {
            rows: RwLock::new(rows),
            load_calls: AtomicUsize::new(0),
            find_calls: AtomicUsize::new(0),
            faulty: AtomicBool::new(false),
            _model: PhantomData,
        }
    }

    pub fn insert(&self, row: M) {
        if let Ok(mut rows) = self.rows.write() {
            rows.retain(|r| r.primary_key() != row.primary_key());
            rows.push(row);
        }
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut rows) = self.rows.write() {
            rows.retain(|r| r.primary_key().as_deref() != Some(key));
        }
    }

    /// Make every call fail with a storage fault until switched off.
    pub fn set_faulty(&self, faulty: bool) {
        self.faulty.store(faulty, Ordering::SeqCst);
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        self.load_calls.store(0, Ordering::SeqCst);
        self.find_calls.store(0, Ordering::SeqCst);
    }

    fn fault(&self, target: String) -> RowCacheResult<()> {
        if self.faulty.load(Ordering::SeqCst) {
            return Err(StorageError::Fault {
                target,
                reason: "mock storage is down".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn row_matches<M: Model>(row: &M, criteria: &Criteria) -> bool {
    let fields = serde_json::to_value(row).unwrap_or(Value::Null);
    criteria.iter().all(|(field, expected)| {
        if PRIMARY_KEY_FIELDS.contains(&field.as_str()) {
            return row.primary_key().as_deref() == Some(text(expected).as_str());
        }
        fields
            .get(field)
            .is_some_and(|actual| text(actual) == text(expected))
    })
}

impl<M: Model> ModelLoader<M> for MockLoader<M> {
    fn load(&self, key: &str) -> RowCacheResult<Option<M>> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        self.fault(Identifier::render(&M::model_type(), key).into_string())?;
        let rows = self.rows.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(rows
            .iter()
            .find(|r| r.primary_key().as_deref() == Some(key))
            .cloned())
    }

    fn find(&self, criteria: &Criteria) -> RowCacheResult<Option<M>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.fault(criteria.to_string())?;
        let rows = self.rows.read().map_err(|_| CacheError::LockPoisoned)?;
        let mut matches = rows.iter().filter(|r| row_matches(*r, criteria));
        match (matches.next(), matches.next()) {
            (None, _) => Ok(None),
            (Some(row), None) => Ok(Some(row.clone())),
            (Some(_), Some(_)) => Err(IdentityError::AmbiguousLookup {
                model_type: M::model_type().type_name(),
                criteria: criteria.to_string(),
            }
            .into()),
        }
    }
}

// ============================================================================
// COUNTING TRANSPORT
// ============================================================================

/// Call counters recorded by [`CountingTransport`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportCalls {
    pub get: u64,
    pub get_many: u64,
    pub set: u64,
    pub set_many: u64,
    pub add: u64,
    pub delete: u64,
    /// Entries written by `set`, `set_many` and successful `add`.
    pub entries_written: u64,
}

/// Wraps an [`InMemoryTransport`] and counts every call.
#[derive(Debug, Default)]
pub struct CountingTransport {
    inner: InMemoryTransport,
    get: AtomicU64,
    get_many: AtomicU64,
    set: AtomicU64,
    set_many: AtomicU64,
    add: AtomicU64,
    delete: AtomicU64,
    entries_written: AtomicU64,
}

impl CountingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> TransportCalls {
        TransportCalls {
            get: self.get.load(Ordering::SeqCst),
            get_many: self.get_many.load(Ordering::SeqCst),
            set: self.set.load(Ordering::SeqCst),
            set_many: self.set_many.load(Ordering::SeqCst),
            add: self.add.load(Ordering::SeqCst),
            delete: self.delete.load(Ordering::SeqCst),
            entries_written: self.entries_written.load(Ordering::SeqCst),
        }
    }

    /// Total read calls, single and bulk.
    pub fn reads(&self) -> u64 {
        self.get.load(Ordering::SeqCst) + self.get_many.load(Ordering::SeqCst)
    }

    /// The wrapped transport, for inspection and eviction without counting.
    pub fn inner(&self) -> &InMemoryTransport {
        &self.inner
    }

    /// Drop an entry as if the cache server had evicted it.
    pub fn evict(&self, key: &str) -> bool {
        self.inner.delete(key).unwrap_or(false)
    }
}

impl CacheTransport for CountingTransport {
    fn add(&self, key: &str, value: Vec<u8>, timeout: Option<Duration>) -> RowCacheResult<bool> {
        self.add.fetch_add(1, Ordering::SeqCst);
        let stored = self.inner.add(key, value, timeout)?;
        if stored {
            self.entries_written.fetch_add(1, Ordering::SeqCst);
        }
        Ok(stored)
    }

    fn get(&self, key: &str) -> RowCacheResult<Option<Vec<u8>>> {
        self.get.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key)
    }

    fn get_many(&self, keys: &[String]) -> RowCacheResult<HashMap<String, Vec<u8>>> {
        self.get_many.fetch_add(1, Ordering::SeqCst);
        self.inner.get_many(keys)
    }

    fn set(&self, key: &str, value: Vec<u8>, timeout: Option<Duration>) -> RowCacheResult<()> {
        self.set.fetch_add(1, Ordering::SeqCst);
        self.entries_written.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, timeout)
    }

    fn set_many(
        &self,
        entries: HashMap<String, Vec<u8>>,
        timeout: Option<Duration>,
    ) -> RowCacheResult<()> {
        self.set_many.fetch_add(1, Ordering::SeqCst);
        self.entries_written
            .fetch_add(entries.len() as u64, Ordering::SeqCst);
        self.inner.set_many(entries, timeout)
    }

    fn delete(&self, key: &str) -> RowCacheResult<bool> {
        self.delete.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key)
    }

    fn stats(&self) -> RowCacheResult<CacheStats> {
        self.inner.stats()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for rowcache types.

    use super::*;
    use proptest::prelude::*;

    /// Generate an identifier segment (`[A-Za-z0-9_]+`).
    pub fn arb_segment() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_]{1,12}"
    }

    pub fn arb_model_type() -> impl Strategy<Value = ModelType> {
        (arb_segment(), arb_segment()).prop_map(|(ns, kind)| ModelType::new(ns, kind))
    }

    /// Generate a parseable primary key.
    pub fn arb_key() -> impl Strategy<Value = String> {
        prop_oneof![any::<u32>().prop_map(|n| n.to_string()), arb_segment()]
    }

    pub fn arb_identifier() -> impl Strategy<Value = Identifier> {
        (arb_model_type(), arb_key()).prop_map(|(model_type, key)| Identifier::render(&model_type, key))
    }

    /// Generate a scalar criterion value.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-z0-9 ]{0,10}".prop_map(Value::from),
        ]
    }

    /// Generate non-primary-key criteria with one to four fields.
    pub fn arb_criteria() -> impl Strategy<Value = Criteria> {
        prop::collection::btree_map("[a-z]{1,8}(__[a-z]{2,6})?", arb_scalar(), 1..5)
            .prop_filter("primary key fields skip the lookup level", |fields| {
                !fields.keys().any(|k| PRIMARY_KEY_FIELDS.contains(&k.as_str()))
            })
            .prop_map(|fields| fields.into_iter().collect())
    }

    pub fn arb_versions() -> impl Strategy<Value = KeyVersions> {
        ("[a-z0-9]{1,6}", "[a-z0-9]{1,6}").prop_map(|(row_cache, row_cache_lookup)| KeyVersions {
            row_cache,
            row_cache_lookup,
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Model and list fixtures shared by integration tests.

    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct User {
        pub id: u64,
        pub username: String,
        pub email: String,
    }

    impl Model for User {
        fn model_type() -> ModelType {
            ModelType::new("auth", "user")
        }

        fn primary_key(&self) -> Option<String> {
            Some(self.id.to_string())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PhotoGallery {
        pub id: u64,
        pub slug: String,
        pub title: String,
        pub owner_id: u64,
    }

    impl Model for PhotoGallery {
        fn model_type() -> ModelType {
            ModelType::new("gallery", "photogallery")
        }

        fn primary_key(&self) -> Option<String> {
            Some(self.id.to_string())
        }
    }

    pub fn user(id: u64) -> User {
        User {
            id,
            username: format!("user{}", id),
            email: format!("user{}@example.com", id),
        }
    }

    pub fn users(ids: impl IntoIterator<Item = u64>) -> Vec<User> {
        ids.into_iter().map(user).collect()
    }

    pub fn gallery(id: u64, slug: &str, owner_id: u64) -> PhotoGallery {
        PhotoGallery {
            id,
            slug: slug.to_string(),
            title: format!("Gallery {}", slug),
            owner_id,
        }
    }

    /// A cache over a counting transport with default configuration.
    pub fn counting_cache() -> (ModelCache, Arc<CountingTransport>) {
        counting_cache_with(&CacheConfig::default())
    }

    pub fn counting_cache_with(config: &CacheConfig) -> (ModelCache, Arc<CountingTransport>) {
        let transport = Arc::new(CountingTransport::new());
        (ModelCache::new(transport.clone(), config), transport)
    }

    /// Register a mock loader for `M` holding `rows`.
    pub fn register_rows<M: Model>(cache: &ModelCache, rows: Vec<M>) -> Arc<MockLoader<M>> {
        let loader = Arc::new(MockLoader::new(rows));
        cache
            .register::<M>(loader.clone())
            .expect("registering a mock loader should succeed");
        loader
    }

    /// [`ListItems`] for users, keyed by id, rebuilding from a [`MockLoader`].
    pub struct UserListItems {
        loader: Arc<MockLoader<User>>,
        rebuilds: Mutex<Vec<Vec<u64>>>,
    }

    impl UserListItems {
        pub fn new(loader: Arc<MockLoader<User>>) -> Self {
            Self {
                loader,
                rebuilds: Mutex::new(Vec::new()),
            }
        }

        /// Every `rebuild_items` call, with the ids it was asked for.
        pub fn rebuilds(&self) -> Vec<Vec<u64>> {
            self.rebuilds.lock().map(|r| r.clone()).unwrap_or_default()
        }
    }

    impl ListItems for UserListItems {
        type Item = User;
        type Id = u64;

        fn identify_items(&self, items: &[User]) -> Vec<u64> {
            items.iter().map(|u| u.id).collect()
        }

        fn make_cache_keys(&self, ids: &[u64]) -> Vec<String> {
            ids.iter().map(|id| format!("UserList:item:{}", id)).collect()
        }

        fn rebuild_items(&self, ids: &[u64]) -> RowCacheResult<Vec<User>> {
            if let Ok(mut rebuilds) = self.rebuilds.lock() {
                rebuilds.push(ids.to_vec());
            }
            let mut rebuilt = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(user) = self.loader.load(&id.to_string())? {
                    rebuilt.push(user);
                }
            }
            Ok(rebuilt)
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for rowcache error kinds.

    use super::*;

    /// Assert that a result is an identity error.
    #[track_caller]
    pub fn assert_identity_error<T: std::fmt::Debug>(result: &RowCacheResult<T>) {
        match result {
            Err(RowCacheError::Identity(_)) => {}
            other => panic!("Expected Identity error, got: {:?}", other),
        }
    }

    /// Assert that a result is a storage fault.
    #[track_caller]
    pub fn assert_storage_fault<T: std::fmt::Debug>(result: &RowCacheResult<T>) {
        match result {
            Err(RowCacheError::Storage(StorageError::Fault { .. })) => {}
            other => panic!("Expected storage Fault, got: {:?}", other),
        }
    }

    /// Assert that a result is the `NotFound` of a direct cache read.
    #[track_caller]
    pub fn assert_cache_not_found<T: std::fmt::Debug>(result: &RowCacheResult<T>, key: &str) {
        match result {
            Err(RowCacheError::Cache(CacheError::NotFound { key: k })) => {
                assert_eq!(k, key, "Wrong key in NotFound error");
            }
            other => panic!("Expected NotFound for {:?}, got: {:?}", key, other),
        }
    }
}
