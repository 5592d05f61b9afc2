//! Row Cache Protocol Tests
//!
//! End-to-end checks of identity, lazy references, invalidation and the
//! two-level lookup over a call-counting transport and mock loaders.

use std::sync::Arc;

use proptest::prelude::*;
use rowcache_core::{
    CacheConfig, Criteria, Identifier, KeyPurpose, KeyVersions, Model, RowCacheError,
};
use rowcache_storage::{
    CacheTransport, LazyRef, ModelSource, ReferenceState, ReferenceTable, RowCacheResolver,
};
use rowcache_test_utils::assertions::{
    assert_cache_not_found, assert_identity_error, assert_storage_fault,
};
use rowcache_test_utils::fixtures::{
    counting_cache, counting_cache_with, gallery, register_rows, user, users, PhotoGallery, User,
};
use rowcache_test_utils::generators::{arb_criteria, arb_key, arb_model_type};
use rowcache_test_utils::init_test_tracing;

// ============================================================================
// IDENTITY AND KEYS
// ============================================================================

#[test]
fn test_user_identity_and_versioned_row_key() {
    init_test_tracing();
    let config = CacheConfig::new().with_versions(KeyVersions {
        row_cache: "v1".to_string(),
        ..KeyVersions::default()
    });
    let (cache, _) = counting_cache_with(&config);

    let identifier = cache
        .identify::<User>(&ModelSource::Key("7".to_string()))
        .expect("identify");
    assert_eq!(identifier.as_str(), "auth.user.7");
    assert_eq!(cache.row_key(&identifier).as_str(), "RowCache:v1:auth.user.7");

    cache.keys().set_version(KeyPurpose::RowCache, "v2");
    assert_eq!(cache.row_key(&identifier).as_str(), "RowCache:v2:auth.user.7");
    assert_eq!(identifier.as_str(), "auth.user.7");
}

#[test]
fn test_version_bump_forces_reload() {
    let (cache, _) = counting_cache();
    let loader = register_rows(&cache, users([1]));
    let identifier = Identifier::parse("auth.user.1").expect("valid");

    cache.load_row::<User>(&identifier).expect("load");
    cache.load_row::<User>(&identifier).expect("load");
    assert_eq!(loader.load_calls(), 1);

    cache.keys().set_version(KeyPurpose::RowCache, "2");
    cache.load_row::<User>(&identifier).expect("load");
    assert_eq!(loader.load_calls(), 2);
}

#[test]
fn test_lookup_signature_ignores_argument_order() {
    let (cache, _) = counting_cache();
    let a = Criteria::new().with("slug", "holiday").with("owner_id", 3);
    let b = Criteria::new().with("owner_id", "3").with("slug", "holiday");
    let model_type = PhotoGallery::model_type();
    assert_eq!(cache.lookup_key(&model_type, &a), cache.lookup_key(&model_type, &b));
}

// ============================================================================
// VALUE CODEC
// ============================================================================

#[test]
fn test_codec_null_and_raise() {
    let (cache, _) = counting_cache();
    let codec = cache.codec();

    codec.set::<User>("k", None, None).expect("set");
    let got = codec
        .get("k", rowcache_storage::Fallback::Value(Some(user(1))))
        .expect("get");
    assert_eq!(got, None);

    assert_cache_not_found(&codec.require::<User>("never-set"), "never-set");
}

// ============================================================================
// LAZY REFERENCES
// ============================================================================

#[test]
fn test_lazy_reference_resolves_once() {
    let (cache, transport) = counting_cache();
    let loader = register_rows(&cache, users([1, 2]));

    let reference = LazyRef::<User>::with_key(2);
    let first = reference.resolve(&cache).expect("resolve").cloned();
    let reads = transport.reads();
    let second = reference.resolve(&cache).expect("resolve").cloned();

    assert_eq!(first, Some(user(2)));
    assert_eq!(first, second);
    assert_eq!(transport.reads(), reads);
    assert_eq!(loader.load_calls(), 1);
}

#[test]
fn test_invalidate_then_one_reload() {
    let (cache, transport) = counting_cache();
    let loader = register_rows(&cache, users([7]));
    let identifier = Identifier::parse("auth.user.7").expect("valid");

    assert!(LazyRef::<User>::with_key(7)
        .is_present(&cache)
        .expect("resolve"));
    assert_eq!(loader.load_calls(), 1);

    let before = transport.calls();
    assert!(cache.invalidate_model(&user(7)).expect("invalidate"));
    let after = transport.calls();
    assert_eq!(after.delete - before.delete, 1);
    assert!(!transport
        .inner()
        .contains_key(cache.row_key(&identifier).as_str()));

    let writes_before = transport.calls().entries_written;
    let reference = LazyRef::<User>::from_identifier("auth.user.7");
    assert_eq!(reference.resolve(&cache).expect("resolve"), Some(&user(7)));
    assert_eq!(loader.load_calls(), 2);
    assert_eq!(transport.calls().entries_written - writes_before, 1);
}

#[test]
fn test_serialized_reference_is_small_and_lazy() {
    let (cache, _) = counting_cache();
    let loader = register_rows(&cache, users([3]));

    let mut big = user(3);
    big.email = "x".repeat(10_000);
    let json = serde_json::to_string(&LazyRef::new(big)).expect("serialize");
    assert!(json.len() < 100);
    assert!(json.contains("auth.user.3"));

    let restored: LazyRef<User> = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(restored.state(), ReferenceState::Unresolved);
    assert_eq!(restored.resolve(&cache).expect("resolve"), Some(&user(3)));
    assert_eq!(loader.load_calls(), 1);
}

#[test]
fn test_lookup_reference_and_negative_cache() {
    let (cache, _) = counting_cache();
    let loader = register_rows(&cache, vec![gallery(1, "holiday", 7), gallery(2, "work", 7)]);

    let reference = LazyRef::<PhotoGallery>::lookup(Criteria::new().with("slug", "work"));
    assert_eq!(reference.primary_key_text(&cache).expect("key"), Some("2".to_string()));
    assert_eq!(loader.load_calls(), 0);

    for _ in 0..2 {
        let missing = LazyRef::<PhotoGallery>::lookup(Criteria::new().with("slug", "gone"));
        assert!(!missing.is_present(&cache).expect("resolve"));
    }
    assert_eq!(loader.find_calls(), 2);
    assert_eq!(loader.load_calls(), 0);
}

#[test]
fn test_fail_silently_policy() {
    let (cache, _) = counting_cache();
    let loader = register_rows(&cache, vec![gallery(1, "a", 7), gallery(2, "b", 7)]);

    // Ambiguous lookups are identity errors: absorbed only when silent.
    let ambiguous = Criteria::new().with("owner_id", 7);
    let silent = LazyRef::<PhotoGallery>::lookup(ambiguous.clone());
    assert_eq!(silent.resolve(&cache).expect("absorbed"), None);
    let loud = LazyRef::<PhotoGallery>::lookup(ambiguous).fail_silently(false);
    assert_identity_error(&loud.resolve(&cache).map(|g| g.cloned()));

    // Storage faults always propagate.
    loader.set_faulty(true);
    let faulted = LazyRef::<PhotoGallery>::with_key(1);
    assert_storage_fault(&faulted.resolve(&cache).map(|g| g.cloned()));
}

#[test]
fn test_unknown_type_is_absorbed_when_silent() {
    let (cache, _) = counting_cache();
    let reference = LazyRef::<User>::with_key(1);
    assert_eq!(reference.resolve(&cache).expect("absorbed"), None);

    let loud = LazyRef::<User>::with_key(1).fail_silently(false);
    assert!(matches!(
        loud.resolve(&cache).unwrap_err(),
        RowCacheError::Identity(_)
    ));
}

// ============================================================================
// REFERENCE TABLE
// ============================================================================

#[test]
fn test_reference_table_dedupes_across_sources() {
    let (cache, _) = counting_cache();
    let loader = register_rows(&cache, vec![gallery(5, "holiday", 1)]);
    let table = ReferenceTable::<PhotoGallery>::new();

    let by_key = table
        .get_or_add(LazyRef::with_key(5), &cache)
        .expect("add")
        .expect("present");
    let by_lookup = table
        .get_or_add(LazyRef::lookup(Criteria::new().with("slug", "holiday")), &cache)
        .expect("add")
        .expect("present");
    let by_instance = table
        .get_or_add(LazyRef::new(gallery(5, "holiday", 1)), &cache)
        .expect("add")
        .expect("present");

    assert!(Arc::ptr_eq(&by_key, &by_lookup));
    assert!(Arc::ptr_eq(&by_key, &by_instance));
    assert_eq!(table.len(), 1);
    assert_eq!(loader.load_calls(), 1);
}

// ============================================================================
// ROW CACHE RESOLVER
// ============================================================================

#[test]
fn test_resolver_backfills_on_miss_only() {
    let (cache, transport) = counting_cache();
    let loader = register_rows(&cache, vec![gallery(1, "holiday", 7)]);
    let resolver = RowCacheResolver::<PhotoGallery>::new(cache);
    let criteria = Criteria::new().with("slug", "holiday");

    resolver.get(&criteria).expect("get");
    let writes = transport.calls().entries_written;
    assert_eq!(writes, 2);

    resolver.get(&criteria).expect("get");
    assert_eq!(transport.calls().entries_written, writes);
    assert_eq!(loader.find_calls(), 1);
}

#[test]
fn test_resolver_shares_rows_with_lazy_refs() {
    let (cache, _) = counting_cache();
    let loader = register_rows(&cache, users([4]));
    let resolver = RowCacheResolver::<User>::new(cache.clone());

    resolver.get(&Criteria::new().with("pk", 4)).expect("get");
    let reference = LazyRef::<User>::with_key(4);
    assert!(reference.is_present(&cache).expect("resolve"));
    assert_eq!(loader.load_calls(), 0);
    assert_eq!(loader.find_calls(), 1);
}

#[test]
fn test_resolver_scope_is_part_of_the_lookup() {
    let (cache, _) = counting_cache();
    let loader = register_rows(
        &cache,
        vec![gallery(1, "holiday", 7), gallery(2, "holiday", 8)],
    );
    let owned_by_8 =
        RowCacheResolver::<PhotoGallery>::new(cache).with_scope(Criteria::new().with("owner_id", 8));

    let found = owned_by_8
        .get(&Criteria::new().with("slug", "holiday"))
        .expect("get");
    assert_eq!(found.id, 2);
    owned_by_8
        .get(&Criteria::new().with("slug", "holiday"))
        .expect("get");
    assert_eq!(loader.find_calls(), 1);
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    /// Property: identify then render round-trips, and re-parsing gives an
    /// equal identifier.
    #[test]
    fn prop_identifier_round_trip(model_type in arb_model_type(), key in arb_key()) {
        let rendered = Identifier::render(&model_type, &key);
        let parsed = Identifier::parse(rendered.as_str()).expect("rendered identifiers parse");
        prop_assert_eq!(&parsed, &rendered);
        prop_assert_eq!(parsed.key_text(), key.as_str());
        prop_assert!(parsed.is_type(&model_type));
    }

    /// Property: the lookup level is consulted once per distinct criteria.
    #[test]
    fn prop_lookup_cached_per_criteria(criteria in arb_criteria()) {
        let (cache, _) = counting_cache();
        let loader = register_rows(&cache, Vec::<User>::new());
        for _ in 0..3 {
            let identifier = cache
                .identify::<User>(&ModelSource::Lookup(criteria.clone()))
                .expect("identify");
            prop_assert!(identifier.is_null());
        }
        prop_assert_eq!(loader.find_calls(), 1);
    }
}

#[test]
fn test_lmdb_transport_backs_model_cache() {
    let dir = tempfile::TempDir::new().expect("TempDir creation should succeed");
    let transport: Arc<dyn CacheTransport> = Arc::new(
        rowcache_storage::LmdbTransport::new(dir.path(), 10).expect("open lmdb"),
    );
    let cache = rowcache_storage::ModelCache::new(transport, &CacheConfig::default());
    let loader = register_rows(&cache, users([1]));

    let identifier = Identifier::parse("auth.user.1").expect("valid");
    assert_eq!(cache.load_row::<User>(&identifier).expect("load"), Some(user(1)));
    assert_eq!(cache.load_row::<User>(&identifier).expect("load"), Some(user(1)));
    assert_eq!(loader.load_calls(), 1);
}
