#![forbid(unsafe_code)]

mod common;

use bx_storage::{CachePutRequest, ExecutionConfig, SqliteStore};
use common::{Fixture, START_MS};

fn put(store: &mut SqliteStore, user_id: i64, key: &str, value: String, version: Option<i64>) -> i64 {
    store
        .cache_put(CachePutRequest {
            user_id,
            key: key.to_string(),
            value,
            version,
        })
        .expect("cache put")
        .id
}

fn keys(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|n| format!("key-{n}")).collect()
}

#[test]
fn eviction_keeps_most_recent_entries_within_budget() {
    let fixture = Fixture::new();
    let mut store = fixture.open();

    for n in 0..20 {
        fixture.clock.advance_ms(1);
        put(&mut store, 1, &format!("key-{n}"), "x".repeat(1024), None);
    }
    assert_eq!(store.cache_total_bytes().expect("total"), 20 * 1024);

    let deleted = store.cache_evict(10 * 1024).expect("evict");
    assert_eq!(deleted, 10);
    assert_eq!(store.cache_total_bytes().expect("total"), 10 * 1024);

    let survivors: Vec<String> = store
        .cache_lookup(1, &keys(0..20))
        .expect("lookup")
        .into_iter()
        .map(|entry| entry.key)
        .collect();
    assert_eq!(survivors, keys(10..20));
}

#[test]
fn eviction_under_budget_deletes_nothing() {
    let fixture = Fixture::new();
    let mut store = fixture.open();
    put(&mut store, 1, "a", "x".repeat(100), None);
    put(&mut store, 1, "b", "x".repeat(100), None);

    assert_eq!(store.cache_evict(1024).expect("evict"), 0);
    assert_eq!(store.cache_lookup(1, &["a".to_string(), "b".to_string()]).expect("lookup").len(), 2);
}

#[test]
fn eviction_removes_stale_schema_versions_regardless_of_headroom() {
    let fixture = Fixture::new();
    let mut config = ExecutionConfig::default();
    config.cache_schema_version = 2;
    let mut store = fixture.open_with(config);

    put(&mut store, 1, "old", "{}".to_string(), Some(1));
    put(&mut store, 1, "current", "{}".to_string(), None);

    let deleted = store.cache_evict(i64::MAX).expect("evict");
    assert_eq!(deleted, 1);
    assert!(store.cache_entry(1, "old").expect("entry").is_none());
    assert_eq!(store.cache_entry(1, "current").expect("entry").map(|e| e.version), Some(2));
}

#[test]
fn put_refreshes_an_existing_key_in_place() {
    let fixture = Fixture::new();
    let mut store = fixture.open();

    let first = put(&mut store, 7, "step-key", "first".to_string(), None);
    fixture.clock.advance_ms(5_000);
    let second = put(&mut store, 7, "step-key", "second".to_string(), None);
    assert_eq!(first, second);

    let entry = store.cache_entry(7, "step-key").expect("entry").expect("present");
    assert_eq!(entry.value, "second");
    assert_eq!(entry.created_at_ms, START_MS + 5_000);
    assert_eq!(entry.last_used_at_ms, None);

    // The same key under another owner is a separate entry.
    let other = put(&mut store, 8, "step-key", "other".to_string(), None);
    assert_ne!(other, first);
}

#[test]
fn lookup_skips_missing_keys_and_other_schema_versions() {
    let fixture = Fixture::new();
    let mut store = fixture.open();
    put(&mut store, 1, "k1", "v1".to_string(), None);
    put(&mut store, 1, "k2", "v2".to_string(), Some(0));
    put(&mut store, 2, "k3", "v3".to_string(), None);

    let found = store
        .cache_lookup(1, &["k1".to_string(), "k2".to_string(), "k3".to_string(), "missing".to_string()])
        .expect("lookup");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key, "k1");
    assert!(store.cache_lookup(1, &[]).expect("empty lookup").is_empty());
}

#[test]
fn mark_used_moves_an_entry_to_the_back_of_the_eviction_order() {
    let fixture = Fixture::new();
    let mut store = fixture.open();
    fixture.clock.advance_ms(1);
    let a = put(&mut store, 1, "a", "x".repeat(100), None);
    fixture.clock.advance_ms(1);
    put(&mut store, 1, "b", "x".repeat(100), None);
    fixture.clock.advance_ms(1);
    put(&mut store, 1, "c", "x".repeat(100), None);

    fixture.clock.advance_ms(10);
    assert_eq!(store.cache_mark_used(&[a]).expect("mark used"), 1);

    assert_eq!(store.cache_evict(200).expect("evict"), 1);
    assert!(store.cache_entry(1, "b").expect("entry").is_none());
    assert!(store.cache_entry(1, "a").expect("entry").is_some());
    assert!(store.cache_entry(1, "c").expect("entry").is_some());
}

#[test]
fn resolve_returns_hits_and_marks_them_used() {
    let fixture = Fixture::new();
    let mut store = fixture.open();
    put(&mut store, 1, "hit", "v".to_string(), None);
    put(&mut store, 1, "untouched", "v".to_string(), None);

    fixture.clock.advance_ms(250);
    let hits = store
        .cache_resolve(1, &["hit".to_string(), "miss".to_string()])
        .expect("resolve");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].last_used_at_ms, Some(START_MS + 250));

    let stored = store.cache_entry(1, "hit").expect("entry").expect("present");
    assert_eq!(stored.last_used_at_ms, Some(START_MS + 250));
    let untouched = store.cache_entry(1, "untouched").expect("entry").expect("present");
    assert_eq!(untouched.last_used_at_ms, None);
}
