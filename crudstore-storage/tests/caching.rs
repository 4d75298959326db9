//! Coordinator behavior observed from the outside: how often the backend is
//! reached, and that storage failures surface unchanged.

use std::sync::Arc;

use crudstore_storage::{collect_records, Cache, CachingStorage, MemoryStorage, NoopCache, Storage};
use crudstore_test_utils::assertions::{assert_backend_error, assert_not_found, assert_same_record};
use crudstore_test_utils::generators::{arb_data, arb_record, arb_timestamp, arb_user_id};
use crudstore_test_utils::{fixtures, CountingStorage, FailingStorage};
use proptest::prelude::*;

fn counted_lru() -> (
    CachingStorage<CountingStorage<MemoryStorage>, crudstore_storage::LruCache>,
    Arc<CountingStorage<MemoryStorage>>,
) {
    let backend = Arc::new(CountingStorage::new(MemoryStorage::new()));
    let cache = Arc::new(crudstore_storage::LruCache::new(
        std::num::NonZeroUsize::new(64).unwrap(),
    ));
    (CachingStorage::new(Arc::clone(&backend), cache), backend)
}

#[tokio::test]
async fn repeated_reads_hit_the_cache() {
    let (storage, backend) = counted_lru();
    let created = storage.create("u1", "hello").await.unwrap();

    for _ in 0..5 {
        assert_eq!(storage.read("u1", &created.post_id).await.unwrap(), created);
    }
    assert_eq!(backend.reads(), 0);
    assert_eq!(storage.cache().stats().hits, 5);
}

#[tokio::test]
async fn read_after_update_goes_to_storage_once() {
    let (storage, backend) = counted_lru();
    let created = storage.create("u1", "hello").await.unwrap();
    storage.update("u1", &created.post_id, "world").await.unwrap();

    assert_eq!(storage.read("u1", &created.post_id).await.unwrap().data, "world");
    assert_eq!(storage.read("u1", &created.post_id).await.unwrap().data, "world");
    assert_eq!(backend.reads(), 1);
}

#[tokio::test]
async fn missing_records_always_reach_storage() {
    let (storage, backend) = counted_lru();
    for _ in 0..3 {
        assert_not_found(&storage.read("u1", "ghost").await);
    }
    assert_eq!(backend.reads(), 3);
}

#[tokio::test]
async fn read_all_always_reaches_storage() {
    let (storage, backend) = counted_lru();
    storage.create("u1", "a").await.unwrap();

    for _ in 0..2 {
        let records = collect_records(storage.read_all("u1").await.unwrap())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }
    assert_eq!(backend.reads(), 2);
}

#[tokio::test]
async fn storage_failures_surface_unchanged() {
    let storage = CachingStorage::new(Arc::new(FailingStorage), Arc::new(NoopCache));

    assert_backend_error(&storage.create("u1", "x").await);
    assert_backend_error(&storage.read("u1", "p").await);
    assert_backend_error(&storage.update("u1", "p", "x").await);
    assert_backend_error(&storage.delete("u1", "p").await);
    assert!(storage.read_all("u1").await.is_err());
}

#[tokio::test]
async fn example_scenario_through_cache() {
    let storage = fixtures::cached_memory_storage(16);
    let p = storage.create("u1", "hello").await.unwrap().post_id;

    assert_eq!(storage.read("u1", &p).await.unwrap().data, "hello");
    storage.update("u1", &p, "world").await.unwrap();
    assert_eq!(storage.read("u1", &p).await.unwrap().data, "world");
    storage.delete("u1", &p).await.unwrap();
    assert_not_found(&storage.read("u1", &p).await);
    storage.delete("u1", &p).await.unwrap();
}

#[tokio::test]
async fn noop_cache_never_returns_added_record() {
    let cache = NoopCache;
    let record = fixtures::sample_record();

    cache.add(&record.user_id, &record.post_id, &record).await;
    assert!(cache.get(&record.user_id, &record.post_id).await.is_none());
    assert_eq!(cache.stats().hits, 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A cached record comes back exactly as it went in.
    #[test]
    fn prop_lru_cache_returns_added_record(record in arb_record()) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let cache = crudstore_storage::LruCache::new(std::num::NonZeroUsize::new(4).unwrap());
        let cached = runtime.block_on(async {
            cache.add(&record.user_id, &record.post_id, &record).await;
            cache.get(&record.user_id, &record.post_id).await
        });

        prop_assert!(cached.is_some());
        if let Some(cached) = cached {
            assert_same_record(&cached, &record);
        }
    }

    /// `updated_at` moves strictly forward from any earlier value.
    #[test]
    fn prop_updated_at_moves_forward(previous in arb_timestamp()) {
        let next = crudstore_test_utils::next_updated_at(previous);
        prop_assert!(next > previous);
    }

    /// Round trip holds with and without a cache.
    #[test]
    fn prop_round_trip(user in arb_user_id(), data in arb_data()) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (cached, uncached) = runtime.block_on(async {
            let cached = fixtures::cached_memory_storage(4);
            let uncached = fixtures::uncached_memory_storage();

            let a = cached.create(&user, &data).await.unwrap();
            let b = uncached.create(&user, &data).await.unwrap();
            (
                cached.read(&user, &a.post_id).await.unwrap(),
                uncached.read(&user, &b.post_id).await.unwrap(),
            )
        });

        prop_assert_eq!(&cached.data, &data);
        prop_assert_eq!(&uncached.data, &data);
        prop_assert!(cached.created_at <= cached.updated_at);
    }
}
