//! crudstore Test Utilities
//!
//! Shared test infrastructure for the crudstore workspace:
//! - Proptest generators for records and inputs
//! - Fixtures for common scenarios
//! - A conformance suite every `Storage` backend must pass
//! - Test doubles (failing and counting storages, a broken cache)
//! - Custom assertions for storage results

pub use crudstore_core::{
    cache_key, new_post_id, next_updated_at, now, CrudError, Record, StorageError, StorageResult,
    Timestamp,
};
pub use crudstore_storage::{
    collect_records, BoxRecordIterator, Cache, CacheStats, CachingStorage, MemoryStorage,
    NoopCache, RecordIterator, Storage,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for crudstore inputs.

    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;

    /// Generate a non-empty user id. User ids are opaque, so `#` is allowed.
    pub fn arb_user_id() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_#-]{1,24}"
    }

    /// Generate post data, including empty and non-ASCII payloads.
    pub fn arb_data() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[ -~]{1,64}",
            ".{1,32}",
        ]
    }

    /// Generate a microsecond-precision timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64, 0u32..1_000_000).prop_map(|(secs, micros)| {
            DateTime::from_timestamp(secs, micros * 1_000).unwrap_or_else(Utc::now)
        })
    }

    /// Generate a full record with `created_at <= updated_at`.
    pub fn arb_record() -> impl Strategy<Value = Record> {
        (arb_user_id(), arb_data(), arb_timestamp(), 0i64..86_400_000_000).prop_map(
            |(user_id, data, created_at, delta)| {
                let updated_at = created_at + Duration::microseconds(delta);
                Record::new(user_id, new_post_id(), data, created_at, updated_at)
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use std::sync::Arc;

    /// A user id unique to this call, so tests can share a live backend.
    pub fn unique_user(label: &str) -> String {
        format!("{}-{}", label, new_post_id())
    }

    /// A freshly created record that has not been stored anywhere.
    pub fn sample_record() -> Record {
        Record::create("user-1", "sample post")
    }

    /// Memory storage wrapped in a caching coordinator with an LRU cache.
    pub fn cached_memory_storage(
        capacity: usize,
    ) -> CachingStorage<MemoryStorage, crudstore_storage::LruCache> {
        let capacity = std::num::NonZeroUsize::new(capacity.max(1))
            .unwrap_or(std::num::NonZeroUsize::MIN);
        CachingStorage::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(crudstore_storage::LruCache::new(capacity)),
        )
    }

    /// Memory storage wrapped with the no-op cache.
    pub fn uncached_memory_storage() -> CachingStorage<MemoryStorage, NoopCache> {
        CachingStorage::new(Arc::new(MemoryStorage::new()), Arc::new(NoopCache))
    }
}

// ============================================================================
// CONFORMANCE SUITE
// ============================================================================

pub mod conformance {
    //! Behavioral checks every `Storage` implementation must pass.
    //!
    //! Each check uses its own user id, so the suite can run against a
    //! shared backend that already holds data.

    use super::assertions::{assert_not_found, assert_same_record};
    use super::fixtures::unique_user;
    use super::*;

    /// Run every check against `storage`.
    pub async fn run_all<S: Storage + ?Sized>(storage: &S) {
        round_trip(storage).await;
        not_found_on_miss(storage).await;
        update_semantics(storage).await;
        idempotent_delete(storage).await;
        read_all_exhaustion(storage).await;
        read_all_empty_user(storage).await;
        read_all_early_close(storage).await;
        user_isolation(storage).await;
        stores_data_verbatim(storage).await;
        opaque_user_ids(storage).await;
        example_scenario(storage).await;
    }

    /// `read(create(data).post_id).data == data`.
    pub async fn round_trip<S: Storage + ?Sized>(storage: &S) {
        let user = unique_user("round-trip");
        let created = storage.create(&user, "hello").await.unwrap();

        assert_eq!(created.user_id, user);
        assert!(!created.post_id.is_empty());
        assert_eq!(created.created_at, created.updated_at);

        let read = storage.read(&user, &created.post_id).await.unwrap();
        assert_same_record(&read, &created);
    }

    /// Never-created and deleted records are `NotFound` for read and update.
    pub async fn not_found_on_miss<S: Storage + ?Sized>(storage: &S) {
        let user = unique_user("not-found");
        assert_not_found(&storage.read(&user, "never-created").await);
        assert_not_found(&storage.update(&user, "never-created", "x").await);

        let created = storage.create(&user, "doomed").await.unwrap();
        storage.delete(&user, &created.post_id).await.unwrap();
        assert_not_found(&storage.read(&user, &created.post_id).await);
        assert_not_found(&storage.update(&user, &created.post_id, "x").await);
    }

    /// Update replaces data, preserves identity and `created_at`, and
    /// strictly advances `updated_at`.
    pub async fn update_semantics<S: Storage + ?Sized>(storage: &S) {
        let user = unique_user("update");
        let created = storage.create(&user, "v0").await.unwrap();

        let mut previous = created.clone();
        for version in 1..=3 {
            let data = format!("v{version}");
            let updated = storage
                .update(&user, &created.post_id, &data)
                .await
                .unwrap();
            assert_eq!(updated.user_id, created.user_id);
            assert_eq!(updated.post_id, created.post_id);
            assert_eq!(updated.created_at, created.created_at);
            assert_eq!(updated.data, data);
            assert!(updated.updated_at > previous.updated_at);
            assert!(updated.created_at <= updated.updated_at);

            assert_eq!(storage.read(&user, &created.post_id).await.unwrap(), updated);
            previous = updated;
        }
    }

    /// Deleting twice, or deleting something that never existed, succeeds.
    pub async fn idempotent_delete<S: Storage + ?Sized>(storage: &S) {
        let user = unique_user("delete");
        let created = storage.create(&user, "bye").await.unwrap();

        storage.delete(&user, &created.post_id).await.unwrap();
        storage.delete(&user, &created.post_id).await.unwrap();
        storage.delete(&user, "never-created").await.unwrap();
    }

    /// N records come back exactly once each, then `next` is false.
    pub async fn read_all_exhaustion<S: Storage + ?Sized>(storage: &S) {
        let user = unique_user("read-all");
        let mut expected = Vec::new();
        for i in 0..7 {
            expected.push(storage.create(&user, &format!("d{i}")).await.unwrap());
        }

        let mut iter = storage.read_all(&user).await.unwrap();
        let mut seen = Vec::new();
        while iter.next().await {
            let mut record = Record::default();
            iter.get(&mut record).unwrap();
            seen.push(record);
        }
        assert!(!iter.next().await);
        iter.close().await;

        seen.sort_by(|a, b| a.post_id.cmp(&b.post_id));
        expected.sort_by(|a, b| a.post_id.cmp(&b.post_id));
        assert_eq!(seen, expected);
    }

    /// A user with no records yields nothing, without error.
    pub async fn read_all_empty_user<S: Storage + ?Sized>(storage: &S) {
        let user = unique_user("empty");
        let mut iter = storage.read_all(&user).await.unwrap();
        assert!(!iter.next().await);
        let mut record = Record::default();
        assert_eq!(iter.get(&mut record), Err(StorageError::IteratorMisuse));
        iter.close().await;
    }

    /// Abandoning an iterator early and closing it twice is safe.
    pub async fn read_all_early_close<S: Storage + ?Sized>(storage: &S) {
        let user = unique_user("early-close");
        for i in 0..3 {
            storage.create(&user, &format!("d{i}")).await.unwrap();
        }

        let mut iter = storage.read_all(&user).await.unwrap();
        assert!(iter.next().await);
        iter.close().await;
        iter.close().await;
        assert!(!iter.next().await);

        // A fresh call starts over.
        let records = collect_records(storage.read_all(&user).await.unwrap())
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
    }

    /// Records of one user are invisible to another.
    pub async fn user_isolation<S: Storage + ?Sized>(storage: &S) {
        let alice = unique_user("alice");
        let bob = unique_user("bob");
        let post = storage.create(&alice, "private").await.unwrap();
        storage.create(&bob, "other").await.unwrap();

        assert_not_found(&storage.read(&bob, &post.post_id).await);
        assert_not_found(&storage.update(&bob, &post.post_id, "x").await);
        storage.delete(&bob, &post.post_id).await.unwrap();
        assert_eq!(storage.read(&alice, &post.post_id).await.unwrap(), post);

        let bobs = collect_records(storage.read_all(&bob).await.unwrap())
            .await
            .unwrap();
        assert_eq!(bobs.len(), 1);
        assert!(bobs.iter().all(|r| r.user_id == bob));
    }

    /// Empty, large and non-ASCII payloads are stored as given.
    pub async fn stores_data_verbatim<S: Storage + ?Sized>(storage: &S) {
        let user = unique_user("verbatim");
        let large = "x".repeat(64 * 1024);
        for data in ["", "ünïcödé ✓ \"quoted\" #hash", large.as_str()] {
            let created = storage.create(&user, data).await.unwrap();
            let read = storage.read(&user, &created.post_id).await.unwrap();
            assert_eq!(read.data, data);
        }
    }

    /// Long user ids and ids containing the cache key separator are stored
    /// like any other, and `user#x` + `P` never answers for `user` + `x#P`.
    pub async fn opaque_user_ids<S: Storage + ?Sized>(storage: &S) {
        let long = format!("{}{}", unique_user("long"), "u".repeat(600));
        let created = storage.create(&long, "long").await.unwrap();
        assert_same_record(&storage.read(&long, &created.post_id).await.unwrap(), &created);
        let all = collect_records(storage.read_all(&long).await.unwrap())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);

        let base = unique_user("hash");
        let owner = format!("{base}#x");
        let created = storage.create(&owner, "secret").await.unwrap();
        assert_same_record(&storage.read(&owner, &created.post_id).await.unwrap(), &created);
        assert_not_found(&storage.read(&base, &format!("x#{}", created.post_id)).await);
        assert_same_record(&storage.read(&owner, &created.post_id).await.unwrap(), &created);
    }

    /// Create, read, update, read, delete, read, delete.
    pub async fn example_scenario<S: Storage + ?Sized>(storage: &S) {
        let user = unique_user("u1");
        let p = storage.create(&user, "hello").await.unwrap().post_id;
        assert_eq!(storage.read(&user, &p).await.unwrap().data, "hello");
        storage.update(&user, &p, "world").await.unwrap();
        assert_eq!(storage.read(&user, &p).await.unwrap().data, "world");
        storage.delete(&user, &p).await.unwrap();
        assert_not_found(&storage.read(&user, &p).await);
        storage.delete(&user, &p).await.unwrap();
    }
}

// ============================================================================
// TEST DOUBLES
// ============================================================================

/// Storage where every operation fails with a backend error.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStorage;

impl FailingStorage {
    fn error() -> StorageError {
        StorageError::backend("failing", "backend unavailable")
    }
}

#[async_trait]
impl Storage for FailingStorage {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn create(&self, _user_id: &str, _data: &str) -> StorageResult<Record> {
        Err(Self::error())
    }

    async fn read(&self, _user_id: &str, _post_id: &str) -> StorageResult<Record> {
        Err(Self::error())
    }

    async fn read_all(&self, _user_id: &str) -> StorageResult<BoxRecordIterator> {
        Err(Self::error())
    }

    async fn update(&self, _user_id: &str, _post_id: &str, _data: &str) -> StorageResult<Record> {
        Err(Self::error())
    }

    async fn delete(&self, _user_id: &str, _post_id: &str) -> StorageResult<()> {
        Err(Self::error())
    }
}

/// Counts calls that reach the wrapped storage.
#[derive(Debug, Default)]
pub struct CountingStorage<S> {
    inner: S,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl<S: Storage> CountingStorage<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of `read` and `read_all` calls.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `create`, `update` and `delete` calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: Storage> Storage for CountingStorage<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn create(&self, user_id: &str, data: &str) -> StorageResult<Record> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.create(user_id, data).await
    }

    async fn read(&self, user_id: &str, post_id: &str) -> StorageResult<Record> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(user_id, post_id).await
    }

    async fn read_all(&self, user_id: &str) -> StorageResult<BoxRecordIterator> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_all(user_id).await
    }

    async fn update(&self, user_id: &str, post_id: &str, data: &str) -> StorageResult<Record> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update(user_id, post_id, data).await
    }

    async fn delete(&self, user_id: &str, post_id: &str) -> StorageResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(user_id, post_id).await
    }
}

/// Cache whose backing service is permanently down: accepts every call and
/// never returns anything, but counts how often it was asked.
#[derive(Debug, Default)]
pub struct UnreachableCache {
    calls: AtomicUsize,
}

impl UnreachableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Cache for UnreachableCache {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    async fn get(&self, _user_id: &str, _post_id: &str) -> Option<Record> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        None
    }

    async fn add(&self, _user_id: &str, _post_id: &str, _record: &Record) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn remove(&self, _user_id: &str, _post_id: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            misses: self.calls() as u64,
            ..Default::default()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for storage results.

    use super::*;

    /// Assert that a StorageResult is a NotFound error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &StorageResult<T>) {
        match result {
            Err(StorageError::NotFound { .. }) => {}
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    /// Assert that a StorageResult is a backend failure.
    #[track_caller]
    pub fn assert_backend_error<T: std::fmt::Debug>(result: &StorageResult<T>) {
        match result {
            Err(StorageError::Backend { .. }) => {}
            other => panic!("Expected Backend error, got: {:?}", other),
        }
    }

    /// Assert that two records are the same post with the same contents.
    #[track_caller]
    pub fn assert_same_record(actual: &Record, expected: &Record) {
        assert_eq!(actual.user_id, expected.user_id, "user_id differs");
        assert_eq!(actual.post_id, expected.post_id, "post_id differs");
        assert_eq!(actual.data, expected.data, "data differs");
        assert_eq!(actual.created_at, expected.created_at, "created_at differs");
        assert_eq!(actual.updated_at, expected.updated_at, "updated_at differs");
    }
}
