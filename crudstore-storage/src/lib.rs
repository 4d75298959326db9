//! crudstore Storage - Storage Contract, Backends and Caching
//!
//! Defines the persistence contract every backend implements, the lazy
//! iterator used to enumerate a user's records, the cache contract, and
//! the `CachingStorage` coordinator that keeps a cache consistent with
//! whichever backend is active.

pub mod cache;
pub mod caching;
pub mod lmdb_backend;
pub mod memory;
pub mod postgres_backend;
pub mod redis_backend;

pub use cache::{Cache, CacheStats, LruCache, NoopCache, RedisCache, RedisCacheConfig};
pub use caching::CachingStorage;
pub use lmdb_backend::{LmdbError, LmdbStorage};
pub use memory::MemoryStorage;
pub use postgres_backend::{PostgresStorage, POST_TABLE_SCHEMA};
pub use redis_backend::RedisStorage;

use async_trait::async_trait;
use crudstore_core::{Record, StorageError, StorageResult};
use std::sync::Arc;

// ============================================================================
// RECORD ITERATOR
// ============================================================================

/// Lazy, forward-only, single-pass sequence of records.
///
/// Call `next` to advance, then `get` to decode the current element into
/// caller-owned storage. The sequence is finite and cannot be restarted;
/// call `Storage::read_all` again to iterate a second time.
///
/// `close` releases backend resources (cursors, pooled connections). It is
/// safe to call after exhaustion, after early abandonment, and more than
/// once. Dropping an iterator without closing it also releases everything
/// it holds, but explicit `close` is the contract.
#[async_trait]
pub trait RecordIterator: Send {
    /// Advance to the next element. Returns false once the sequence is
    /// exhausted or the iterator is closed.
    ///
    /// A streaming backend that fails while fetching reports `true` here
    /// and surfaces the failure from the following `get`.
    async fn next(&mut self) -> bool;

    /// Decode the element reached by the last successful `next`.
    ///
    /// Errors only on decode/transport failure, or with
    /// `StorageError::IteratorMisuse` when there is no current element.
    fn get(&mut self, dest: &mut Record) -> StorageResult<()>;

    /// Release backend resources.
    async fn close(&mut self);
}

/// Boxed iterator returned by `Storage::read_all`.
pub type BoxRecordIterator = Box<dyn RecordIterator>;

/// Iterator over an already-materialized snapshot of records.
#[derive(Debug, Default)]
pub struct VecRecordIterator {
    pending: std::vec::IntoIter<Record>,
    current: Option<Record>,
    closed: bool,
}

impl VecRecordIterator {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            pending: records.into_iter(),
            current: None,
            closed: false,
        }
    }

    /// Number of elements not yet yielded.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl RecordIterator for VecRecordIterator {
    async fn next(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.current = self.pending.next();
        self.current.is_some()
    }

    fn get(&mut self, dest: &mut Record) -> StorageResult<()> {
        let record = self.current.take().ok_or(StorageError::IteratorMisuse)?;
        *dest = record;
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
        self.current = None;
        self.pending = Vec::new().into_iter();
    }
}

/// Drain an iterator into a `Vec`, closing it on every exit path.
pub async fn collect_records(mut iter: BoxRecordIterator) -> StorageResult<Vec<Record>> {
    let mut records = Vec::new();
    let result = drain_into(iter.as_mut(), &mut records).await;
    iter.close().await;
    result.map(|()| records)
}

async fn drain_into(iter: &mut dyn RecordIterator, out: &mut Vec<Record>) -> StorageResult<()> {
    while iter.next().await {
        let mut record = Record::default();
        iter.get(&mut record)?;
        out.push(record);
    }
    Ok(())
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Persistence contract for posts.
///
/// Every backend implements this trait independently. Implementations are
/// responsible for their own internal locking and must be safe to call
/// concurrently for different `(user_id, post_id)` keys.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short backend name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Allocate a post id, stamp `created_at == updated_at == now`, persist,
    /// and return the full record.
    async fn create(&self, user_id: &str, data: &str) -> StorageResult<Record>;

    /// Fetch one record. `StorageError::NotFound` when it does not exist.
    async fn read(&self, user_id: &str, post_id: &str) -> StorageResult<Record>;

    /// Enumerate every record owned by `user_id` in backend-defined order.
    ///
    /// A user with no records yields an empty iterator, never an error.
    async fn read_all(&self, user_id: &str) -> StorageResult<BoxRecordIterator>;

    /// Replace `data`, bump `updated_at`, preserve `created_at` and identity.
    /// `StorageError::NotFound` when the record does not exist.
    async fn update(&self, user_id: &str, post_id: &str, data: &str) -> StorageResult<Record>;

    /// Delete one record. Deleting a missing record is not an error.
    async fn delete(&self, user_id: &str, post_id: &str) -> StorageResult<()>;
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn create(&self, user_id: &str, data: &str) -> StorageResult<Record> {
        (**self).create(user_id, data).await
    }

    async fn read(&self, user_id: &str, post_id: &str) -> StorageResult<Record> {
        (**self).read(user_id, post_id).await
    }

    async fn read_all(&self, user_id: &str) -> StorageResult<BoxRecordIterator> {
        (**self).read_all(user_id).await
    }

    async fn update(&self, user_id: &str, post_id: &str, data: &str) -> StorageResult<Record> {
        (**self).update(user_id, post_id, data).await
    }

    async fn delete(&self, user_id: &str, post_id: &str) -> StorageResult<()> {
        (**self).delete(user_id, post_id).await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::create("u1", format!("data-{i}")))
            .collect()
    }

    #[tokio::test]
    async fn test_vec_iterator_yields_all_then_stops() {
        let mut iter = VecRecordIterator::new(records(3));
        let mut seen = 0;
        while iter.next().await {
            let mut dest = Record::default();
            iter.get(&mut dest).unwrap();
            assert_eq!(dest.data, format!("data-{seen}"));
            seen += 1;
        }
        assert_eq!(seen, 3);
        assert!(!iter.next().await);
        iter.close().await;
    }

    #[tokio::test]
    async fn test_vec_iterator_get_without_next_is_misuse() {
        let mut iter = VecRecordIterator::new(records(1));
        let mut dest = Record::default();
        assert_eq!(iter.get(&mut dest), Err(StorageError::IteratorMisuse));

        assert!(iter.next().await);
        iter.get(&mut dest).unwrap();
        // Second get for the same element has nothing to decode.
        assert_eq!(iter.get(&mut dest), Err(StorageError::IteratorMisuse));
    }

    #[tokio::test]
    async fn test_vec_iterator_close_early_is_safe() {
        let mut iter = VecRecordIterator::new(records(5));
        assert!(iter.next().await);
        iter.close().await;
        iter.close().await;
        assert!(!iter.next().await);
        assert_eq!(iter.remaining(), 0);
    }

    #[tokio::test]
    async fn test_collect_records_empty() {
        let collected = collect_records(Box::new(VecRecordIterator::new(Vec::new())))
            .await
            .unwrap();
        assert!(collected.is_empty());
    }

    struct FailingIterator {
        advanced: bool,
        closed: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl RecordIterator for FailingIterator {
        async fn next(&mut self) -> bool {
            if self.advanced {
                return false;
            }
            self.advanced = true;
            true
        }

        fn get(&mut self, _dest: &mut Record) -> StorageResult<()> {
            Err(StorageError::decode("test", "bad bytes"))
        }

        async fn close(&mut self) {
            self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_collect_records_closes_on_error() {
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let iter = FailingIterator {
            advanced: false,
            closed: Arc::clone(&closed),
        };

        let result = collect_records(Box::new(iter)).await;
        assert!(matches!(result, Err(StorageError::Decode { .. })));
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }
}
