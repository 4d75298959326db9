//! Read-through, write-invalidate coordinator.
//!
//! `CachingStorage` wraps one [`Storage`] and one [`Cache`] and is itself a
//! `Storage`, so callers cannot tell it apart from a bare backend:
//!
//! - `create`: storage first, then the new record is added to the cache
//! - `read`: cache first; on a miss, storage, then the result is cached.
//!   `NotFound` is never cached
//! - `read_all`: always storage, the cache only holds single records
//! - `update`: storage first, then the entry is removed on success
//! - `delete`: storage first, then the entry is removed whatever the outcome
//!
//! Storage errors propagate unchanged. The cache contract is infallible, so
//! cache trouble can only ever show up as a miss.
//!
//! No locks are held here. A concurrent `read` can briefly observe an entry
//! that an in-flight `update` is about to remove.

use std::sync::Arc;

use async_trait::async_trait;
use crudstore_core::{Record, StorageResult};
use tracing::{debug, instrument};

use crate::cache::Cache;
use crate::{BoxRecordIterator, Storage};

/// Storage decorated with a best-effort record cache.
pub struct CachingStorage<S: ?Sized, C: ?Sized> {
    storage: Arc<S>,
    cache: Arc<C>,
}

impl<S: Storage + ?Sized, C: Cache + ?Sized> CachingStorage<S, C> {
    pub fn new(storage: Arc<S>, cache: Arc<C>) -> Self {
        Self { storage, cache }
    }

    /// The wrapped backend.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// The wrapped cache.
    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }
}

impl<S: ?Sized, C: ?Sized> Clone for CachingStorage<S, C> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<S: Storage + ?Sized, C: Cache + ?Sized> std::fmt::Debug for CachingStorage<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingStorage")
            .field("storage", &self.storage.name())
            .field("cache", &self.cache.name())
            .finish()
    }
}

#[async_trait]
impl<S: Storage + ?Sized, C: Cache + ?Sized> Storage for CachingStorage<S, C> {
    fn name(&self) -> &'static str {
        self.storage.name()
    }

    #[instrument(skip(self, data), fields(storage = self.storage.name(), cache = self.cache.name()))]
    async fn create(&self, user_id: &str, data: &str) -> StorageResult<Record> {
        let record = self.storage.create(user_id, data).await?;
        self.cache.add(user_id, &record.post_id, &record).await;
        Ok(record)
    }

    #[instrument(skip(self), fields(storage = self.storage.name(), cache = self.cache.name()))]
    async fn read(&self, user_id: &str, post_id: &str) -> StorageResult<Record> {
        // Distinct id pairs can share a cache key (`a#b` + `c` vs `a` + `b#c`),
        // so a hit only counts when the record belongs to the caller.
        match self.cache.get(user_id, post_id).await {
            Some(record) if record.user_id == user_id && record.post_id == post_id => {
                debug!("cache hit");
                return Ok(record);
            }
            Some(_) => debug!("cache entry owned by another record, treating as miss"),
            None => debug!("cache miss"),
        }

        let record = self.storage.read(user_id, post_id).await?;
        self.cache.add(user_id, post_id, &record).await;
        Ok(record)
    }

    #[instrument(skip(self), fields(storage = self.storage.name()))]
    async fn read_all(&self, user_id: &str) -> StorageResult<BoxRecordIterator> {
        self.storage.read_all(user_id).await
    }

    #[instrument(skip(self, data), fields(storage = self.storage.name(), cache = self.cache.name()))]
    async fn update(&self, user_id: &str, post_id: &str, data: &str) -> StorageResult<Record> {
        let record = self.storage.update(user_id, post_id, data).await?;
        self.cache.remove(user_id, post_id).await;
        Ok(record)
    }

    #[instrument(skip(self), fields(storage = self.storage.name(), cache = self.cache.name()))]
    async fn delete(&self, user_id: &str, post_id: &str) -> StorageResult<()> {
        let result = self.storage.delete(user_id, post_id).await;
        self.cache.remove(user_id, post_id).await;
        result
    }
}

// ============================================================================
// TESTS
// ============================================================================
