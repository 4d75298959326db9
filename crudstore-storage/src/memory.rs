//! In-memory storage backend.
//!
//! Records live in a two-level map `user_id -> post_id -> Record` behind a
//! single `RwLock`. `read_all` takes a snapshot of the user's records, so
//! the returned iterator never holds the lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use crudstore_core::{Record, StorageError, StorageResult};
use tracing::instrument;

use crate::{BoxRecordIterator, Storage, VecRecordIterator};

type PostMap = HashMap<String, HashMap<String, Record>>;

/// In-memory storage, the reference backend.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    posts: Arc<RwLock<PostMap>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn read_lock(&self) -> StorageResult<RwLockReadGuard<'_, PostMap>> {
        self.posts.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write_lock(&self) -> StorageResult<RwLockWriteGuard<'_, PostMap>> {
        self.posts.write().map_err(|_| StorageError::LockPoisoned)
    }

    /// Total number of stored records across all users.
    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.read_lock()?.values().map(HashMap::len).sum())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Clear all stored data.
    pub fn clear(&self) -> StorageResult<()> {
        self.write_lock()?.clear();
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    #[instrument(skip(self, data), fields(backend = "memory"))]
    async fn create(&self, user_id: &str, data: &str) -> StorageResult<Record> {
        let record = Record::create(user_id, data);
        let mut posts = self.write_lock()?;
        posts
            .entry(user_id.to_string())
            .or_default()
            .insert(record.post_id.clone(), record.clone());
        Ok(record)
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn read(&self, user_id: &str, post_id: &str) -> StorageResult<Record> {
        let posts = self.read_lock()?;
        posts
            .get(user_id)
            .and_then(|user_posts| user_posts.get(post_id))
            .cloned()
            .ok_or_else(|| StorageError::not_found(user_id, post_id))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn read_all(&self, user_id: &str) -> StorageResult<BoxRecordIterator> {
        let posts = self.read_lock()?;
        let snapshot: Vec<Record> = posts
            .get(user_id)
            .map(|user_posts| user_posts.values().cloned().collect())
            .unwrap_or_default();
        Ok(Box::new(VecRecordIterator::new(snapshot)))
    }

    #[instrument(skip(self, data), fields(backend = "memory"))]
    async fn update(&self, user_id: &str, post_id: &str, data: &str) -> StorageResult<Record> {
        let mut posts = self.write_lock()?;
        let record = posts
            .get_mut(user_id)
            .and_then(|user_posts| user_posts.get_mut(post_id))
            .ok_or_else(|| StorageError::not_found(user_id, post_id))?;

        *record = record.with_data(data);
        Ok(record.clone())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn delete(&self, user_id: &str, post_id: &str) -> StorageResult<()> {
        let mut posts = self.write_lock()?;
        if let Some(user_posts) = posts.get_mut(user_id) {
            user_posts.remove(post_id);
            if user_posts.is_empty() {
                posts.remove(user_id);
            }
        }
        Ok(())
    }
}
