//! Bounded in-process cache with least-recently-used eviction.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use crudstore_core::{cache_key, Record};
use tracing::warn;

use super::{Cache, CacheStats};

type Entries = lru::LruCache<String, Record>;

/// In-process LRU cache.
///
/// All bookkeeping happens under one mutex, which is never held across an
/// await point. A poisoned mutex is treated as a miss.
pub struct LruCache {
    entries: Mutex<Entries>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LruCache {
    /// Create a cache holding at most `capacity` records.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(lru::LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Maximum number of records held.
    pub fn capacity(&self) -> usize {
        self.lock().map(|entries| entries.cap().get()).unwrap_or(0)
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Option<MutexGuard<'_, Entries>> {
        match self.entries.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!(cache = "memory", "LRU cache mutex poisoned");
                None
            }
        }
    }
}

impl std::fmt::Debug for LruCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[async_trait]
impl Cache for LruCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, user_id: &str, post_id: &str) -> Option<Record> {
        let key = cache_key(user_id, post_id);
        let found = self.lock().and_then(|mut entries| entries.get(&key).cloned());
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    async fn add(&self, user_id: &str, post_id: &str, record: &Record) {
        let key = cache_key(user_id, post_id);
        let Some(mut entries) = self.lock() else {
            return;
        };
        if let Some((evicted, _)) = entries.push(key.clone(), record.clone()) {
            // push returns the old value when the key was already present
            if evicted != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn remove(&self, user_id: &str, post_id: &str) {
        let key = cache_key(user_id, post_id);
        if let Some(mut entries) = self.lock() {
            entries.pop(&key);
        }
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> LruCache {
        LruCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let cache = cache(4);
        let record = Record::create("u1", "hello");

        assert!(cache.get("u1", &record.post_id).await.is_none());
        cache.add("u1", &record.post_id, &record).await;
        assert_eq!(cache.get("u1", &record.post_id).await, Some(record.clone()));

        cache.remove("u1", &record.post_id).await;
        assert!(cache.get("u1", &record.post_id).await.is_none());
        // Removing an absent entry is a no-op.
        cache.remove("u1", &record.post_id).await;

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_overwrite_is_not_eviction() {
        let cache = cache(2);
        let record = Record::create("u1", "hello");
        cache.add("u1", &record.post_id, &record).await;
        let updated = record.with_data("world");
        cache.add("u1", &record.post_id, &updated).await;

        assert_eq!(cache.get("u1", &record.post_id).await, Some(updated));
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used() {
        let cache = cache(2);
        let a = Record::create("u1", "a");
        let b = Record::create("u1", "b");
        let c = Record::create("u1", "c");

        cache.add("u1", &a.post_id, &a).await;
        cache.add("u1", &b.post_id, &b).await;
        // Touch a so b becomes the eviction candidate.
        assert!(cache.get("u1", &a.post_id).await.is_some());
        cache.add("u1", &c.post_id, &c).await;

        assert!(cache.get("u1", &a.post_id).await.is_some());
        assert!(cache.get("u1", &b.post_id).await.is_none());
        assert!(cache.get("u1", &c.post_id).await.is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.capacity(), 2);
    }

    #[tokio::test]
    async fn test_keys_are_scoped_by_user() {
        let cache = cache(4);
        let record = Record::create("u1", "hello");
        cache.add("u1", &record.post_id, &record).await;
        assert!(cache.get("u2", &record.post_id).await.is_none());
    }
}
