//! Record cache contract and implementations.
//!
//! A cache holds transient copies of single records keyed by
//! `user_id + "#" + post_id`. Every method is infallible from the caller's
//! point of view: implementations log and swallow their own failures so an
//! unavailable cache degrades to direct storage access.
//!
//! # Implementations
//!
//! - [`NoopCache`]: always misses, used when caching is disabled
//! - [`LruCache`]: bounded in-process cache with least-recently-used eviction
//! - [`RedisCache`]: remote cache shared between processes

mod lru_cache;
mod noop;
mod redis_cache;

pub use lru_cache::LruCache;
pub use noop::NoopCache;
pub use redis_cache::{RedisCache, RedisCacheConfig};

use async_trait::async_trait;
use crudstore_core::Record;
use std::sync::Arc;

/// Best-effort record cache.
///
/// Implementations must be thread-safe; a bounded cache serializes its own
/// eviction bookkeeping.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Short cache name used in logs.
    fn name(&self) -> &'static str;

    /// Look up a cached record. Absence is not an error.
    async fn get(&self, user_id: &str, post_id: &str) -> Option<Record>;

    /// Store or overwrite an entry. May evict another entry.
    async fn add(&self, user_id: &str, post_id: &str, record: &Record);

    /// Remove an entry if present.
    async fn remove(&self, user_id: &str, post_id: &str);

    /// Cache statistics. Counters are local to this process.
    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

#[async_trait]
impl<C: Cache + ?Sized> Cache for Arc<C> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn get(&self, user_id: &str, post_id: &str) -> Option<Record> {
        (**self).get(user_id, post_id).await
    }

    async fn add(&self, user_id: &str, post_id: &str, record: &Record) {
        (**self).add(user_id, post_id, record).await
    }

    async fn remove(&self, user_id: &str, post_id: &str) {
        (**self).remove(user_id, post_id).await
    }

    fn stats(&self) -> CacheStats {
        (**self).stats()
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache, when known.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_empty() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
