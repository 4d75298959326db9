//! Remote record cache on Redis.
//!
//! Each entry is a plain string key `{prefix}{user_id}#{post_id}` holding the
//! record as JSON, optionally with an expiry. Redis failures are logged and
//! swallowed; an entry that cannot be decoded is treated as a miss and
//! deleted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use crudstore_core::{cache_key, CacheError, Record};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, warn};

use super::{Cache, CacheStats};

const CACHE: &str = "redis";

/// Configuration for [`RedisCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisCacheConfig {
    /// Prefix prepended to every key.
    pub key_prefix: String,
    /// Entry lifetime. `None` keeps entries until removed or evicted by Redis.
    pub ttl: Option<Duration>,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "crudstore:cache:".to_string(),
            ttl: None,
        }
    }
}

impl RedisCacheConfig {
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = if ttl.is_zero() { None } else { Some(ttl) };
        self
    }
}

/// Redis-backed record cache.
pub struct RedisCache {
    connection: MultiplexedConnection,
    config: RedisCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RedisCache {
    pub fn new(connection: MultiplexedConnection, config: RedisCacheConfig) -> Self {
        Self {
            connection,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Open a multiplexed connection to `url` and build a cache on it.
    pub async fn connect(url: &str, config: RedisCacheConfig) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(backend_error)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend_error)?;
        Ok(Self::new(connection, config))
    }

    pub fn config(&self) -> &RedisCacheConfig {
        &self.config
    }

    fn key(&self, user_id: &str, post_id: &str) -> String {
        format!("{}{}", self.config.key_prefix, cache_key(user_id, post_id))
    }

    async fn fetch(&self, key: &str) -> Result<Option<Record>, CacheError> {
        let mut conn = self.connection.clone();
        let raw: Option<Vec<u8>> = conn.get(key).await.map_err(backend_error)?;
        match raw {
            None => Ok(None),
            Some(bytes) => Record::from_json(&bytes)
                .map(Some)
                .map_err(|e| CacheError::Serialization {
                    reason: e.to_string(),
                }),
        }
    }

    async fn store(&self, key: &str, record: &Record) -> Result<(), CacheError> {
        let value = record.to_json().map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        let mut conn = self.connection.clone();
        match self.config.ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await
                .map_err(backend_error),
            None => conn.set::<_, _, ()>(key, value).await.map_err(backend_error),
        }
    }

    async fn evict(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key).await.map_err(backend_error)
    }
}

fn backend_error(e: redis::RedisError) -> CacheError {
    CacheError::Backend {
        cache: CACHE,
        reason: e.to_string(),
    }
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Cache for RedisCache {
    fn name(&self) -> &'static str {
        CACHE
    }

    async fn get(&self, user_id: &str, post_id: &str) -> Option<Record> {
        let key = self.key(user_id, post_id);
        let found = match self.fetch(&key).await {
            Ok(found) => found,
            Err(e @ CacheError::Serialization { .. }) => {
                warn!(cache = CACHE, key = %key, error = %e, "Dropping undecodable cache entry");
                if let Err(e) = self.evict(&key).await {
                    warn!(cache = CACHE, key = %key, error = %e, "Cache remove failed");
                }
                None
            }
            Err(e) => {
                warn!(cache = CACHE, key = %key, error = %e, "Cache get failed");
                None
            }
        };

        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    async fn add(&self, user_id: &str, post_id: &str, record: &Record) {
        let key = self.key(user_id, post_id);
        match self.store(&key, record).await {
            Ok(()) => debug!(cache = CACHE, key = %key, "Cached record"),
            Err(e) => warn!(cache = CACHE, key = %key, error = %e, "Cache add failed"),
        }
    }

    async fn remove(&self, user_id: &str, post_id: &str) {
        let key = self.key(user_id, post_id);
        if let Err(e) = self.evict(&key).await {
            warn!(cache = CACHE, key = %key, error = %e, "Cache remove failed");
        }
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RedisCacheConfig::default();
        assert_eq!(config.key_prefix, "crudstore:cache:");
        assert!(config.ttl.is_none());
    }

    #[test]
    fn test_zero_ttl_means_no_expiry() {
        let config = RedisCacheConfig::default().with_ttl(Duration::ZERO);
        assert!(config.ttl.is_none());

        let config = config.with_ttl(Duration::from_secs(30)).with_key_prefix("t:");
        assert_eq!(config.ttl, Some(Duration::from_secs(30)));
        assert_eq!(config.key_prefix, "t:");
    }

    #[cfg(feature = "db-tests")]
    mod live {
        use super::*;

        fn redis_url() -> String {
            std::env::var("CRUDSTORE_REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
        }

        #[tokio::test]
        async fn test_round_trip_and_remove() {
            let prefix = format!("crudstore:test:{}:", crudstore_core::new_post_id());
            let cache = RedisCache::connect(
                &redis_url(),
                RedisCacheConfig::default().with_key_prefix(prefix),
            )
            .await
            .expect("redis should be reachable");

            let record = Record::create("u1", "hello");
            assert!(cache.get("u1", &record.post_id).await.is_none());
            cache.add("u1", &record.post_id, &record).await;
            assert_eq!(cache.get("u1", &record.post_id).await, Some(record.clone()));
            cache.remove("u1", &record.post_id).await;
            assert!(cache.get("u1", &record.post_id).await.is_none());
        }

        #[tokio::test]
        async fn test_undecodable_entry_is_a_miss() {
            let prefix = format!("crudstore:test:{}:", crudstore_core::new_post_id());
            let cache = RedisCache::connect(
                &redis_url(),
                RedisCacheConfig::default().with_key_prefix(prefix),
            )
            .await
            .expect("redis should be reachable");

            let key = cache.key("u1", "p1");
            let mut conn = cache.connection.clone();
            conn.set::<_, _, ()>(&key, "not json").await.unwrap();

            assert!(cache.get("u1", "p1").await.is_none());
            let left: Option<String> = conn.get(&key).await.unwrap();
            assert!(left.is_none());
        }
    }
}
