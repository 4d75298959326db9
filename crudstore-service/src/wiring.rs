//! Backend selection and connection setup.
//!
//! Builds the one [`Storage`] and one [`Cache`] a process runs with, and
//! hands them to a [`CachingStorage`]. Remote backends are retried with
//! exponential backoff while they come up.

use std::fmt::Display;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use crudstore_core::{ConfigError, CrudResult, StorageError};
use crudstore_storage::{
    Cache, CachingStorage, LmdbStorage, LruCache, MemoryStorage, NoopCache, PostgresStorage,
    RedisCache, RedisCacheConfig, RedisStorage, Storage,
};
use tracing::{info, warn};

use crate::config::{CacheConfig, CacheKind, ServiceConfig, StorageConfig, StorageKind};

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Exponential backoff for connection attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Coefficient to multiply initial_interval with for every past attempt.
    pub backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    pub initial_interval: Duration,
    /// The maximum possible backoff between retries.
    pub maximum_interval: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_coefficient: 2,
            initial_interval: Duration::from_millis(500),
            maximum_interval: Some(Duration::from_secs(10)),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Interval to wait after the given failed attempt (1-based).
    pub fn retry_interval(&self, attempt: u32) -> Duration {
        let candidate = self
            .initial_interval
            .saturating_mul(self.backoff_coefficient.saturating_pow(attempt.saturating_sub(1)));
        match self.maximum_interval {
            Some(max) => candidate.min(max),
            None => candidate,
        }
    }

    /// Run `op` until it succeeds or the attempts are used up, returning the
    /// last error.
    pub async fn retry<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    warn!(backend = what, attempt, error = %e, "Giving up on {}", what);
                    return Err(e);
                }
                Err(e) => {
                    let wait = self.retry_interval(attempt);
                    info!(backend = what, attempt, error = %e, wait_ms = wait.as_millis() as u64, "waiting for {}", what);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

/// Construct and connect the configured storage backend.
pub async fn connect_storage(
    config: &StorageConfig,
    retry: &RetryPolicy,
) -> CrudResult<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.kind {
        StorageKind::Memory => Arc::new(MemoryStorage::new()),
        StorageKind::Postgres => {
            let pool = config.db.create_pool()?;
            let storage = PostgresStorage::new(pool).with_page_size(config.db.page_size);
            retry.retry("Postgres", || storage.ensure_schema()).await?;
            Arc::new(storage)
        }
        StorageKind::Lmdb => {
            let path = config
                .lmdb
                .path
                .as_ref()
                .ok_or_else(|| ConfigError::MissingRequired {
                    field: "CRUDSTORE_LMDB_PATH".to_string(),
                })?;
            let storage = LmdbStorage::open(path, config.lmdb.max_size_mb)
                .map_err(StorageError::from)?
                .with_page_size(config.db.page_size);
            Arc::new(storage)
        }
        StorageKind::Redis => {
            let url = config.redis.url.as_str();
            let prefix = format!("{}posts:", config.redis.key_prefix);
            let storage = retry
                .retry("Redis", || RedisStorage::connect(url, prefix.clone()))
                .await?;
            Arc::new(storage)
        }
    };

    info!(backend = storage.name(), "Storage ready");
    Ok(storage)
}

/// Construct and connect the configured cache.
pub async fn connect_cache(config: &CacheConfig, retry: &RetryPolicy) -> CrudResult<Arc<dyn Cache>> {
    let cache: Arc<dyn Cache> = match config.kind {
        CacheKind::None => Arc::new(NoopCache),
        CacheKind::Memory => {
            let capacity = NonZeroUsize::new(config.size).ok_or_else(|| ConfigError::InvalidValue {
                field: "CRUDSTORE_CACHE_SIZE".to_string(),
                value: config.size.to_string(),
                reason: "must be a positive integer".to_string(),
            })?;
            Arc::new(LruCache::new(capacity))
        }
        CacheKind::Redis => {
            let url = config.redis.url.as_str();
            let mut cache_config =
                RedisCacheConfig::default().with_key_prefix(format!("{}cache:", config.redis.key_prefix));
            if let Some(ttl) = config.ttl {
                cache_config = cache_config.with_ttl(ttl);
            }
            let cache = retry
                .retry("Redis", || RedisCache::connect(url, cache_config.clone()))
                .await?;
            Arc::new(cache)
        }
    };

    info!(cache = cache.name(), "Cache ready");
    Ok(cache)
}

/// Build the storage a service runs against: the configured backend behind
/// a [`CachingStorage`]. With caching disabled the no-op cache is used, so
/// the coordinator is always present.
pub async fn build_storage(config: &ServiceConfig) -> CrudResult<Arc<dyn Storage>> {
    let retry = RetryPolicy::default().with_max_attempts(config.connect_retries);
    let storage = connect_storage(&config.storage, &retry).await?;
    let cache = connect_cache(&config.cache, &retry).await?;
    Ok(Arc::new(CachingStorage::new(storage, cache)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LmdbConfig;
    use crudstore_core::CrudError;
    use crudstore_test_utils::conformance;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            backoff_coefficient: 2,
            initial_interval: Duration::from_millis(1),
            maximum_interval: Some(Duration::from_millis(2)),
        }
    }

    #[test]
    fn test_retry_interval_backs_off_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retry_interval(1), Duration::from_millis(500));
        assert_eq!(policy.retry_interval(2), Duration::from_secs(1));
        assert_eq!(policy.retry_interval(3), Duration::from_secs(2));
        assert_eq!(policy.retry_interval(10), Duration::from_secs(10));
        assert_eq!(policy.retry_interval(64), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = fast_policy(5)
            .retry("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(format!("attempt {n} failed"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_with_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = fast_policy(3)
            .retry("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(format!("attempt {n} failed")) }
            })
            .await;
        assert_eq!(result, Err("attempt 3 failed".to_string()));
    }

    #[tokio::test]
    async fn test_default_config_builds_cached_memory_storage() {
        let storage = build_storage(&ServiceConfig::default()).await.unwrap();
        assert_eq!(storage.name(), "memory");
        conformance::run_all(storage.as_ref()).await;
    }

    #[tokio::test]
    async fn test_lmdb_storage_without_cache() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = ServiceConfig::default();
        config.storage.kind = StorageKind::Lmdb;
        config.storage.lmdb = LmdbConfig {
            path: Some(dir.path().to_path_buf()),
            max_size_mb: 16,
        };
        config.cache.kind = CacheKind::None;

        let storage = build_storage(&config).await.unwrap();
        assert_eq!(storage.name(), "lmdb");
        conformance::run_all(storage.as_ref()).await;
    }

    #[tokio::test]
    async fn test_lmdb_without_path_is_config_error() {
        let mut config = StorageConfig::default();
        config.kind = StorageKind::Lmdb;
        let err = connect_storage(&config, &fast_policy(1)).await.err().unwrap();
        assert!(matches!(err, CrudError::Config(ConfigError::MissingRequired { .. })));
    }

    #[tokio::test]
    async fn test_zero_sized_memory_cache_is_config_error() {
        let config = CacheConfig {
            size: 0,
            ..Default::default()
        };
        let err = connect_cache(&config, &fast_policy(1)).await.err().unwrap();
        assert!(matches!(err, CrudError::Config(ConfigError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_cache_kinds() {
        let none = connect_cache(
            &CacheConfig {
                kind: CacheKind::None,
                ..Default::default()
            },
            &fast_policy(1),
        )
        .await
        .unwrap();
        assert_eq!(none.name(), "none");

        let memory = connect_cache(&CacheConfig::default(), &fast_policy(1))
            .await
            .unwrap();
        assert_eq!(memory.name(), "memory");
    }
}
