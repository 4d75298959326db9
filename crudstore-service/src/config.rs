//! Service Configuration Module
//!
//! Selects the storage backend and cache at process start. Configuration is
//! loaded from `CRUDSTORE_*` environment variables with defaults suitable for
//! development. Unlike a silent fallback, an unknown backend name or a
//! malformed number is a [`ConfigError`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crudstore_core::{ConfigError, StorageError, StorageResult};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

const ENV_PREFIX: &str = "CRUDSTORE_";

// ============================================================================
// BACKEND KINDS
// ============================================================================

/// Which [`Storage`](crudstore_storage::Storage) backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    #[default]
    Memory,
    Postgres,
    Lmdb,
    Redis,
}

impl FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "lmdb" => Ok(Self::Lmdb),
            "redis" => Ok(Self::Redis),
            _ => Err(ConfigError::UnsupportedBackend {
                kind: s.to_string(),
            }),
        }
    }
}

/// Which [`Cache`](crudstore_storage::Cache) to put in front of storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheKind {
    None,
    #[default]
    Memory,
    Redis,
}

impl FromStr for CacheKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "noop" => Ok(Self::None),
            "memory" | "lru" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            _ => Err(ConfigError::UnsupportedBackend {
                kind: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// ENVIRONMENT LOOKUP
// ============================================================================

/// Reads prefixed keys from a lookup function, so tests can supply a map
/// instead of mutating the process environment.
struct EnvSource<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvSource<F> {
    fn key(name: &str) -> String {
        format!("{}{}", ENV_PREFIX, name)
    }

    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(&Self::key(name)).filter(|v| !v.is_empty())
    }

    fn string_or(&self, name: &str, default: &str) -> String {
        self.string(name).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(name) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                field: Self::key(name),
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn kind_or<T: FromStr<Err = ConfigError>>(&self, name: &str, default: T) -> Result<T, ConfigError> {
        match self.string(name) {
            None => Ok(default),
            Some(raw) => raw.parse(),
        }
    }
}

// ============================================================================
// BACKEND CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
    /// Rows fetched per `read_all` page (LMDB uses it too)
    pub page_size: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "crudstore".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
            page_size: 100,
        }
    }
}

impl DbConfig {
    /// Create a connection pool from this configuration.
    ///
    /// No connection is opened until the pool is first used.
    pub fn create_pool(&self) -> StorageResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(self.timeout);

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(self.max_size));

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StorageError::backend("postgres", format!("Failed to create pool: {}", e)))
    }
}

/// Embedded LMDB document store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LmdbConfig {
    /// Directory holding the LMDB files
    pub path: Option<PathBuf>,
    /// Maximum map size in megabytes
    pub max_size_mb: usize,
}

impl Default for LmdbConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_size_mb: 1024,
        }
    }
}

/// Redis connection configuration, shared by the Redis storage and cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
    /// Prefix for every key this process writes
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "crudstore:".to_string(),
        }
    }
}

/// Storage backend selection plus the settings each backend needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub db: DbConfig,
    pub lmdb: LmdbConfig,
    pub redis: RedisConfig,
}

/// Cache selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub kind: CacheKind,
    /// Capacity of the in-process LRU cache
    pub size: usize,
    /// Lifetime of remote cache entries; `None` keeps them until removed
    pub ttl: Option<Duration>,
    pub redis: RedisConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: CacheKind::Memory,
            size: 10_000,
            ttl: None,
            redis: RedisConfig::default(),
        }
    }
}

// ============================================================================
// SERVICE CONFIGURATION
// ============================================================================

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub service_name: String,
    /// Environment (production, staging, development)
    pub environment: String,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    /// Attempts made to reach a remote backend before giving up
    pub connect_retries: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "crudstore".to_string(),
            environment: "development".to_string(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            connect_retries: 5,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `CRUDSTORE_*` environment variables.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource { lookup };
        let defaults = Self::default();
        let db_defaults = DbConfig::default();
        let redis_defaults = RedisConfig::default();

        let redis = RedisConfig {
            url: env.string_or("REDIS_URL", &redis_defaults.url),
            key_prefix: env.string_or("REDIS_KEY_PREFIX", &redis_defaults.key_prefix),
        };

        let storage = StorageConfig {
            kind: env.kind_or("STORAGE_TYPE", StorageKind::default())?,
            db: DbConfig {
                host: env.string_or("DB_HOST", &db_defaults.host),
                port: env.parse_or("DB_PORT", db_defaults.port)?,
                dbname: env.string_or("DB_NAME", &db_defaults.dbname),
                user: env.string_or("DB_USER", &db_defaults.user),
                password: env.string("DB_PASSWORD").unwrap_or_default(),
                max_size: env.parse_or("DB_POOL_SIZE", db_defaults.max_size)?,
                timeout: Duration::from_secs(
                    env.parse_or("DB_TIMEOUT", db_defaults.timeout.as_secs())?,
                ),
                page_size: env.parse_or("DB_PAGE_SIZE", db_defaults.page_size)?,
            },
            lmdb: LmdbConfig {
                path: env.string("LMDB_PATH").map(PathBuf::from),
                max_size_mb: env.parse_or("LMDB_MAX_SIZE_MB", LmdbConfig::default().max_size_mb)?,
            },
            redis: redis.clone(),
        };

        let ttl_secs: u64 = env.parse_or("CACHE_TTL_SECS", 0)?;
        let cache = CacheConfig {
            kind: env.kind_or("CACHE_TYPE", CacheKind::default())?,
            size: env.parse_or("CACHE_SIZE", defaults.cache.size)?,
            ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
            redis,
        };

        let config = Self {
            service_name: env.string_or("SERVICE_NAME", &defaults.service_name),
            environment: env.string_or("ENVIRONMENT", &defaults.environment),
            storage,
            cache,
            connect_retries: env.parse_or("CONNECT_RETRIES", defaults.connect_retries)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.kind == StorageKind::Lmdb && self.storage.lmdb.path.is_none() {
            return Err(ConfigError::MissingRequired {
                field: format!("{}LMDB_PATH", ENV_PREFIX),
            });
        }
        if self.cache.kind == CacheKind::Memory && self.cache.size == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{}CACHE_SIZE", ENV_PREFIX),
                value: "0".to_string(),
                reason: "must be a positive integer".to_string(),
            });
        }
        if self.storage.db.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{}DB_PAGE_SIZE", ENV_PREFIX),
                value: "0".to_string(),
                reason: "must be a positive integer".to_string(),
            });
        }
        Ok(())
    }
}
