//! Error types for crudstore operations

use thiserror::Error;

/// Storage layer errors.
///
/// `NotFound` is the only kind callers are expected to branch on. Every
/// other variant is an opaque backend failure that propagates unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Post '{post_id}' does not exist for user '{user_id}'")]
    NotFound { user_id: String, post_id: String },

    #[error("{backend} backend failure: {reason}")]
    Backend { backend: &'static str, reason: String },

    #[error("{backend} decode failure: {reason}")]
    Decode { backend: &'static str, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Record iterator read without a successful advance")]
    IteratorMisuse,
}

impl StorageError {
    pub fn not_found(user_id: impl Into<String>, post_id: impl Into<String>) -> Self {
        Self::NotFound {
            user_id: user_id.into(),
            post_id: post_id.into(),
        }
    }

    pub fn backend(backend: &'static str, reason: impl ToString) -> Self {
        Self::Backend {
            backend,
            reason: reason.to_string(),
        }
    }

    pub fn decode(backend: &'static str, reason: impl ToString) -> Self {
        Self::Decode {
            backend,
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Cache adapter errors.
///
/// These never leave a cache implementation: adapters log and swallow them
/// so that an unavailable cache degrades to direct storage access.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("{cache} cache failure: {reason}")]
    Backend { cache: &'static str, reason: String },

    #[error("Cache serialization error: {reason}")]
    Serialization { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Backend type '{kind}' is undefined")]
    UnsupportedBackend { kind: String },
}

/// Master error type for all crudstore errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CrudError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for crudstore operations.
pub type CrudResult<T> = Result<T, CrudError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::not_found("u1", "p1");
        let msg = format!("{}", err);
        assert!(msg.contains("does not exist"));
        assert!(msg.contains("u1"));
        assert!(msg.contains("p1"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_storage_error_backend_is_not_not_found() {
        let err = StorageError::backend("postgres", "connection refused");
        assert!(!err.is_not_found());
        assert!(format!("{}", err).contains("connection refused"));
    }

    #[test]
    fn test_config_error_display_unsupported_backend() {
        let err = ConfigError::UnsupportedBackend {
            kind: "cassandra".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("cassandra"));
        assert!(msg.contains("undefined"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "CRUDSTORE_CACHE_SIZE".to_string(),
            value: "lots".to_string(),
            reason: "must be a positive integer".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("CRUDSTORE_CACHE_SIZE"));
        assert!(msg.contains("lots"));
        assert!(msg.contains("positive integer"));
    }

    #[test]
    fn test_crud_error_from_variants() {
        let storage = CrudError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, CrudError::Storage(_)));

        let cache = CrudError::from(CacheError::Serialization {
            reason: "eof".to_string(),
        });
        assert!(matches!(cache, CrudError::Cache(_)));

        let config = CrudError::from(ConfigError::MissingRequired {
            field: "CRUDSTORE_LMDB_PATH".to_string(),
        });
        assert!(matches!(config, CrudError::Config(_)));
    }
}
