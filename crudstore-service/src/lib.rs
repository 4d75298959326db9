//! crudstore Service - Configuration, Wiring and the Post Facade
//!
//! Everything between a transport and the storage layer:
//! - `config`: backend selection from `CRUDSTORE_*` environment variables
//! - `telemetry`: tracing subscriber setup
//! - `wiring`: connecting backends with retry and assembling `CachingStorage`
//! - `service`: `PostService`, input validation and response DTOs
//! - `error`: mapping storage errors to client-facing codes

pub mod config;
pub mod error;
pub mod service;
pub mod telemetry;
pub mod wiring;

pub use config::{
    CacheConfig, CacheKind, DbConfig, LmdbConfig, RedisConfig, ServiceConfig, StorageConfig,
    StorageKind,
};
pub use error::{ErrorCode, ServiceError, ServiceResult};
pub use service::{CreateResponse, PostResponse, PostService, ReadAllResponse, UpdateResponse};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use wiring::{build_storage, connect_cache, connect_storage, RetryPolicy};

use crudstore_storage::Storage;

/// Connect the configured backends and return a ready service.
pub async fn start(config: &ServiceConfig) -> crudstore_core::CrudResult<PostService> {
    let storage = build_storage(config).await?;
    tracing::info!(
        service_name = config.service_name,
        environment = config.environment,
        storage = storage.name(),
        "Post service ready"
    );
    Ok(PostService::new(storage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_with_defaults() {
        let service = start(&ServiceConfig::default()).await.unwrap();
        let created = service.create("u1", "hello").await.unwrap();
        assert_eq!(service.read("u1", &created.post_id).await.unwrap().data, "hello");
    }
}
