//! Post service facade.
//!
//! The layer a transport would call: plain string arguments in, serde DTOs
//! out, with storage errors already mapped to client-facing codes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use crudstore_core::Record;
use crudstore_storage::{collect_records, Storage};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{ServiceError, ServiceResult};

// ============================================================================
// RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    pub post_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostResponse {
    pub user_id: String,
    pub post_id: String,
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Record> for PostResponse {
    fn from(record: Record) -> Self {
        Self {
            user_id: record.user_id,
            post_id: record.post_id,
            data: record.data,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadAllResponse {
    pub posts: Vec<PostResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub post_id: String,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// SERVICE
// ============================================================================

fn require(field: &str, value: &str) -> ServiceResult<()> {
    if value.is_empty() {
        return Err(ServiceError::invalid_argument(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// CRUD operations on posts over any [`Storage`].
#[derive(Clone)]
pub struct PostService {
    storage: Arc<dyn Storage>,
}

impl PostService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    #[instrument(skip(self, data))]
    pub async fn create(&self, user_id: &str, data: &str) -> ServiceResult<CreateResponse> {
        require("user_id", user_id)?;
        let record = self.storage.create(user_id, data).await?;
        Ok(CreateResponse {
            post_id: record.post_id,
            created_at: record.created_at,
        })
    }

    #[instrument(skip(self))]
    pub async fn read(&self, user_id: &str, post_id: &str) -> ServiceResult<PostResponse> {
        require("user_id", user_id)?;
        require("post_id", post_id)?;
        let record = self.storage.read(user_id, post_id).await?;
        Ok(record.into())
    }

    #[instrument(skip(self))]
    pub async fn read_all(&self, user_id: &str) -> ServiceResult<ReadAllResponse> {
        require("user_id", user_id)?;
        let iter = self.storage.read_all(user_id).await?;
        let records = collect_records(iter).await?;
        Ok(ReadAllResponse {
            posts: records.into_iter().map(PostResponse::from).collect(),
        })
    }

    #[instrument(skip(self, data))]
    pub async fn update(&self, user_id: &str, post_id: &str, data: &str) -> ServiceResult<UpdateResponse> {
        require("user_id", user_id)?;
        require("post_id", post_id)?;
        let record = self.storage.update(user_id, post_id, data).await?;
        Ok(UpdateResponse {
            post_id: record.post_id,
            updated_at: record.updated_at,
        })
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: &str, post_id: &str) -> ServiceResult<()> {
        require("user_id", user_id)?;
        require("post_id", post_id)?;
        self.storage.delete(user_id, post_id).await?;
        Ok(())
    }
}

impl std::fmt::Debug for PostService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostService")
            .field("storage", &self.storage.name())
            .finish()
    }
}
