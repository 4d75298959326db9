//! PostgreSQL storage backend.
//!
//! Posts live in a single `post` table keyed by `(user_id, post_id)`.
//! Connections come from a deadpool-postgres pool; each operation checks one
//! out for the duration of a single statement.

use std::collections::VecDeque;

use async_trait::async_trait;
use crudstore_core::{now, Record, StorageError, StorageResult};
use deadpool_postgres::{Pool, PoolError};
use tokio_postgres::Row;
use tracing::{debug, instrument};

use crate::{BoxRecordIterator, RecordIterator, Storage};

const BACKEND: &str = "postgres";

/// Default number of rows fetched per `read_all` page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// DDL for the post table. Applied by [`PostgresStorage::ensure_schema`].
pub const POST_TABLE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS post (
    user_id    TEXT        NOT NULL,
    post_id    TEXT        NOT NULL,
    data       TEXT        NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (user_id, post_id)
)";

const INSERT_POST: &str = "INSERT INTO post (user_id, post_id, data, created_at, updated_at) \
     VALUES ($1, $2, $3, $4, $5)";

const SELECT_POST: &str = "SELECT user_id, post_id, data, created_at, updated_at \
     FROM post WHERE user_id = $1 AND post_id = $2";

const SELECT_PAGE: &str = "SELECT user_id, post_id, data, created_at, updated_at \
     FROM post WHERE user_id = $1 AND post_id > $2 ORDER BY post_id LIMIT $3";

// updated_at never moves backwards, even if the server clock is behind the
// previous write.
const UPDATE_POST: &str = "UPDATE post \
     SET data = $1, updated_at = GREATEST($2, updated_at + interval '1 microsecond') \
     WHERE user_id = $3 AND post_id = $4 \
     RETURNING user_id, post_id, data, created_at, updated_at";

const DELETE_POST: &str = "DELETE FROM post WHERE user_id = $1 AND post_id = $2";

fn pool_error(e: PoolError) -> StorageError {
    StorageError::backend(BACKEND, format!("Failed to get connection: {}", e))
}

fn query_error(e: tokio_postgres::Error) -> StorageError {
    StorageError::backend(BACKEND, e)
}

fn record_from_row(row: &Row) -> StorageResult<Record> {
    let decode = |e: tokio_postgres::Error| StorageError::decode(BACKEND, e);
    Ok(Record {
        user_id: row.try_get("user_id").map_err(decode)?,
        post_id: row.try_get("post_id").map_err(decode)?,
        data: row.try_get("data").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

/// Relational storage on PostgreSQL.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: Pool,
    page_size: usize,
}

impl PostgresStorage {
    /// Create a storage over an existing pool. Does not touch the database.
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the number of rows fetched per `read_all` page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create the post table if it does not exist.
    pub async fn ensure_schema(&self) -> StorageResult<()> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client
            .batch_execute(POST_TABLE_SCHEMA)
            .await
            .map_err(query_error)?;
        debug!(backend = BACKEND, "Post table ready");
        Ok(())
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }
}

impl std::fmt::Debug for PostgresStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStorage")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    fn name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(skip(self, data), fields(backend = BACKEND))]
    async fn create(&self, user_id: &str, data: &str) -> StorageResult<Record> {
        let record = Record::create(user_id, data);
        let client = self.pool.get().await.map_err(pool_error)?;
        client
            .execute(
                INSERT_POST,
                &[
                    &record.user_id,
                    &record.post_id,
                    &record.data,
                    &record.created_at,
                    &record.updated_at,
                ],
            )
            .await
            .map_err(query_error)?;
        Ok(record)
    }

    #[instrument(skip(self), fields(backend = BACKEND))]
    async fn read(&self, user_id: &str, post_id: &str) -> StorageResult<Record> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt(SELECT_POST, &[&user_id, &post_id])
            .await
            .map_err(query_error)?;
        match row {
            Some(row) => record_from_row(&row),
            None => Err(StorageError::not_found(user_id, post_id)),
        }
    }

    #[instrument(skip(self), fields(backend = BACKEND))]
    async fn read_all(&self, user_id: &str) -> StorageResult<BoxRecordIterator> {
        Ok(Box::new(PostgresRecordIterator::new(
            self.pool.clone(),
            user_id.to_string(),
            self.page_size,
        )))
    }

    #[instrument(skip(self, data), fields(backend = BACKEND))]
    async fn update(&self, user_id: &str, post_id: &str, data: &str) -> StorageResult<Record> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt(UPDATE_POST, &[&data, &now(), &user_id, &post_id])
            .await
            .map_err(query_error)?;
        match row {
            Some(row) => record_from_row(&row),
            None => Err(StorageError::not_found(user_id, post_id)),
        }
    }

    #[instrument(skip(self), fields(backend = BACKEND))]
    async fn delete(&self, user_id: &str, post_id: &str) -> StorageResult<()> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client
            .execute(DELETE_POST, &[&user_id, &post_id])
            .await
            .map_err(query_error)?;
        Ok(())
    }
}

// ============================================================================
// ITERATOR
// ============================================================================

/// Keyset-paged cursor over one user's rows.
///
/// A pooled connection is held only while a page is being fetched, so an
/// idle iterator never pins a connection.
struct PostgresRecordIterator {
    pool: Pool,
    user_id: String,
    page_size: usize,
    last_post_id: String,
    buffer: VecDeque<Row>,
    current: Option<StorageResult<Row>>,
    exhausted: bool,
    closed: bool,
}

impl PostgresRecordIterator {
    fn new(pool: Pool, user_id: String, page_size: usize) -> Self {
        Self {
            pool,
            user_id,
            page_size,
            last_post_id: String::new(),
            buffer: VecDeque::new(),
            current: None,
            exhausted: false,
            closed: false,
        }
    }

    async fn fetch_page(&mut self) -> StorageResult<()> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let limit = self.page_size as i64;
        let rows = client
            .query(SELECT_PAGE, &[&self.user_id, &self.last_post_id, &limit])
            .await
            .map_err(query_error)?;

        if rows.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = rows.last() {
            self.last_post_id = last.try_get("post_id").map_err(|e| StorageError::decode(BACKEND, e))?;
        }
        self.buffer.extend(rows);
        Ok(())
    }
}

#[async_trait]
impl RecordIterator for PostgresRecordIterator {
    async fn next(&mut self) -> bool {
        if self.closed {
            return false;
        }
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page().await {
                self.exhausted = true;
                self.current = Some(Err(e));
                return true;
            }
        }
        match self.buffer.pop_front() {
            Some(row) => {
                self.current = Some(Ok(row));
                true
            }
            None => {
                self.current = None;
                false
            }
        }
    }

    fn get(&mut self, dest: &mut Record) -> StorageResult<()> {
        let row = self.current.take().ok_or(StorageError::IteratorMisuse)??;
        *dest = record_from_row(&row)?;
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
        self.current = None;
        self.buffer.clear();
    }
}
