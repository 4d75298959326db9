//! Redis key-value storage backend.
//!
//! One hash per user: key `{prefix}{user_id}`, field `post_id`, value the
//! record as JSON. `read_all` walks the hash with `HSCAN`, which may return
//! a field more than once; the iterator filters repeats.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use crudstore_core::{Record, StorageError, StorageResult};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::instrument;

use crate::{BoxRecordIterator, RecordIterator, Storage};

const BACKEND: &str = "redis";

/// Default key prefix for user hashes.
pub const DEFAULT_KEY_PREFIX: &str = "crudstore:posts:";

/// `COUNT` hint passed to `HSCAN`.
pub const DEFAULT_SCAN_COUNT: usize = 100;

fn redis_error(e: redis::RedisError) -> StorageError {
    StorageError::backend(BACKEND, e)
}

fn decode(raw: &str) -> StorageResult<Record> {
    Record::from_json(raw.as_bytes()).map_err(|e| StorageError::decode(BACKEND, e))
}

/// Key-value storage on Redis hashes.
#[derive(Clone)]
pub struct RedisStorage {
    connection: MultiplexedConnection,
    key_prefix: String,
    scan_count: usize,
}

impl RedisStorage {
    pub fn new(connection: MultiplexedConnection, key_prefix: impl Into<String>) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.into(),
            scan_count: DEFAULT_SCAN_COUNT,
        }
    }

    /// Open a multiplexed connection to `url`.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> StorageResult<Self> {
        let client = redis::Client::open(url).map_err(redis_error)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_error)?;
        Ok(Self::new(connection, key_prefix))
    }

    /// Set the `COUNT` hint used by `read_all`.
    pub fn with_scan_count(mut self, count: usize) -> Self {
        self.scan_count = count.max(1);
        self
    }

    fn user_key(&self, user_id: &str) -> String {
        format!("{}{}", self.key_prefix, user_id)
    }

    async fn put(&self, record: &Record) -> StorageResult<()> {
        let value = record
            .to_json()
            .map_err(|e| StorageError::decode(BACKEND, e))?;
        let mut conn = self.connection.clone();
        conn.hset::<_, _, _, ()>(self.user_key(&record.user_id), &record.post_id, value)
            .await
            .map_err(redis_error)
    }
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("key_prefix", &self.key_prefix)
            .field("scan_count", &self.scan_count)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Storage for RedisStorage {
    fn name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(skip(self, data), fields(backend = BACKEND))]
    async fn create(&self, user_id: &str, data: &str) -> StorageResult<Record> {
        let record = Record::create(user_id, data);
        self.put(&record).await?;
        Ok(record)
    }

    #[instrument(skip(self), fields(backend = BACKEND))]
    async fn read(&self, user_id: &str, post_id: &str) -> StorageResult<Record> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .hget(self.user_key(user_id), post_id)
            .await
            .map_err(redis_error)?;
        match raw {
            Some(raw) => decode(&raw),
            None => Err(StorageError::not_found(user_id, post_id)),
        }
    }

    #[instrument(skip(self), fields(backend = BACKEND))]
    async fn read_all(&self, user_id: &str) -> StorageResult<BoxRecordIterator> {
        Ok(Box::new(RedisRecordIterator::new(
            self.connection.clone(),
            self.user_key(user_id),
            self.scan_count,
        )))
    }

    // HGET then HSET: a concurrent delete between the two can resurrect the
    // record. Same-key writers are last-writer-wins.
    #[instrument(skip(self, data), fields(backend = BACKEND))]
    async fn update(&self, user_id: &str, post_id: &str, data: &str) -> StorageResult<Record> {
        let existing = self.read(user_id, post_id).await?;
        let updated = existing.with_data(data);
        self.put(&updated).await?;
        Ok(updated)
    }

    #[instrument(skip(self), fields(backend = BACKEND))]
    async fn delete(&self, user_id: &str, post_id: &str) -> StorageResult<()> {
        let mut conn = self.connection.clone();
        conn.hdel::<_, _, ()>(self.user_key(user_id), post_id)
            .await
            .map_err(redis_error)
    }
}

// ============================================================================
// ITERATOR
// ============================================================================

/// Lazy `HSCAN` walk over one user's hash.
struct RedisRecordIterator {
    connection: MultiplexedConnection,
    key: String,
    count: usize,
    cursor: u64,
    buffer: VecDeque<String>,
    seen: HashSet<String>,
    current: Option<StorageResult<String>>,
    exhausted: bool,
    closed: bool,
}

impl RedisRecordIterator {
    fn new(connection: MultiplexedConnection, key: String, count: usize) -> Self {
        Self {
            connection,
            key,
            count,
            cursor: 0,
            buffer: VecDeque::new(),
            seen: HashSet::new(),
            current: None,
            exhausted: false,
            closed: false,
        }
    }

    /// Scan until at least one unseen field arrives or the cursor wraps.
    async fn fill(&mut self) -> StorageResult<()> {
        while self.buffer.is_empty() && !self.exhausted {
            let (cursor, flat): (u64, Vec<String>) = redis::cmd("HSCAN")
                .arg(&self.key)
                .arg(self.cursor)
                .arg("COUNT")
                .arg(self.count)
                .query_async(&mut self.connection)
                .await
                .map_err(redis_error)?;

            for pair in flat.chunks_exact(2) {
                if self.seen.insert(pair[0].clone()) {
                    self.buffer.push_back(pair[1].clone());
                }
            }

            self.cursor = cursor;
            if cursor == 0 {
                self.exhausted = true;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecordIterator for RedisRecordIterator {
    async fn next(&mut self) -> bool {
        if self.closed {
            return false;
        }
        if let Err(e) = self.fill().await {
            self.exhausted = true;
            self.current = Some(Err(e));
            return true;
        }
        match self.buffer.pop_front() {
            Some(raw) => {
                self.current = Some(Ok(raw));
                true
            }
            None => {
                self.current = None;
                false
            }
        }
    }

    fn get(&mut self, dest: &mut Record) -> StorageResult<()> {
        let raw = self.current.take().ok_or(StorageError::IteratorMisuse)??;
        *dest = decode(&raw)?;
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
        self.current = None;
        self.buffer.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode("not json"),
            Err(StorageError::Decode { backend: "redis", .. })
        ));
    }

    #[test]
    fn test_decode_record_json() {
        let record = Record::create("u1", "hello");
        let json = record.to_json().unwrap();
        assert_eq!(decode(&json).unwrap(), record);
    }

    #[cfg(feature = "db-tests")]
    mod live {
        use super::*;
        use crate::collect_records;

        async fn storage() -> RedisStorage {
            let url = std::env::var("CRUDSTORE_REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
            let prefix = format!("crudstore:test:{}:", crudstore_core::new_post_id());
            RedisStorage::connect(&url, prefix)
                .await
                .expect("redis should be reachable")
                .with_scan_count(2)
        }

        #[tokio::test]
        async fn test_crud_cycle() {
            let storage = storage().await;
            let created = storage.create("u1", "hello").await.unwrap();
            assert_eq!(storage.read("u1", &created.post_id).await.unwrap(), created);

            let updated = storage.update("u1", &created.post_id, "world").await.unwrap();
            assert_eq!(updated.data, "world");
            assert!(updated.updated_at > created.updated_at);

            storage.delete("u1", &created.post_id).await.unwrap();
            storage.delete("u1", &created.post_id).await.unwrap();
            assert!(storage.read("u1", &created.post_id).await.unwrap_err().is_not_found());
        }

        #[tokio::test]
        async fn test_read_all_scans_whole_hash() {
            let storage = storage().await;
            for i in 0..7 {
                storage.create("u1", &format!("d{i}")).await.unwrap();
            }
            let records = collect_records(storage.read_all("u1").await.unwrap())
                .await
                .unwrap();
            assert_eq!(records.len(), 7);

            let empty = collect_records(storage.read_all("u2").await.unwrap())
                .await
                .unwrap();
            assert!(empty.is_empty());
        }
    }
}
