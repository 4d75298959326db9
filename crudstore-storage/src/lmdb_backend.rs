//! LMDB-backed document storage.
//!
//! Uses the heed crate (Rust bindings for LMDB). Each record is stored as a
//! JSON document under a key that places all of a user's documents in one
//! contiguous range:
//!
//! ```text
//! [sha256(user_id): 32 bytes][sha256(post_id): 32 bytes]
//! ```
//!
//! Keys are fixed-width so ids of any length stay under LMDB's 511 byte key
//! limit. The real ids live in the document.
//!
//! # Transactions
//!
//! - Read transactions for `read` and for each `read_all` page
//! - One write transaction per `create`, `update` and `delete`; `update`
//!   reads, modifies and writes inside the same transaction

use std::collections::VecDeque;
use std::ops::Bound;
use std::path::Path;

use async_trait::async_trait;
use crudstore_core::{Record, StorageError, StorageResult};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::{BoxRecordIterator, RecordIterator, Storage};

const BACKEND: &str = "lmdb";

/// Name of the LMDB sub-database holding post documents.
const POSTS_DB: &str = "posts";

/// Default number of documents fetched per `read_all` page.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Error type for LMDB environment setup and transactions.
#[derive(Debug, thiserror::Error)]
pub enum LmdbError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbError {
    fn from(e: heed::Error) -> Self {
        LmdbError::Transaction(e.to_string())
    }
}

impl From<LmdbError> for StorageError {
    fn from(e: LmdbError) -> Self {
        StorageError::backend(BACKEND, e)
    }
}

/// Width of one digest component of a key.
const DIGEST_LEN: usize = 32;

fn digest(id: &str) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; DIGEST_LEN];
    hash.copy_from_slice(&result);
    hash
}

/// Encode the key prefix shared by every document of `user_id`.
fn user_prefix(user_id: &str) -> Vec<u8> {
    digest(user_id).to_vec()
}

/// Encode the full document key for `(user_id, post_id)`.
fn record_key(user_id: &str, post_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * DIGEST_LEN);
    key.extend_from_slice(&digest(user_id));
    key.extend_from_slice(&digest(post_id));
    key
}

fn encode(record: &Record) -> StorageResult<String> {
    record
        .to_json()
        .map_err(|e| StorageError::decode(BACKEND, e))
}

fn decode(raw: &[u8]) -> StorageResult<Record> {
    Record::from_json(raw).map_err(|e| StorageError::decode(BACKEND, e))
}

/// LMDB-backed document storage.
///
/// # Example
///
/// ```ignore
/// let storage = LmdbStorage::open("/var/lib/crudstore", 64)?;
/// let record = storage.create("u1", "hello").await?;
/// ```
#[derive(Clone)]
pub struct LmdbStorage {
    /// The LMDB environment.
    env: Env,
    /// The posts database.
    db: Database<Bytes, Bytes>,
    /// Documents fetched per `read_all` page.
    page_size: usize,
}

impl LmdbStorage {
    /// Open (or create) an LMDB document store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the files are not modified by anything other than LMDB itself.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn()?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(POSTS_DB))
            .map_err(|e| LmdbError::DbOpen(e.to_string()))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            db,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Set the number of documents fetched per `read_all` page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn put_new(&self, record: &Record) -> StorageResult<()> {
        let key = record_key(&record.user_id, &record.post_id);
        let value = encode(record)?;

        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.db
            .put(&mut wtxn, &key, value.as_bytes())
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn get_one(&self, user_id: &str, post_id: &str) -> StorageResult<Record> {
        let key = record_key(user_id, post_id);
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match self.db.get(&rtxn, &key).map_err(LmdbError::from)? {
            Some(raw) => decode(raw),
            None => Err(StorageError::not_found(user_id, post_id)),
        }
    }

    fn modify(&self, user_id: &str, post_id: &str, data: &str) -> StorageResult<Record> {
        let key = record_key(user_id, post_id);
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;

        let existing = match self.db.get(&wtxn, &key).map_err(LmdbError::from)? {
            Some(raw) => decode(raw)?,
            None => return Err(StorageError::not_found(user_id, post_id)),
        };

        let updated = existing.with_data(data);
        let value = encode(&updated)?;
        self.db
            .put(&mut wtxn, &key, value.as_bytes())
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;

        Ok(updated)
    }

    fn remove(&self, user_id: &str, post_id: &str) -> StorageResult<()> {
        let key = record_key(user_id, post_id);
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.db.delete(&mut wtxn, &key).map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }
}

#[async_trait]
impl Storage for LmdbStorage {
    fn name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(skip(self, data), fields(backend = BACKEND))]
    async fn create(&self, user_id: &str, data: &str) -> StorageResult<Record> {
        let record = Record::create(user_id, data);
        self.put_new(&record)?;
        Ok(record)
    }

    #[instrument(skip(self), fields(backend = BACKEND))]
    async fn read(&self, user_id: &str, post_id: &str) -> StorageResult<Record> {
        self.get_one(user_id, post_id)
    }

    #[instrument(skip(self), fields(backend = BACKEND))]
    async fn read_all(&self, user_id: &str) -> StorageResult<BoxRecordIterator> {
        Ok(Box::new(LmdbRecordIterator::new(
            self.env.clone(),
            self.db,
            user_prefix(user_id),
            self.page_size,
        )))
    }

    #[instrument(skip(self, data), fields(backend = BACKEND))]
    async fn update(&self, user_id: &str, post_id: &str, data: &str) -> StorageResult<Record> {
        self.modify(user_id, post_id, data)
    }

    #[instrument(skip(self), fields(backend = BACKEND))]
    async fn delete(&self, user_id: &str, post_id: &str) -> StorageResult<()> {
        self.remove(user_id, post_id)
    }
}

// ============================================================================
// ITERATOR
// ============================================================================

enum Current {
    Document(Vec<u8>),
    Failed(StorageError),
}

/// Pages through one user's key range.
///
/// Each page is read in its own short read transaction, so the iterator
/// never pins an LMDB snapshot between calls. Documents written after a
/// page boundary may or may not be observed.
struct LmdbRecordIterator {
    env: Env,
    db: Database<Bytes, Bytes>,
    prefix: Vec<u8>,
    page_size: usize,
    last_key: Option<Vec<u8>>,
    buffer: VecDeque<Vec<u8>>,
    current: Option<Current>,
    exhausted: bool,
    closed: bool,
}

impl LmdbRecordIterator {
    fn new(env: Env, db: Database<Bytes, Bytes>, prefix: Vec<u8>, page_size: usize) -> Self {
        Self {
            env,
            db,
            prefix,
            page_size,
            last_key: None,
            buffer: VecDeque::new(),
            current: None,
            exhausted: false,
            closed: false,
        }
    }

    fn fetch_page(&mut self) -> Result<(), LmdbError> {
        let rtxn = self.env.read_txn()?;
        let lower = match &self.last_key {
            Some(last) => Bound::Excluded(last.as_slice()),
            None => Bound::Included(self.prefix.as_slice()),
        };
        let range: (Bound<&[u8]>, Bound<&[u8]>) = (lower, Bound::Unbounded);

        let mut fetched = 0;
        let mut last_key = None;
        for entry in self.db.range(&rtxn, &range)? {
            let (key, value) = entry?;
            if !key.starts_with(&self.prefix) {
                self.exhausted = true;
                break;
            }
            last_key = Some(key.to_vec());
            self.buffer.push_back(value.to_vec());
            fetched += 1;
            if fetched == self.page_size {
                break;
            }
        }

        if fetched < self.page_size {
            self.exhausted = true;
        }
        if last_key.is_some() {
            self.last_key = last_key;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordIterator for LmdbRecordIterator {
    async fn next(&mut self) -> bool {
        if self.closed {
            return false;
        }
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                self.current = Some(Current::Failed(e.into()));
                return true;
            }
        }
        match self.buffer.pop_front() {
            Some(document) => {
                self.current = Some(Current::Document(document));
                true
            }
            None => {
                self.current = None;
                false
            }
        }
    }

    fn get(&mut self, dest: &mut Record) -> StorageResult<()> {
        match self.current.take() {
            Some(Current::Document(raw)) => {
                *dest = decode(&raw)?;
                Ok(())
            }
            Some(Current::Failed(e)) => Err(e),
            None => Err(StorageError::IteratorMisuse),
        }
    }

    async fn close(&mut self) {
        self.closed = true;
        self.current = None;
        self.buffer.clear();
    }
}
