//! crudstore Core - Record Types
//!
//! Pure data structures shared by every storage backend and cache.
//! This crate contains no I/O.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::{
    CacheError, ConfigError, CrudError, CrudResult, StorageError, StorageResult,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Separator between user and post id in derived cache keys.
pub const CACHE_KEY_SEPARATOR: char = '#';

/// Generate a new post identifier.
///
/// UUIDv7 embeds a Unix timestamp, so ids sort by creation time. The simple
/// (hyphen-less) form keeps keys compact in key-value backends.
pub fn new_post_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Current UTC time truncated to microseconds.
///
/// Postgres stores microsecond precision; truncating here means a record
/// returned by `create` compares equal to the same record read back later.
pub fn now() -> Timestamp {
    Utc::now().trunc_subsecs(6)
}

/// Compute the `updated_at` for a record whose previous value is `previous`.
///
/// Always strictly greater than `previous`, even when the wall clock has not
/// advanced (or has stepped backwards) since the last write.
pub fn next_updated_at(previous: Timestamp) -> Timestamp {
    let candidate = now();
    let floor = previous + Duration::microseconds(1);
    if candidate > floor {
        candidate
    } else {
        floor
    }
}

/// Derive the cache key for a record: `user_id + "#" + post_id`.
pub fn cache_key(user_id: &str, post_id: &str) -> String {
    let mut key = String::with_capacity(user_id.len() + post_id.len() + 1);
    key.push_str(user_id);
    key.push(CACHE_KEY_SEPARATOR);
    key.push_str(post_id);
    key
}

// ============================================================================
// RECORD
// ============================================================================

/// A single stored post, identified by `(user_id, post_id)`.
///
/// Only storage backends construct records with fresh identity fields.
/// Everything else receives them from a backend and passes them along.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "postID")]
    pub post_id: String,
    pub data: String,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
    #[serde(rename = "updatedAt")]
    pub updated_at: Timestamp,
}

impl Record {
    pub fn new(
        user_id: impl Into<String>,
        post_id: impl Into<String>,
        data: impl Into<String>,
        created_at: Timestamp,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            post_id: post_id.into(),
            data: data.into(),
            created_at,
            updated_at,
        }
    }

    /// Build a brand-new record: fresh post id, `created_at == updated_at == now`.
    pub fn create(user_id: impl Into<String>, data: impl Into<String>) -> Self {
        let now = now();
        Self::new(user_id, new_post_id(), data, now, now)
    }

    /// Copy of this record with new data and a bumped `updated_at`.
    ///
    /// Identity fields and `created_at` are preserved.
    pub fn with_data(&self, data: impl Into<String>) -> Self {
        Self {
            user_id: self.user_id.clone(),
            post_id: self.post_id.clone(),
            data: data.into(),
            created_at: self.created_at,
            updated_at: next_updated_at(self.updated_at),
        }
    }

    /// The derived cache key for this record.
    pub fn cache_key(&self) -> String {
        cache_key(&self.user_id, &self.post_id)
    }

    /// Encode as JSON for document and key-value backends.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from the JSON produced by [`Record::to_json`].
    pub fn from_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_format() {
        assert_eq!(cache_key("u1", "p1"), "u1#p1");
        assert_eq!(cache_key("", ""), "#");
    }

    #[test]
    fn test_new_post_id_unique_and_sortable() {
        let a = new_post_id();
        let b = new_post_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a < b, "v7 ids generated in sequence should sort");
    }

    #[test]
    fn test_now_has_microsecond_precision() {
        let ts = now();
        assert_eq!(ts.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn test_create_sets_equal_timestamps() {
        let record = Record::create("u1", "hello");
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.data, "hello");
        assert_eq!(record.created_at, record.updated_at);
        assert!(!record.post_id.is_empty());
    }

    #[test]
    fn test_with_data_preserves_identity() {
        let record = Record::create("u1", "hello");
        let updated = record.with_data("world");
        assert_eq!(updated.user_id, record.user_id);
        assert_eq!(updated.post_id, record.post_id);
        assert_eq!(updated.created_at, record.created_at);
        assert_eq!(updated.data, "world");
        assert!(updated.updated_at > record.updated_at);
    }

    #[test]
    fn test_next_updated_at_handles_future_previous() {
        let future = now() + Duration::hours(1);
        let next = next_updated_at(future);
        assert_eq!(next, future + Duration::microseconds(1));
    }

    #[test]
    fn test_json_field_names() {
        let record = Record::create("u1", "hello");
        let json = record.to_json().unwrap();
        assert!(json.contains("\"userID\":\"u1\""));
        assert!(json.contains("\"postID\""));
        assert!(json.contains("\"createdAt\""));
        assert!(json.contains("\"updatedAt\""));

        let decoded = Record::from_json(json.as_bytes()).unwrap();
        assert_eq!(decoded, record);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            /// Repeated updates always move `updated_at` strictly forward.
            #[test]
            fn prop_updated_at_strictly_increases(steps in 1usize..20) {
                let mut record = Record::create("u", "d");
                for i in 0..steps {
                    let next = record.with_data(format!("d{i}"));
                    prop_assert!(next.updated_at > record.updated_at);
                    prop_assert!(next.created_at <= next.updated_at);
                    record = next;
                }
            }

            #[test]
            fn prop_cache_key_prefix(user in "[a-z0-9]{0,12}", post in "[a-z0-9]{0,12}") {
                let key = cache_key(&user, &post);
                prop_assert!(key.starts_with(&user));
                prop_assert!(key.ends_with(&post));
                prop_assert_eq!(key.len(), user.len() + post.len() + 1);
            }
        }
    }
}
