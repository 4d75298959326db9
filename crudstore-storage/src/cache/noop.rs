//! Cache that never stores anything.

use async_trait::async_trait;
use crudstore_core::Record;

use super::Cache;

/// Always misses. Lets `CachingStorage` be used uniformly when caching is
/// disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl NoopCache {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Cache for NoopCache {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn get(&self, _user_id: &str, _post_id: &str) -> Option<Record> {
        None
    }

    async fn add(&self, _user_id: &str, _post_id: &str, _record: &Record) {}

    async fn remove(&self, _user_id: &str, _post_id: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_always_misses() {
        let cache = NoopCache::new();
        let record = Record::create("u1", "hello");
        cache.add("u1", &record.post_id, &record).await;
        assert!(cache.get("u1", &record.post_id).await.is_none());
        cache.remove("u1", &record.post_id).await;
        assert_eq!(cache.stats().hit_rate(), 0.0);
    }
}
