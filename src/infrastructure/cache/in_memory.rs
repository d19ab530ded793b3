//! moka-backed entry store shared by the in-process drivers

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache as MokaCache;
use moka::Expiry;

use crate::domain::cache::{CacheEntry, Clock};

/// Lets moka reclaim each entry once its own TTL has passed
struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(Duration::from_secs(value.ttl_secs()))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(Duration::from_secs(value.ttl_secs()))
    }
}

/// Bounded in-memory segment.
///
/// moka handles capacity eviction and physical expiry; freshness and
/// logical expiry are decided against the injected [`Clock`] so they do not
/// depend on moka's internal timer.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    cache: MokaCache<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(max_capacity: u64, clock: Arc<dyn Clock>) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();

        Self { cache, clock }
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub async fn get_fresh(&self, key: &str, max_age: Duration) -> Option<String> {
        let entry = self.cache.get(key).await?;
        let now = self.now();

        if entry.is_expired(now) {
            self.cache.remove(key).await;
            return None;
        }

        entry.is_fresh(now, max_age).then_some(entry.value)
    }

    pub async fn insert(&self, key: String, value: &str, ttl: Duration) {
        let entry = CacheEntry::new(value, self.now(), ttl);
        self.cache.insert(key, entry).await;
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.cache.remove(key).await.is_some()
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Drops every entry whose logical expiry has passed
    pub async fn purge_expired(&self) -> usize {
        self.cache.run_pending_tasks().await;

        let now = self.now();
        let expired: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key)
            .collect();

        for key in &expired {
            self.cache.invalidate(key.as_str()).await;
        }

        expired.len()
    }

    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::ManualClock;

    fn store(clock: &ManualClock) -> MemoryStore {
        MemoryStore::new(100, Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_insert_and_get_fresh() {
        let clock = ManualClock::new(1_000);
        let store = store(&clock);

        store.insert("k".to_string(), "v", Duration::from_secs(60)).await;

        assert_eq!(
            store.get_fresh("k", Duration::from_secs(60)).await,
            Some("v".to_string())
        );
    }

    #[tokio::test]
    async fn test_logically_expired_entry_is_removed() {
        let clock = ManualClock::new(1_000);
        let store = store(&clock);

        store.insert("k".to_string(), "v", Duration::from_secs(10)).await;
        clock.advance(Duration::from_secs(11));

        assert_eq!(store.get_fresh("k", Duration::from_secs(3600)).await, None);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_entries() {
        let clock = ManualClock::new(1_000);
        let store = store(&clock);

        store.insert("short".to_string(), "a", Duration::from_secs(5)).await;
        store.insert("long".to_string(), "b", Duration::from_secs(500)).await;
        clock.advance(Duration::from_secs(6));

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.get_fresh("long", Duration::from_secs(500)).await.is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let clock = ManualClock::new(1_000);
        let store = store(&clock);

        store.insert("a".to_string(), "1", Duration::from_secs(60)).await;
        store.insert("b".to_string(), "2", Duration::from_secs(60)).await;
        store.clear().await;

        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_remove_reports_presence() {
        let clock = ManualClock::new(1_000);
        let store = store(&clock);

        store.insert("a".to_string(), "1", Duration::from_secs(60)).await;

        assert!(store.remove("a").await);
        assert!(!store.remove("a").await);
    }
}
