//! Shared-memory driver with separate user and system segments

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::in_memory::MemoryStore;
use crate::domain::cache::{
    resolve_duration, CacheDriver, CleanType, Clock, DriverKind, InvalidationEpoch, KeyNormalizer,
};

/// Suffix appended to every key stored in shared memory
const KEY_SUFFIX: &str = "-shm";

/// Configuration for the shared-memory driver
#[derive(Debug, Clone)]
pub struct SharedMemoryConfig {
    /// Namespace prepended to every key
    pub prefix: String,
    /// TTL and freshness window used when the caller gives none
    pub default_ttl: Duration,
    /// Maximum number of entries per segment
    pub max_capacity: u64,
}

impl Default for SharedMemoryConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            default_ttl: Duration::from_secs(120),
            max_capacity: 10_000,
        }
    }
}

impl SharedMemoryConfig {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }
}

/// Which half of shared memory an entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// Application data written through [`CacheDriver::put_data`]
    User,
    /// Entries owned by the host runtime, e.g. compiled templates
    System,
}

/// Single-host cache with no network hop.
///
/// `clean_cache(Data | User)` only touches the user segment, `All` clears
/// both, and `Expired` purges stale entries from both.
#[derive(Debug)]
pub struct SharedMemoryDriver {
    user: MemoryStore,
    system: MemoryStore,
    normalizer: KeyNormalizer,
    epoch: InvalidationEpoch,
    config: SharedMemoryConfig,
}

impl SharedMemoryDriver {
    pub fn new(config: SharedMemoryConfig, epoch: InvalidationEpoch, clock: Arc<dyn Clock>) -> Self {
        Self {
            user: MemoryStore::new(config.max_capacity, clock.clone()),
            system: MemoryStore::new(config.max_capacity, clock),
            normalizer: KeyNormalizer::new(config.prefix.clone()).with_suffix(KEY_SUFFIX),
            epoch,
            config,
        }
    }

    fn segment(&self, segment: Segment) -> &MemoryStore {
        match segment {
            Segment::User => &self.user,
            Segment::System => &self.system,
        }
    }

    fn key(&self, key: &str) -> String {
        self.normalizer.normalize(self.epoch.current(), key)
    }

    /// Reads from an explicit segment
    pub async fn get_in(&self, segment: Segment, key: &str, max_age: Option<Duration>) -> Option<String> {
        let max_age = resolve_duration(max_age, self.config.default_ttl);
        self.segment(segment).get_fresh(&self.key(key), max_age).await
    }

    /// Writes to an explicit segment; `None` deletes
    pub async fn put_in(
        &self,
        segment: Segment,
        key: &str,
        value: Option<&str>,
        ttl: Option<Duration>,
    ) -> bool {
        let store = self.segment(segment);
        let key = self.key(key);

        match value {
            Some(value) => {
                let ttl = resolve_duration(ttl, self.config.default_ttl);
                store.insert(key, value, ttl).await;
            }
            None => {
                store.remove(&key).await;
            }
        }
        true
    }

    pub async fn segment_len(&self, segment: Segment) -> u64 {
        self.segment(segment).len().await
    }
}

#[async_trait]
impl CacheDriver for SharedMemoryDriver {
    fn name(&self) -> &'static str {
        "shared_memory"
    }

    fn kind(&self) -> DriverKind {
        DriverKind::InProcess
    }

    fn backend_available(&self) -> bool {
        true
    }

    fn preconditions_met(&self) -> bool {
        self.config.max_capacity > 0
    }

    fn epoch(&self) -> &InvalidationEpoch {
        &self.epoch
    }

    async fn connect(&self) -> bool {
        true
    }

    async fn get_data(&self, key: &str, max_age: Option<Duration>) -> Option<String> {
        self.get_in(Segment::User, key, max_age).await
    }

    async fn put_data(&self, key: &str, value: Option<&str>, ttl: Option<Duration>) -> bool {
        self.put_in(Segment::User, key, value, ttl).await
    }

    async fn clean_cache(&self, kind: CleanType) -> bool {
        match kind {
            CleanType::All => {
                self.user.clear().await;
                self.system.clear().await;
            }
            CleanType::Data | CleanType::User => self.user.clear().await,
            CleanType::Expired => {
                let purged = self.user.purge_expired().await + self.system.purge_expired().await;
                debug!(purged, "Purged expired shared-memory entries");
            }
        }

        self.invalidate_cache().await
    }

    async fn get_version(&self) -> Option<String> {
        Some(format!("shared-memory {}", env!("CARGO_PKG_VERSION")))
    }

    async fn housekeeping(&self) {
        self.user.purge_expired().await;
        self.system.purge_expired().await;
    }
}
