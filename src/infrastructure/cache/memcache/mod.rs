//! Memcached-protocol drivers

mod endpoint;
mod pooled;
mod protocol;
mod registry;
mod single;

#[cfg(test)]
pub(crate) mod fake_server;

use std::time::Duration;

pub use endpoint::{Endpoint, ServerPool};
pub use pooled::MemcachedDriver;
pub use protocol::{expiration_time, Connection, EpochRecord, MAX_ITEM_SIZE};
pub use registry::{PersistentConnections, ServerRegistry};
pub use single::MemcacheDriver;

use crate::domain::cache::{CacheEntry, InputType, SettingField, SettingsForm};
use crate::domain::DomainError;

/// Port used when a server entry names only a host
pub const DEFAULT_PORT: u16 = 11211;

/// Configuration shared by both memcached drivers
#[derive(Debug, Clone)]
pub struct MemcacheConfig {
    /// Namespace prepended to every key
    pub prefix: String,
    /// TTL and freshness window used when the caller gives none
    pub default_ttl: Duration,
    /// Comma-separated `host[:port]` entries or socket paths
    pub servers: String,
    /// Keep connections/server lists alive across driver instances
    pub persistent: bool,
    /// Key under which persistent state is shared
    pub persistent_id: String,
    /// Per-endpoint connect timeout
    pub connect_timeout: Duration,
    /// Upper bound on one request/response exchange
    pub request_timeout: Duration,
}

impl Default for MemcacheConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            default_ttl: Duration::from_secs(120),
            servers: String::new(),
            persistent: false,
            persistent_id: "default".to_string(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
        }
    }
}

impl MemcacheConfig {
    pub fn new(servers: impl Into<String>) -> Self {
        Self {
            servers: servers.into(),
            ..Default::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_persistent_id(mut self, id: impl Into<String>) -> Self {
        self.persistent = true;
        self.persistent_id = id.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn pool(&self) -> Result<ServerPool, DomainError> {
        ServerPool::parse(&self.servers, DEFAULT_PORT)
    }
}

/// Wraps `value` in an envelope and returns it with the `set` expiration
fn encode_entry(value: &str, now: i64, ttl: Duration) -> Result<(String, i64), DomainError> {
    let entry = CacheEntry::new(value, now, ttl);
    let exptime = expiration_time(entry.ttl_secs(), now);
    Ok((entry.encode()?, exptime))
}

/// Unwraps a stored envelope if it satisfies the freshness window
fn decode_fresh(raw: Vec<u8>, now: i64, max_age: Duration) -> Option<String> {
    let raw = String::from_utf8(raw).ok()?;
    let entry = CacheEntry::decode(&raw)?;
    entry.is_fresh(now, max_age).then_some(entry.value)
}

fn push_server_settings(form: &mut SettingsForm, backend: &str, servers: &str) {
    form.push(
        SettingField::new("cache_memcached", "Memcached servers", InputType::Text)
            .with_value(servers)
            .with_subtext("Comma separated host:port entries or socket paths"),
    );
    form.toggle_with_backend(backend, &["cache_memcached"]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip_keeps_falsy_values() {
        let (raw, exptime) = encode_entry("0", 1_000, Duration::from_secs(60)).unwrap();

        assert_eq!(exptime, 60);
        assert_eq!(
            decode_fresh(raw.into_bytes(), 1_010, Duration::from_secs(60)),
            Some("0".to_string())
        );
    }

    #[test]
    fn test_decode_rejects_foreign_data() {
        assert_eq!(decode_fresh(b"plain".to_vec(), 0, Duration::from_secs(60)), None);
        assert_eq!(decode_fresh(vec![0xff, 0xfe], 0, Duration::from_secs(60)), None);
    }

    #[test]
    fn test_persistent_id_enables_persistence() {
        let config = MemcacheConfig::new("a:1").with_persistent_id("forum");

        assert!(config.persistent);
        assert_eq!(config.persistent_id, "forum");
    }
}
