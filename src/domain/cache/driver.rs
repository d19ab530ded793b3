//! Cache driver contract

use std::fmt::{self, Debug};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use super::epoch::InvalidationEpoch;
use super::settings::SettingsForm;
use crate::domain::DomainError;

/// Which family of backend a driver belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// Single-host memory, no network hop
    InProcess,
    /// External memory-object daemons
    Distributed,
    /// An SQL table with an explicit expiry column
    Relational,
}

/// What a bulk clear should remove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanType {
    #[default]
    All,
    Data,
    User,
    Expired,
}

impl fmt::Display for CleanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanType::All => write!(f, "all"),
            CleanType::Data => write!(f, "data"),
            CleanType::User => write!(f, "user"),
            CleanType::Expired => write!(f, "expired"),
        }
    }
}

impl FromStr for CleanType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "all" => Ok(CleanType::All),
            "data" => Ok(CleanType::Data),
            "user" => Ok(CleanType::User),
            "expired" => Ok(CleanType::Expired),
            other => Err(DomainError::configuration(format!(
                "Unknown clean type: {}. Valid types: all, data, user, expired",
                other
            ))),
        }
    }
}

/// Falls back to `default` when a TTL or freshness window is absent or zero
pub fn resolve_duration(value: Option<Duration>, default: Duration) -> Duration {
    value.filter(|d| !d.is_zero()).unwrap_or(default)
}

/// Uniform contract over every storage backend.
///
/// Operations never fail for ordinary unavailability: a read that cannot be
/// served is a miss (`None`), a mutation that cannot be applied returns
/// `false`. Implementations log the underlying [`DomainError`] and move on.
#[async_trait]
pub trait CacheDriver: Send + Sync + Debug {
    /// Short backend identifier, e.g. `"memcached"`
    fn name(&self) -> &'static str;

    fn kind(&self) -> DriverKind;

    /// Whether the backend client is present at all
    fn backend_available(&self) -> bool;

    /// Driver-specific requirements on top of availability (servers
    /// configured, credentials present, ...)
    fn preconditions_met(&self) -> bool {
        true
    }

    /// `test = true` only checks availability; otherwise the driver's own
    /// preconditions must hold as well.
    fn is_supported(&self, test: bool) -> bool {
        self.backend_available() && (test || self.preconditions_met())
    }

    fn epoch(&self) -> &InvalidationEpoch;

    /// Establishes backend state. Calling it again while connected is safe.
    async fn connect(&self) -> bool;

    /// Returns the value stored under `key` if it was written no more than
    /// `max_age` ago and has not expired. `None` falls back to the driver's
    /// default TTL.
    async fn get_data(&self, key: &str, max_age: Option<Duration>) -> Option<String>;

    /// Stores `value` for `ttl`. A `None` value deletes the key.
    async fn put_data(&self, key: &str, value: Option<&str>, ttl: Option<Duration>) -> bool;

    /// Bulk-clears cached data and bumps the invalidation epoch
    async fn clean_cache(&self, kind: CleanType) -> bool;

    /// Makes every key written so far unreachable without clearing any
    /// data. Drivers over a shared backend record the new generation there.
    async fn invalidate_cache(&self) -> bool {
        self.epoch().bump();
        true
    }

    /// Backend software version, for diagnostics
    async fn get_version(&self) -> Option<String>;

    /// Periodic cleanup for backends that do not expire on their own
    async fn housekeeping(&self) {}

    /// Appends backend-specific fields to an admin settings form
    fn cache_settings(&self, _form: &mut SettingsForm) {}

    /// Releases a held connection
    async fn quit(&self) -> bool {
        true
    }
}

/// Typed helpers over the raw string contract
pub trait CacheExt: CacheDriver {
    /// Reads and deserializes a JSON value. Undecodable data is a miss.
    fn get<'a, V>(
        &'a self,
        key: &'a str,
        max_age: Option<Duration>,
    ) -> impl Future<Output = Option<V>> + Send + 'a
    where
        V: DeserializeOwned + Send + 'a,
    {
        async move {
            let raw = self.get_data(key, max_age).await?;

            match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    if !raw.is_empty() {
                        warn!(driver = self.name(), key, error = %e, "Discarding undecodable cache value");
                    }
                    None
                }
            }
        }
    }

    /// Serializes `value` as JSON and stores it. `None` deletes the key.
    fn put<'a, V>(
        &'a self,
        key: &'a str,
        value: Option<&'a V>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = bool> + Send + 'a
    where
        V: Serialize + Sync + ?Sized + 'a,
    {
        async move {
            let Some(value) = value else {
                return self.put_data(key, None, ttl).await;
            };

            match serde_json::to_string(value) {
                Ok(data) => self.put_data(key, Some(&data), ttl).await,
                Err(e) => {
                    warn!(driver = self.name(), key, error = %e, "Failed to serialize cache value");
                    false
                }
            }
        }
    }

    /// Read-through memoization: returns the cached value if it is fresher
    /// than `ttl`, otherwise computes it, stores it and returns it.
    fn get_or_compute<'a, V, F, Fut>(
        &'a self,
        key: &'a str,
        ttl: Duration,
        compute: F,
    ) -> impl Future<Output = V> + Send + 'a
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'a,
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = V> + Send + 'a,
    {
        async move {
            if let Some(hit) = self.get::<V>(key, Some(ttl)).await {
                return hit;
            }

            let value = compute().await;
            self.put(key, Some(&value), Some(ttl)).await;
            value
        }
    }
}

impl<T: CacheDriver + ?Sized> CacheExt for T {}


#[cfg(test)]
mod tests {
    use super::mock::MockDriver;
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_clean_type_from_str() {
        assert_eq!("".parse::<CleanType>().unwrap(), CleanType::All);
        assert_eq!("ALL".parse::<CleanType>().unwrap(), CleanType::All);
        assert_eq!("data".parse::<CleanType>().unwrap(), CleanType::Data);
        assert_eq!("user".parse::<CleanType>().unwrap(), CleanType::User);
        assert_eq!("expired".parse::<CleanType>().unwrap(), CleanType::Expired);
        assert!("system".parse::<CleanType>().is_err());
    }

    #[test]
    fn test_resolve_duration() {
        let default = Duration::from_secs(120);

        assert_eq!(resolve_duration(None, default), default);
        assert_eq!(resolve_duration(Some(Duration::ZERO), default), default);
        assert_eq!(
            resolve_duration(Some(Duration::from_secs(5)), default),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_is_supported_composition() {
        #[derive(Debug)]
        struct NoServers(InvalidationEpoch);

        #[async_trait]
        impl CacheDriver for NoServers {
            fn name(&self) -> &'static str {
                "no-servers"
            }
            fn kind(&self) -> DriverKind {
                DriverKind::Distributed
            }
            fn backend_available(&self) -> bool {
                true
            }
            fn preconditions_met(&self) -> bool {
                false
            }
            fn epoch(&self) -> &InvalidationEpoch {
                &self.0
            }
            async fn connect(&self) -> bool {
                false
            }
            async fn get_data(&self, _key: &str, _max_age: Option<Duration>) -> Option<String> {
                None
            }
            async fn put_data(&self, _key: &str, _value: Option<&str>, _ttl: Option<Duration>) -> bool {
                false
            }
            async fn clean_cache(&self, _kind: CleanType) -> bool {
                false
            }
            async fn get_version(&self) -> Option<String> {
                None
            }
        }

        let driver = NoServers(InvalidationEpoch::starting_at(0));
        assert!(driver.is_supported(true));
        assert!(!driver.is_supported(false));
    }

    #[tokio::test]
    async fn test_default_invalidate_bumps_epoch() {
        let driver = MockDriver::new();
        let before = driver.epoch().current();

        assert!(driver.invalidate_cache().await);
        assert_eq!(driver.epoch().current(), before + 1);
    }

    #[tokio::test]
    async fn test_typed_put_and_get() {
        let driver = MockDriver::new();
        let mut avatar = HashMap::new();
        avatar.insert("filename".to_string(), "x.png".to_string());

        assert!(driver.put("avatar", Some(&avatar), None).await);

        let cached: Option<HashMap<String, String>> = driver.get("avatar", None).await;
        assert_eq!(cached, Some(avatar));
    }

    #[tokio::test]
    async fn test_typed_put_none_deletes() {
        let driver = MockDriver::new().with_raw("k", "1");

        assert!(driver.put::<i32>("k", None, None).await);
        assert_eq!(driver.get::<i32>("k", None).await, None);
    }

    #[tokio::test]
    async fn test_empty_placeholder_reads_as_miss() {
        let driver = MockDriver::new().with_raw("k", "");
        assert_eq!(driver.get::<String>("k", None).await, None);
    }

    #[tokio::test]
    async fn test_get_or_compute_only_computes_on_miss() {
        let driver = MockDriver::new();
        let ttl = Duration::from_secs(60);

        let first = driver.get_or_compute("answer", ttl, || async { 42u32 }).await;
        let second = driver.get_or_compute("answer", ttl, || async { 7u32 }).await;

        assert_eq!(first, 42);
        assert_eq!(second, 42);
        assert_eq!(*driver.writes.lock().unwrap(), 1);
    }
}
