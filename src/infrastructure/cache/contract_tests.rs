//! Behaviour every driver must share, checked against each backend that can
//! run without external services

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::factory::{CacheConfig, CacheFactory, CacheType};
use super::gated_memory::AdminCredentials;
use super::memcache::fake_server::FakeMemcached;
use crate::domain::cache::{CacheDriver, CacheExt, CleanType, DriverKind, ManualClock};

struct Harness {
    clock: ManualClock,
    drivers: Vec<Arc<dyn CacheDriver>>,
    _servers: Vec<FakeMemcached>,
    _dir: TempDir,
}

impl Harness {
    async fn start() -> Self {
        let clock = ManualClock::new(1_000_000);
        let factory = CacheFactory::with_clock(Arc::new(clock.clone()));
        let dir = TempDir::new().unwrap();
        let memcache = FakeMemcached::start().await;
        let memcached = FakeMemcached::start().await;

        let configs = vec![
            CacheConfig::new(CacheType::SharedMemory),
            CacheConfig::new(CacheType::GatedMemory).with_admin(AdminCredentials::new("admin", "secret")),
            CacheConfig::distributed(CacheType::Memcache, memcache.address()),
            CacheConfig::distributed(CacheType::Memcached, memcached.address()),
            CacheConfig::sqlite(dir.path().join("cache.sqlite")).with_table_prefix("phpbb_"),
        ];

        let mut drivers = Vec::new();
        for config in configs {
            let driver = factory.create(&config.with_prefix("forum")).unwrap();
            assert!(driver.connect().await, "{} failed to connect", driver.name());
            drivers.push(driver);
        }

        Self {
            clock,
            drivers,
            _servers: vec![memcache, memcached],
            _dir: dir,
        }
    }
}

#[tokio::test]
async fn test_round_trip() {
    let harness = Harness::start().await;

    for driver in &harness.drivers {
        assert!(driver.put_data("topic_17", Some("payload"), None).await, "{}", driver.name());
        assert_eq!(
            driver.get_data("topic_17", None).await,
            Some("payload".to_string()),
            "{}",
            driver.name()
        );
    }
}

#[tokio::test]
async fn test_typed_round_trip_keeps_falsy_values() {
    let harness = Harness::start().await;

    for driver in &harness.drivers {
        driver.put("zero", Some(&0u32), None).await;
        driver.put("empty", Some(&""), None).await;

        assert_eq!(driver.get::<u32>("zero", None).await, Some(0), "{}", driver.name());
        assert_eq!(
            driver.get::<String>("empty", None).await,
            Some(String::new()),
            "{}",
            driver.name()
        );
    }
}

#[tokio::test]
async fn test_null_write_deletes() {
    let harness = Harness::start().await;

    for driver in &harness.drivers {
        driver.put_data("k", Some("v"), None).await;
        assert!(driver.put_data("k", None, None).await, "{}", driver.name());

        let expected = match driver.kind() {
            DriverKind::Relational => Some(String::new()),
            _ => None,
        };
        assert_eq!(driver.get_data("k", None).await, expected, "{}", driver.name());
    }
}

#[tokio::test]
async fn test_clean_all_invalidates() {
    let harness = Harness::start().await;

    for driver in &harness.drivers {
        driver.put_data("k", Some("v"), None).await;
        let before = driver.epoch().current();

        assert!(driver.clean_cache(CleanType::All).await, "{}", driver.name());
        assert!(driver.epoch().current() > before, "{}", driver.name());
        assert_eq!(driver.get_data("k", None).await, None, "{}", driver.name());
    }
}

#[tokio::test]
async fn test_epoch_bump_alone_invalidates() {
    let harness = Harness::start().await;

    for driver in &harness.drivers {
        driver.put_data("k", Some("v"), None).await;

        assert!(driver.invalidate_cache().await, "{}", driver.name());
        assert_eq!(driver.get_data("k", None).await, None, "{}", driver.name());
    }
}

#[tokio::test]
async fn test_avatar_freshness_scenario() {
    let harness = Harness::start().await;
    let ttl = Some(Duration::from_secs(600));

    let non_relational: Vec<_> = harness
        .drivers
        .iter()
        .filter(|driver| driver.kind() != DriverKind::Relational)
        .collect();

    for driver in &non_relational {
        driver.put_data("avatar_42", Some("/images/avatars/42.png"), ttl).await;
    }

    harness.clock.advance(Duration::from_secs(300));
    for driver in &non_relational {
        assert_eq!(
            driver.get_data("avatar_42", ttl).await,
            Some("/images/avatars/42.png".to_string()),
            "{}",
            driver.name()
        );
    }

    harness.clock.advance(Duration::from_secs(301));
    for driver in &non_relational {
        assert_eq!(driver.get_data("avatar_42", ttl).await, None, "{}", driver.name());
    }
}

#[tokio::test]
async fn test_get_or_compute_caches_once() {
    let harness = Harness::start().await;

    for driver in &harness.drivers {
        let ttl = Duration::from_secs(60);
        let first = driver.get_or_compute("stats", ttl, || async { 42u32 }).await;
        let second = driver.get_or_compute("stats", ttl, || async { 7u32 }).await;

        assert_eq!(first, 42, "{}", driver.name());
        assert_eq!(second, 42, "{}", driver.name());
    }
}

#[tokio::test]
async fn test_every_driver_reports_a_version() {
    let harness = Harness::start().await;

    for driver in &harness.drivers {
        assert!(driver.get_version().await.is_some(), "{}", driver.name());
        assert!(driver.quit().await, "{}", driver.name());
    }
}
