//! In-process driver whose bulk clears require admin credentials

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use super::in_memory::MemoryStore;
use crate::domain::cache::{
    resolve_duration, CacheDriver, CleanType, Clock, DriverKind, InputType, InvalidationEpoch,
    KeyNormalizer, SettingField, SettingsForm,
};

const KEY_SUFFIX: &str = "-gated";

/// Admin user/password pair the backend wants before it drops its contents
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AdminCredentials {
    pub user: String,
    pub password: String,
}

impl AdminCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    fn is_complete(&self) -> bool {
        !self.user.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for the gated in-process driver
#[derive(Debug, Clone)]
pub struct GatedMemoryConfig {
    pub prefix: String,
    pub default_ttl: Duration,
    pub max_capacity: u64,
    pub admin: Option<AdminCredentials>,
}

impl Default for GatedMemoryConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            default_ttl: Duration::from_secs(120),
            max_capacity: 10_000,
            admin: None,
        }
    }
}

impl GatedMemoryConfig {
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

    pub fn with_admin(mut self, admin: AdminCredentials) -> Self {
        self.admin = Some(admin);
        self
    }
}

/// In-process cache that only clears its memory for an authenticated admin.
///
/// Without credentials a clear still bumps the invalidation epoch, so old
/// entries become unreachable, but reports `false` because the memory itself
/// was not released.
#[derive(Debug)]
pub struct GatedMemoryDriver {
    store: MemoryStore,
    normalizer: KeyNormalizer,
    epoch: InvalidationEpoch,
    config: GatedMemoryConfig,
}

impl GatedMemoryDriver {
    pub fn new(config: GatedMemoryConfig, epoch: InvalidationEpoch, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: MemoryStore::new(config.max_capacity, clock),
            normalizer: KeyNormalizer::new(config.prefix.clone()).with_suffix(KEY_SUFFIX),
            epoch,
            config,
        }
    }

    fn key(&self, key: &str) -> String {
        self.normalizer.normalize(self.epoch.current(), key)
    }

    fn has_admin(&self) -> bool {
        self.config
            .admin
            .as_ref()
            .is_some_and(AdminCredentials::is_complete)
    }

    pub async fn len(&self) -> u64 {
        self.store.len().await
    }
}

#[async_trait]
impl CacheDriver for GatedMemoryDriver {
    fn name(&self) -> &'static str {
        "gated_memory"
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
        let max_age = resolve_duration(max_age, self.config.default_ttl);
        self.store.get_fresh(&self.key(key), max_age).await
    }

    async fn put_data(&self, key: &str, value: Option<&str>, ttl: Option<Duration>) -> bool {
        let key = self.key(key);

        match value {
            Some(value) => {
                let ttl = resolve_duration(ttl, self.config.default_ttl);
                self.store.insert(key, value, ttl).await;
            }
            None => {
                self.store.remove(&key).await;
            }
        }
        true
    }

    async fn clean_cache(&self, kind: CleanType) -> bool {
        // the epoch moves even when the clear itself is refused
        let bumped = self.invalidate_cache().await;

        if kind == CleanType::Expired {
            return bumped;
        }

        if !self.has_admin() {
            warn!(
                driver = self.name(),
                "Refusing to clear cache without admin credentials; entries invalidated by epoch only"
            );
            return false;
        }

        self.store.clear().await;
        bumped
    }

    async fn get_version(&self) -> Option<String> {
        Some(format!("gated-memory {}", env!("CARGO_PKG_VERSION")))
    }

    async fn housekeeping(&self) {
        self.store.purge_expired().await;
    }

    fn cache_settings(&self, form: &mut SettingsForm) {
        let user = self
            .config
            .admin
            .as_ref()
            .map(|a| a.user.clone())
            .unwrap_or_default();

        form.push(
            SettingField::new("cache_admin_user", "Cache admin user", InputType::Text)
                .with_value(user),
        );
        form.push(
            SettingField::new("cache_admin_password", "Cache admin password", InputType::Password)
                .with_subtext("Required to clear the cache from the admin panel"),
        );
        form.toggle_with_backend("gated_memory", &["cache_admin_user", "cache_admin_password"]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::ManualClock;

    fn driver(admin: Option<AdminCredentials>) -> GatedMemoryDriver {
        let mut config = GatedMemoryConfig::default().with_prefix("app");
        config.admin = admin;

        GatedMemoryDriver::new(
            config,
            InvalidationEpoch::starting_at(1),
            Arc::new(ManualClock::new(1_000)),
        )
    }

    #[tokio::test]
    async fn test_clean_without_credentials_invalidates_but_reports_failure() {
        let driver = driver(None);

        driver.put_data("k", Some("v"), None).await;
        let before = driver.epoch().current();

        assert!(!driver.clean_cache(CleanType::All).await);

        assert_eq!(driver.epoch().current(), before + 1);
        assert_eq!(driver.get_data("k", None).await, None);
        // memory is still held, just unreachable
        assert_eq!(driver.len().await, 1);
    }

    #[tokio::test]
    async fn test_clean_with_credentials_releases_memory() {
        let driver = driver(Some(AdminCredentials::new("admin", "secret")));

        driver.put_data("k", Some("v"), None).await;

        assert!(driver.clean_cache(CleanType::All).await);
        assert_eq!(driver.len().await, 0);
    }

    #[tokio::test]
    async fn test_blank_password_counts_as_missing() {
        let driver = driver(Some(AdminCredentials::new("admin", "")));
        driver.put_data("k", Some("v"), None).await;

        assert!(!driver.clean_cache(CleanType::Data).await);
    }

    #[tokio::test]
    async fn test_expired_clean_is_ignored_but_bumps_epoch() {
        let driver = driver(None);
        let before = driver.epoch().current();

        assert!(driver.clean_cache(CleanType::Expired).await);
        assert_eq!(driver.epoch().current(), before + 1);
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = AdminCredentials::new("admin", "hunter2");
        let rendered = format!("{:?}", creds);

        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_cache_settings_fields() {
        let driver = driver(Some(AdminCredentials::new("root", "pw")));
        let mut form = SettingsForm::new();

        driver.cache_settings(&mut form);

        assert_eq!(form.fields.len(), 2);
        assert_eq!(
            form.field("cache_admin_user").and_then(|f| f.value.clone()),
            Some("root".to_string())
        );
        assert_eq!(form.scripts.len(), 1);
    }
}
