//! SQLite cache driver

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info, warn};

use super::relational::{
    cache_table_name, epoch_column, freshness_threshold, stored_epoch, EpochQueries,
};
use crate::domain::cache::{
    resolve_duration, CacheDriver, CleanType, Clock, DriverKind, EpochStore, InvalidationEpoch,
    KeyNormalizer, SQL_MAX_KEY_LEN,
};
use crate::domain::DomainError;

/// SQLite driver configuration
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file, created if missing
    pub path: PathBuf,
    /// Prefix of the `cache` table name
    pub table_prefix: String,
    /// Namespace prepended to every key
    pub prefix: String,
    /// TTL and freshness window used when the caller gives none
    pub default_ttl: Duration,
    /// Pool acquire timeout
    pub connect_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cache.sqlite"),
            table_prefix: String::new(),
            prefix: String::new(),
            default_ttl: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl SqliteConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// The namespace's epoch row, read and written through the pool
struct SqliteEpoch<'a> {
    pool: &'a SqlitePool,
    queries: &'a EpochQueries,
    key: String,
}

#[async_trait]
impl<'a> EpochStore for SqliteEpoch<'a> {
    async fn load(&mut self) -> Result<Option<u64>, DomainError> {
        let row = sqlx::query(&self.queries.load)
            .bind(&self.key)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to read epoch row: {}", e)))?;

        Ok(row
            .and_then(|row| row.try_get::<i64, _>(0).ok())
            .and_then(stored_epoch))
    }

    async fn store_if_absent(&mut self, value: u64) -> Result<bool, DomainError> {
        let result = sqlx::query(&self.queries.insert_absent)
            .bind(&self.key)
            .bind(epoch_column(value)?)
            .execute(self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to record epoch: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    async fn store(&mut self, value: u64) -> Result<(), DomainError> {
        sqlx::query(&self.queries.upsert)
            .bind(&self.key)
            .bind(epoch_column(value)?)
            .execute(self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to record epoch: {}", e)))?;
        Ok(())
    }

    async fn increment(&mut self) -> Result<Option<u64>, DomainError> {
        let row = sqlx::query(&self.queries.increment)
            .bind(&self.key)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to advance epoch: {}", e)))?;

        Ok(row
            .and_then(|row| row.try_get::<i64, _>(0).ok())
            .and_then(stored_epoch))
    }
}

/// Rows live in `{table_prefix}cache (key, value, ttl)` where `ttl` is the
/// absolute expiry in unix seconds. One extra row per namespace holds the
/// invalidation epoch.
pub struct SqliteDriver {
    pool: SqlitePool,
    table: String,
    epoch_queries: EpochQueries,
    config: SqliteConfig,
    bootstrapped: AtomicBool,
    normalizer: KeyNormalizer,
    epoch: InvalidationEpoch,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("path", &self.config.path)
            .field("table", &self.table)
            .finish()
    }
}

impl SqliteDriver {
    /// Builds the driver without touching the database; the pool connects
    /// on first use
    pub fn new(
        config: SqliteConfig,
        epoch: InvalidationEpoch,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DomainError> {
        let table = cache_table_name(&config.table_prefix)?;

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(config.connect_timeout)
            .connect_lazy_with(options);

        Ok(Self {
            pool,
            epoch_queries: EpochQueries::new(&table, |_| "?".to_string()),
            table,
            normalizer: KeyNormalizer::new(config.prefix.clone()).with_max_len(SQL_MAX_KEY_LEN),
            config,
            bootstrapped: AtomicBool::new(false),
            epoch,
            clock,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn epoch_record(&self) -> SqliteEpoch<'_> {
        SqliteEpoch {
            pool: &self.pool,
            queries: &self.epoch_queries,
            key: self.normalizer.epoch_key(),
        }
    }

    /// Adopts the table's epoch and returns `key` normalized under it
    async fn synced_key(&self, key: &str) -> Result<String, DomainError> {
        let epoch = self
            .epoch
            .sync(&mut self.epoch_record(), self.clock.as_ref())
            .await?;
        Ok(self.normalizer.normalize(epoch, key))
    }

    async fn advance_epoch(&self) -> bool {
        match self.epoch.advance(&mut self.epoch_record(), self.clock.as_ref()).await {
            Ok(_) => true,
            Err(e) => {
                warn!(driver = self.name(), error = %e, "Failed to advance shared epoch");
                self.epoch.bump();
                false
            }
        }
    }

    async fn table_exists(&self) -> Result<bool, DomainError> {
        let row = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(&self.table)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to inspect sqlite_master: {}", e)))?;

        Ok(row.is_some())
    }

    /// Creates the cache table unless the catalog already lists it
    async fn bootstrap(&self) -> Result<(), DomainError> {
        if self.table_exists().await? {
            debug!(table = %self.table, "Cache table already present");
            return Ok(());
        }

        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL DEFAULT '',
                ttl INTEGER NOT NULL DEFAULT 0
            )
            "#,
            self.table
        );

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to create table: {}", e)))?;

        info!(table = %self.table, path = %self.config.path.display(), "Created SQLite cache table");
        Ok(())
    }

    async fn ensure_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::Acquire) || self.connect().await
    }

    async fn purge_expired(&self) -> Result<u64, DomainError> {
        let query = format!("DELETE FROM {} WHERE ttl < ?", self.table);

        let result = sqlx::query(&query)
            .bind(self.clock.now())
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to purge expired rows: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn vacuum(&self) -> Result<(), DomainError> {
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to vacuum: {}", e)))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), DomainError> {
        let query = format!("DELETE FROM {}", self.table);

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to clear table: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl CacheDriver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Relational
    }

    fn backend_available(&self) -> bool {
        true
    }

    fn epoch(&self) -> &InvalidationEpoch {
        &self.epoch
    }

    async fn connect(&self) -> bool {
        if self.bootstrapped.load(Ordering::Acquire) {
            return true;
        }

        match self.bootstrap().await {
            Ok(()) => {
                self.bootstrapped.store(true, Ordering::Release);
                true
            }
            Err(e) => {
                warn!(driver = self.name(), error = %e, "Failed to bootstrap cache table");
                false
            }
        }
    }

    async fn get_data(&self, key: &str, max_age: Option<Duration>) -> Option<String> {
        if !self.ensure_bootstrapped().await {
            return None;
        }

        let key = match self.synced_key(key).await {
            Ok(key) => key,
            Err(e) => {
                warn!(driver = self.name(), error = %e, "Failed to sync epoch");
                return None;
            }
        };
        let max_age = resolve_duration(max_age, self.config.default_ttl);
        let query = format!("SELECT value FROM {} WHERE key = ? AND ttl >= ?", self.table);

        let row = sqlx::query(&query)
            .bind(&key)
            .bind(freshness_threshold(self.clock.now(), max_age.as_secs()))
            .fetch_optional(&self.pool)
            .await;

        match row {
            Ok(row) => row.and_then(|row| row.try_get::<String, _>("value").ok()),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cache row");
                None
            }
        }
    }

    async fn put_data(&self, key: &str, value: Option<&str>, ttl: Option<Duration>) -> bool {
        if !self.ensure_bootstrapped().await {
            return false;
        }

        let key = match self.synced_key(key).await {
            Ok(key) => key,
            Err(e) => {
                warn!(driver = self.name(), error = %e, "Failed to sync epoch");
                return false;
            }
        };
        let ttl = resolve_duration(ttl, self.config.default_ttl);
        let query = format!(
            "INSERT OR REPLACE INTO {} (key, value, ttl) VALUES (?, ?, ?)",
            self.table
        );

        let result = sqlx::query(&query)
            .bind(&key)
            .bind(value.unwrap_or(""))
            .bind(self.clock.now() + ttl.as_secs() as i64)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to write cache row");
                false
            }
        }
    }

    async fn clean_cache(&self, kind: CleanType) -> bool {
        if !self.ensure_bootstrapped().await {
            self.epoch.bump();
            return false;
        }

        let result = match kind {
            CleanType::Expired => match self.purge_expired().await {
                Ok(purged) => {
                    debug!(purged, "Purged expired cache rows");
                    self.vacuum().await
                }
                Err(e) => Err(e),
            },
            _ => self.clear().await,
        };

        if let Err(e) = result {
            warn!(driver = self.name(), error = %e, "Failed to clean cache table");
            self.epoch.bump();
            return false;
        }

        self.advance_epoch().await
    }

    async fn invalidate_cache(&self) -> bool {
        if !self.ensure_bootstrapped().await {
            self.epoch.bump();
            return false;
        }
        self.advance_epoch().await
    }

    async fn get_version(&self) -> Option<String> {
        match sqlx::query("SELECT sqlite_version()")
            .fetch_one(&self.pool)
            .await
        {
            Ok(row) => row.try_get::<String, _>(0).ok(),
            Err(e) => {
                warn!(error = %e, "Failed to query SQLite version");
                None
            }
        }
    }

    async fn housekeeping(&self) {
        if !self.ensure_bootstrapped().await {
            return;
        }

        match self.purge_expired().await {
            Ok(purged) => {
                if let Err(e) = self.vacuum().await {
                    warn!(error = %e, "Housekeeping vacuum failed");
                }
                info!(driver = self.name(), purged, "Housekeeping finished");
            }
            Err(e) => warn!(driver = self.name(), error = %e, "Housekeeping failed"),
        }
    }

    async fn quit(&self) -> bool {
        self.pool.close().await;
        true
    }
}
