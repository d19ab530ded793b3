//! Cache factory for runtime selection

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::domain::cache::{CacheDriver, Clock, InvalidationEpoch, SystemClock};
use crate::domain::DomainError;

use super::gated_memory::{AdminCredentials, GatedMemoryConfig, GatedMemoryDriver};
use super::memcache::{
    MemcacheConfig, MemcacheDriver, MemcachedDriver, PersistentConnections, ServerRegistry,
};
use super::postgres::{PostgresConfig, PostgresDriver};
use super::redis::{RedisConfig, RedisDriver};
use super::shared_memory::{SharedMemoryConfig, SharedMemoryDriver};
use super::sqlite::{SqliteConfig, SqliteDriver};

/// Supported cache backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum CacheType {
    /// Per-host memory with user and system segments
    #[default]
    SharedMemory,
    /// Per-host memory that needs admin credentials to clear
    GatedMemory,
    /// One connection to one memcached server
    Memcache,
    /// Key-hashed memcached server pool
    Memcached,
    Redis,
    Postgres,
    Sqlite,
}

impl CacheType {
    pub const ALL: [CacheType; 7] = [
        CacheType::SharedMemory,
        CacheType::GatedMemory,
        CacheType::Memcache,
        CacheType::Memcached,
        CacheType::Redis,
        CacheType::Postgres,
        CacheType::Sqlite,
    ];
}

impl std::fmt::Display for CacheType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheType::SharedMemory => write!(f, "shared_memory"),
            CacheType::GatedMemory => write!(f, "gated_memory"),
            CacheType::Memcache => write!(f, "memcache"),
            CacheType::Memcached => write!(f, "memcached"),
            CacheType::Redis => write!(f, "redis"),
            CacheType::Postgres => write!(f, "postgres"),
            CacheType::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for CacheType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "shared_memory" | "apcu" | "memory" => Ok(CacheType::SharedMemory),
            "gated_memory" | "xcache" => Ok(CacheType::GatedMemory),
            "memcache" => Ok(CacheType::Memcache),
            "memcached" => Ok(CacheType::Memcached),
            "redis" => Ok(CacheType::Redis),
            "postgres" | "postgresql" | "pg" => Ok(CacheType::Postgres),
            "sqlite" | "sqlite3" => Ok(CacheType::Sqlite),
            _ => Err(DomainError::configuration(format!(
                "Unknown cache type: {}. Valid types: shared_memory, gated_memory, memcache, \
                 memcached, redis, postgres, sqlite",
                s
            ))),
        }
    }
}

impl TryFrom<String> for CacheType {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Configuration for cache factory
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend to create
    pub cache_type: CacheType,
    /// Namespace prepended to every key
    pub prefix: String,
    /// Default TTL and freshness window in seconds
    pub default_ttl_secs: u64,
    /// Comma-separated server list for distributed backends
    pub servers: String,
    /// Share connections/server lists across driver instances
    pub persistent: bool,
    pub persistent_id: String,
    pub connect_timeout_secs: u64,
    /// Upper bound on one request/response exchange with a server
    pub request_timeout_secs: u64,
    /// Credentials the gated backend needs to clear its memory
    pub admin: Option<AdminCredentials>,
    /// PostgreSQL connection URL
    pub database_url: Option<String>,
    /// Prefix of the SQL `cache` table
    pub table_prefix: String,
    pub sqlite_path: PathBuf,
    /// Entry limit for in-process backends
    pub max_capacity: u64,
    pub use_prepared_statements: bool,
    pub refresh_on_housekeeping: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::default(),
            prefix: String::new(),
            default_ttl_secs: 120,
            servers: String::new(),
            persistent: false,
            persistent_id: "default".to_string(),
            connect_timeout_secs: 1,
            request_timeout_secs: 2,
            admin: None,
            database_url: None,
            table_prefix: String::new(),
            sqlite_path: PathBuf::from("cache.sqlite"),
            max_capacity: 10_000,
            use_prepared_statements: true,
            refresh_on_housekeeping: false,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration for the given backend
    pub fn new(cache_type: CacheType) -> Self {
        Self {
            cache_type,
            ..Default::default()
        }
    }

    /// Creates a configuration for a distributed backend
    pub fn distributed(cache_type: CacheType, servers: impl Into<String>) -> Self {
        Self {
            cache_type,
            servers: servers.into(),
            ..Default::default()
        }
    }

    /// Creates a configuration for the PostgreSQL backend
    pub fn postgres(url: impl Into<String>) -> Self {
        Self {
            cache_type: CacheType::Postgres,
            database_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Creates a configuration for the SQLite backend
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            cache_type: CacheType::Sqlite,
            sqlite_path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_persistent_id(mut self, id: impl Into<String>) -> Self {
        self.persistent = true;
        self.persistent_id = id.into();
        self
    }

    pub fn with_admin(mut self, admin: AdminCredentials) -> Self {
        self.admin = Some(admin);
        self
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Creates config from `CACHE_*` environment variables
    pub fn from_env() -> Result<Self, DomainError> {
        let defaults = Self::default();

        let cache_type = std::env::var("CACHE_TYPE")
            .unwrap_or_else(|_| "shared_memory".to_string())
            .parse()?;

        let admin = match (
            std::env::var("CACHE_ADMIN_USER").ok(),
            std::env::var("CACHE_ADMIN_PASSWORD").ok(),
        ) {
            (Some(user), Some(password)) => Some(AdminCredentials::new(user, password)),
            _ => None,
        };

        let persistent_id = std::env::var("CACHE_PERSISTENT_ID").ok();

        Ok(Self {
            cache_type,
            prefix: std::env::var("CACHE_PREFIX").unwrap_or(defaults.prefix),
            default_ttl_secs: env_parse("CACHE_DEFAULT_TTL_SECS").unwrap_or(defaults.default_ttl_secs),
            servers: std::env::var("CACHE_SERVERS").unwrap_or(defaults.servers),
            persistent: persistent_id.is_some(),
            persistent_id: persistent_id.unwrap_or(defaults.persistent_id),
            connect_timeout_secs: env_parse("CACHE_CONNECT_TIMEOUT_SECS")
                .unwrap_or(defaults.connect_timeout_secs),
            request_timeout_secs: env_parse("CACHE_REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout_secs),
            admin,
            database_url: std::env::var("DATABASE_URL").ok(),
            table_prefix: std::env::var("CACHE_TABLE_PREFIX").unwrap_or(defaults.table_prefix),
            sqlite_path: std::env::var("CACHE_SQLITE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.sqlite_path),
            max_capacity: env_parse("CACHE_MAX_CAPACITY").unwrap_or(defaults.max_capacity),
            use_prepared_statements: env_parse("CACHE_USE_PREPARED_STATEMENTS")
                .unwrap_or(defaults.use_prepared_statements),
            refresh_on_housekeeping: env_parse("CACHE_REFRESH_ON_HOUSEKEEPING")
                .unwrap_or(defaults.refresh_on_housekeeping),
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Factory for creating cache drivers.
///
/// The factory owns the state persistent drivers share: the clock, the
/// parked memcache connections and the memcached server registry. Drivers
/// created from the same factory with the same `persistent_id` see the same
/// state.
#[derive(Debug, Clone)]
pub struct CacheFactory {
    clock: Arc<dyn Clock>,
    parked: PersistentConnections,
    registry: ServerRegistry,
}

impl Default for CacheFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheFactory {
    /// Creates a new cache factory on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            parked: PersistentConnections::new(),
            registry: ServerRegistry::new(),
        }
    }

    pub fn persistent_connections(&self) -> &PersistentConnections {
        &self.parked
    }

    pub fn server_registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Local starting point. Shared backends replace it with the
    /// generation they have recorded on first use.
    fn epoch(&self) -> InvalidationEpoch {
        InvalidationEpoch::new(self.clock.as_ref())
    }

    fn memcache_config(config: &CacheConfig) -> MemcacheConfig {
        MemcacheConfig {
            prefix: config.prefix.clone(),
            default_ttl: config.default_ttl(),
            servers: config.servers.clone(),
            persistent: config.persistent,
            persistent_id: config.persistent_id.clone(),
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
        }
    }

    /// Builds the driver for `config` without connecting it
    pub fn build(&self, config: &CacheConfig) -> Result<Arc<dyn CacheDriver>, DomainError> {
        let epoch = self.epoch();
        let clock = self.clock.clone();

        let driver: Arc<dyn CacheDriver> = match config.cache_type {
            CacheType::SharedMemory => {
                let shm_config = SharedMemoryConfig::default()
                    .with_prefix(config.prefix.clone())
                    .with_default_ttl(config.default_ttl())
                    .with_max_capacity(config.max_capacity);
                Arc::new(SharedMemoryDriver::new(shm_config, epoch, clock))
            }
            CacheType::GatedMemory => {
                let mut gated_config = GatedMemoryConfig::default()
                    .with_prefix(config.prefix.clone())
                    .with_default_ttl(config.default_ttl())
                    .with_max_capacity(config.max_capacity);
                if let Some(admin) = &config.admin {
                    gated_config = gated_config.with_admin(admin.clone());
                }
                Arc::new(GatedMemoryDriver::new(gated_config, epoch, clock))
            }
            CacheType::Memcache => Arc::new(
                MemcacheDriver::new(Self::memcache_config(config), epoch, clock)?
                    .with_persistent_connections(self.parked.clone()),
            ),
            CacheType::Memcached => Arc::new(
                MemcachedDriver::new(Self::memcache_config(config), epoch, clock)?
                    .with_registry(self.registry.clone()),
            ),
            CacheType::Redis => {
                let redis_config = RedisConfig::new(config.servers.clone())
                    .with_prefix(config.prefix.clone())
                    .with_default_ttl(config.default_ttl())
                    .with_connection_timeout(config.connect_timeout())
                    .with_request_timeout(config.request_timeout());
                Arc::new(RedisDriver::new(redis_config, epoch, clock)?)
            }
            CacheType::Postgres => {
                let url = config.database_url.clone().ok_or_else(|| {
                    DomainError::configuration("Database URL is required for postgres cache type")
                })?;
                let pg_config = PostgresConfig::new(url)
                    .with_prefix(config.prefix.clone())
                    .with_table_prefix(config.table_prefix.clone())
                    .with_default_ttl(config.default_ttl())
                    .with_prepared_statements(config.use_prepared_statements)
                    .with_persistent(config.persistent)
                    .with_refresh_on_housekeeping(config.refresh_on_housekeeping);
                Arc::new(PostgresDriver::new(pg_config, epoch, clock)?)
            }
            CacheType::Sqlite => {
                let sqlite_config = SqliteConfig::new(config.sqlite_path.clone())
                    .with_prefix(config.prefix.clone())
                    .with_table_prefix(config.table_prefix.clone())
                    .with_default_ttl(config.default_ttl());
                Arc::new(SqliteDriver::new(sqlite_config, epoch, clock)?)
            }
        };

        Ok(driver)
    }

    /// Builds the driver for `config` and rejects it unless its backend and
    /// preconditions are satisfied
    pub fn create(&self, config: &CacheConfig) -> Result<Arc<dyn CacheDriver>, DomainError> {
        let driver = self.build(config)?;

        if !driver.is_supported(false) {
            return Err(DomainError::unsupported(
                driver.name(),
                format!("{} backend is not usable with this configuration", config.cache_type),
            ));
        }

        debug!(driver = driver.name(), "Cache driver created");
        Ok(driver)
    }
}
