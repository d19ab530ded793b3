//! Redis cache driver

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult, Script};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::memcache::{Endpoint, ServerPool};
use crate::domain::cache::{
    parse_epoch, resolve_duration, CacheDriver, CacheEntry, CleanType, Clock, DriverKind,
    EpochStore, InputType, InvalidationEpoch, KeyNormalizer, SettingField, SettingsForm,
};
use crate::domain::DomainError;

/// Port used when a server entry names only a host
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Configuration for the Redis driver
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Namespace prepended to every key
    pub prefix: String,
    /// Default TTL for entries without explicit TTL
    pub default_ttl: Duration,
    /// Comma-separated `host[:port]` entries or socket paths
    pub servers: String,
    /// Connection timeout per endpoint
    pub connection_timeout: Duration,
    /// Upper bound on one command round trip
    pub request_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            default_ttl: Duration::from_secs(120),
            servers: "127.0.0.1:6379".to_string(),
            connection_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(2),
        }
    }
}

impl RedisConfig {
    /// Creates a new configuration for the given server list
    pub fn new(servers: impl Into<String>) -> Self {
        Self {
            servers: servers.into(),
            ..Default::default()
        }
    }

    /// Sets the default TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the key prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Sets the per-command timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Redis driver bound to one randomly chosen server.
///
/// Values are stored with `SET EX` inside a [`CacheEntry`] envelope, so the
/// freshness window is still checked on read. The connection is a
/// `ConnectionManager`, which reconnects on its own once established.
pub struct RedisDriver {
    pool: ServerPool,
    config: RedisConfig,
    connection: Mutex<Option<ConnectionManager>>,
    normalizer: KeyNormalizer,
    epoch: InvalidationEpoch,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RedisDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisDriver")
            .field("config", &self.config)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

/// Connection URL understood by `redis::Client::open`
pub fn connection_url(endpoint: &Endpoint) -> String {
    if endpoint.is_socket() {
        format!("redis+unix://{}", endpoint.host)
    } else {
        format!("redis://{}/", endpoint)
    }
}

/// Extracts `redis_version` from an `INFO server` reply
pub fn parse_server_version(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.trim().strip_prefix("redis_version:"))
        .map(str::to_string)
}

/// Increments the epoch only while a numeric record exists
const INCREMENT_EXISTING: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]))
if current == nil then
    return false
end
return redis.call('INCR', KEYS[1])
"#;

/// Runs one command, giving up after `timeout`
async fn bounded<T>(
    timeout: Duration,
    command: impl Future<Output = RedisResult<T>>,
) -> Result<T, DomainError> {
    tokio::time::timeout(timeout, command)
        .await
        .map_err(|_| DomainError::cache("Redis command timed out"))?
        .map_err(|e| DomainError::cache(format!("Redis command failed: {}", e)))
}

/// The epoch record of one namespace, kept as a plain integer key
struct RedisEpoch<'a> {
    conn: &'a mut ConnectionManager,
    key: &'a str,
    timeout: Duration,
}

#[async_trait]
impl<'a> EpochStore for RedisEpoch<'a> {
    async fn load(&mut self) -> Result<Option<u64>, DomainError> {
        let raw: Option<String> = bounded(self.timeout, self.conn.get(self.key)).await?;
        Ok(raw.as_deref().and_then(parse_epoch))
    }

    async fn store_if_absent(&mut self, value: u64) -> Result<bool, DomainError> {
        bounded(self.timeout, self.conn.set_nx(self.key, value)).await
    }

    async fn store(&mut self, value: u64) -> Result<(), DomainError> {
        bounded(self.timeout, self.conn.set::<_, _, ()>(self.key, value)).await
    }

    async fn increment(&mut self) -> Result<Option<u64>, DomainError> {
        let script = Script::new(INCREMENT_EXISTING);
        bounded(self.timeout, script.key(self.key).invoke_async(&mut *self.conn)).await
    }
}

async fn open_manager(endpoint: &Endpoint, timeout: Duration) -> Result<ConnectionManager, DomainError> {
    let client = Client::open(connection_url(endpoint))
        .map_err(|e| DomainError::configuration(format!("Failed to create Redis client: {}", e)))?;

    tokio::time::timeout(timeout, ConnectionManager::new(client))
        .await
        .map_err(|_| DomainError::connection(endpoint.to_string(), "connect timed out"))?
        .map_err(|e| DomainError::connection(endpoint.to_string(), e.to_string()))
}

impl RedisDriver {
    pub fn new(
        config: RedisConfig,
        epoch: InvalidationEpoch,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            pool: ServerPool::parse(&config.servers, DEFAULT_REDIS_PORT)?,
            normalizer: KeyNormalizer::new(config.prefix.clone()),
            connection: Mutex::new(None),
            config,
            epoch,
            clock,
        })
    }

    /// Returns a handle to the live connection, connecting if needed
    async fn manager(&self) -> Option<ConnectionManager> {
        let mut slot = self.connection.lock().await;
        if let Some(manager) = slot.as_ref() {
            return Some(manager.clone());
        }

        let timeout = self.config.connection_timeout;
        match self
            .pool
            .connect_first(|endpoint| async move { open_manager(&endpoint, timeout).await })
            .await
        {
            Some((endpoint, manager)) => {
                debug!(endpoint = %endpoint, "Connected to Redis");
                *slot = Some(manager.clone());
                Some(manager)
            }
            None => {
                warn!(servers = %self.config.servers, "No Redis server accepted a connection");
                None
            }
        }
    }

    fn epoch_record<'a>(&self, conn: &'a mut ConnectionManager, key: &'a str) -> RedisEpoch<'a> {
        RedisEpoch {
            conn,
            key,
            timeout: self.config.request_timeout,
        }
    }

    /// Adopts the server's epoch and returns `key` normalized under it
    async fn synced_key(&self, conn: &mut ConnectionManager, key: &str) -> Result<String, DomainError> {
        let epoch_key = self.normalizer.epoch_key();
        let epoch = self
            .epoch
            .sync(&mut self.epoch_record(conn, &epoch_key), self.clock.as_ref())
            .await?;
        Ok(self.normalizer.normalize(epoch, key))
    }

    async fn advance_epoch(&self, conn: &mut ConnectionManager) -> bool {
        let epoch_key = self.normalizer.epoch_key();
        let advanced = self
            .epoch
            .advance(&mut self.epoch_record(conn, &epoch_key), self.clock.as_ref())
            .await;

        match advanced {
            Ok(_) => true,
            Err(e) => {
                self.epoch.bump();
                self.reset(e).await;
                false
            }
        }
    }

    /// Forgets the connection so the next operation reconnects
    async fn reset(&self, error: DomainError) {
        warn!(driver = self.name(), error = %error, "Redis operation failed, dropping connection");
        self.connection.lock().await.take();
    }
}

#[async_trait]
impl CacheDriver for RedisDriver {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Distributed
    }

    fn backend_available(&self) -> bool {
        true
    }

    fn preconditions_met(&self) -> bool {
        !self.pool.is_empty()
    }

    fn epoch(&self) -> &InvalidationEpoch {
        &self.epoch
    }

    async fn connect(&self) -> bool {
        self.manager().await.is_some()
    }

    async fn get_data(&self, key: &str, max_age: Option<Duration>) -> Option<String> {
        let max_age = resolve_duration(max_age, self.config.default_ttl);
        let mut conn = self.manager().await?;

        let raw = match self.synced_key(&mut conn, key).await {
            Ok(key) => bounded(self.config.request_timeout, conn.get::<_, Option<String>>(&key)).await,
            Err(e) => Err(e),
        };
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                self.reset(e).await;
                return None;
            }
        };

        let entry = CacheEntry::decode(&raw?)?;
        entry.is_fresh(self.clock.now(), max_age).then_some(entry.value)
    }

    async fn put_data(&self, key: &str, value: Option<&str>, ttl: Option<Duration>) -> bool {
        let encoded = match value {
            None => None,
            Some(value) => {
                let ttl = resolve_duration(ttl, self.config.default_ttl);
                let entry = CacheEntry::new(value, self.clock.now(), ttl);
                match entry.encode() {
                    Ok(encoded) => Some((encoded, entry.ttl_secs())),
                    Err(e) => {
                        warn!(driver = self.name(), error = %e, "Failed to encode cache entry");
                        return false;
                    }
                }
            }
        };

        let Some(mut conn) = self.manager().await else {
            return false;
        };
        let key = match self.synced_key(&mut conn, key).await {
            Ok(key) => key,
            Err(e) => {
                self.reset(e).await;
                return false;
            }
        };

        let timeout = self.config.request_timeout;
        let result = match encoded {
            None => bounded(timeout, conn.del::<_, i64>(&key)).await.map(|_| ()),
            Some((encoded, ttl_secs)) => {
                bounded(timeout, conn.set_ex::<_, _, ()>(&key, encoded, ttl_secs)).await
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                self.reset(e).await;
                false
            }
        }
    }

    async fn clean_cache(&self, kind: CleanType) -> bool {
        let Some(mut conn) = self.manager().await else {
            self.epoch.bump();
            return false;
        };

        // Redis evicts expired keys itself
        if kind != CleanType::Expired {
            let flushed = bounded(
                self.config.request_timeout,
                redis::cmd("FLUSHDB").query_async::<()>(&mut conn),
            )
            .await;
            if let Err(e) = flushed {
                self.epoch.bump();
                self.reset(e).await;
                return false;
            }
            debug!(driver = self.name(), "Flushed Redis database");
        }

        self.advance_epoch(&mut conn).await
    }

    async fn invalidate_cache(&self) -> bool {
        let Some(mut conn) = self.manager().await else {
            self.epoch.bump();
            return false;
        };
        self.advance_epoch(&mut conn).await
    }

    async fn get_version(&self) -> Option<String> {
        let mut conn = self.manager().await?;

        let info = bounded(
            self.config.request_timeout,
            redis::cmd("INFO").arg("server").query_async::<String>(&mut conn),
        )
        .await;
        match info {
            Ok(info) => parse_server_version(&info),
            Err(e) => {
                self.reset(e).await;
                None
            }
        }
    }

    fn cache_settings(&self, form: &mut SettingsForm) {
        form.push(
            SettingField::new("cache_redis", "Redis servers", InputType::Text)
                .with_value(&self.config.servers)
                .with_subtext("Comma separated host:port entries or socket paths"),
        );
        form.toggle_with_backend(self.name(), &["cache_redis"]);
    }

    async fn quit(&self) -> bool {
        self.connection.lock().await.take();
        true
    }
}
