//! Bounded memcached connection over the async-memcached client

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_memcached::{AsciiProtocol, Client, Error as MemcachedError, Status};
use async_trait::async_trait;
use tracing::warn;

use super::endpoint::Endpoint;
use crate::domain::cache::{parse_epoch, EpochStore, MEMCACHED_MAX_KEY_LEN};
use crate::domain::DomainError;

/// Relative expirations longer than this are read by memcached as an
/// absolute unix timestamp
const RELATIVE_EXPIRY_LIMIT: u64 = 60 * 60 * 24 * 30;

/// memcached's default item size limit
pub const MAX_ITEM_SIZE: usize = 1024 * 1024;

/// Expiration argument for a `set` of `ttl_secs` issued at `now`
pub fn expiration_time(ttl_secs: u64, now: i64) -> i64 {
    if ttl_secs > RELATIVE_EXPIRY_LIMIT {
        now + ttl_secs as i64
    } else {
        ttl_secs as i64
    }
}

/// One open connection to one memcached server.
///
/// Every request/response exchange is bounded by the request timeout. An
/// exchange that errors or times out leaves the stream in an unknown state,
/// so callers drop the connection on any `Err`.
pub struct Connection {
    client: Client,
    endpoint: Endpoint,
    timeout: Duration,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Connection {
    /// Opens a TCP or local-socket connection, giving up after
    /// `connect_timeout`
    pub async fn open(
        endpoint: &Endpoint,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, DomainError> {
        let client = tokio::time::timeout(connect_timeout, Client::new(dsn(endpoint)))
            .await
            .map_err(|_| DomainError::connection(endpoint.to_string(), "connect timed out"))?
            .map_err(|e| DomainError::connection(endpoint.to_string(), e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.clone(),
            timeout: request_timeout,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// `None` is the server's not-found answer
    pub async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, DomainError> {
        check_key(key)?;

        match bounded(&self.endpoint, self.timeout, self.client.get(key)).await? {
            Ok(Some(value)) => {
                let data: Option<Vec<u8>> = value.data.into();
                Ok(Some(data.unwrap_or_default()))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(self.failure(e)),
        }
    }

    /// Returns whether the server stored the value. Values over the item
    /// limit are refused locally.
    pub async fn set(&mut self, key: &str, value: &str, exptime: i64) -> Result<bool, DomainError> {
        check_key(key)?;
        if !self.fits(key, value) {
            return Ok(false);
        }

        let exchange = self.client.set(key, value, Some(exptime), None);
        match bounded(&self.endpoint, self.timeout, exchange).await? {
            Ok(()) => Ok(true),
            Err(MemcachedError::Protocol(Status::NotStored)) => Ok(false),
            Err(e) => Err(self.failure(e)),
        }
    }

    /// Stores `value` without expiry only if `key` is absent
    pub async fn add(&mut self, key: &str, value: &str) -> Result<bool, DomainError> {
        check_key(key)?;
        if !self.fits(key, value) {
            return Ok(false);
        }

        let exchange = self.client.add(key, value, None, None);
        match bounded(&self.endpoint, self.timeout, exchange).await? {
            Ok(()) => Ok(true),
            Err(MemcachedError::Protocol(Status::NotStored | Status::Exists)) => Ok(false),
            Err(e) => Err(self.failure(e)),
        }
    }

    /// Returns whether the key existed
    pub async fn delete(&mut self, key: &str) -> Result<bool, DomainError> {
        check_key(key)?;

        match bounded(&self.endpoint, self.timeout, self.client.delete(key)).await? {
            Ok(()) => Ok(true),
            Err(MemcachedError::Protocol(Status::NotFound)) => Ok(false),
            Err(e) => Err(self.failure(e)),
        }
    }

    /// Adds one to a numeric value. `None` when the key is absent.
    pub async fn increment(&mut self, key: &str) -> Result<Option<u64>, DomainError> {
        check_key(key)?;

        match bounded(&self.endpoint, self.timeout, self.client.increment(key, 1)).await? {
            Ok(value) => Ok(Some(value)),
            Err(MemcachedError::Protocol(Status::NotFound)) => Ok(None),
            Err(e) => Err(self.failure(e)),
        }
    }

    pub async fn flush_all(&mut self) -> Result<(), DomainError> {
        match bounded(&self.endpoint, self.timeout, self.client.flush_all()).await? {
            Ok(()) => Ok(()),
            Err(e) => Err(self.failure(e)),
        }
    }

    pub async fn version(&mut self) -> Result<String, DomainError> {
        match bounded(&self.endpoint, self.timeout, self.client.version()).await? {
            Ok(version) => Ok(version.trim().trim_start_matches("VERSION ").to_string()),
            Err(e) => Err(self.failure(e)),
        }
    }

    fn fits(&self, key: &str, value: &str) -> bool {
        if value.len() > MAX_ITEM_SIZE {
            warn!(
                endpoint = %self.endpoint,
                key,
                bytes = value.len(),
                limit = MAX_ITEM_SIZE,
                "Value exceeds the memcached item limit"
            );
            return false;
        }
        true
    }

    fn failure(&self, e: MemcachedError) -> DomainError {
        DomainError::connection(self.endpoint.to_string(), e.to_string())
    }
}

/// Runs one exchange, giving up after `timeout`
async fn bounded<T>(
    endpoint: &Endpoint,
    timeout: Duration,
    exchange: impl Future<Output = Result<T, MemcachedError>>,
) -> Result<Result<T, MemcachedError>, DomainError> {
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| DomainError::connection(endpoint.to_string(), "request timed out"))
}

fn dsn(endpoint: &Endpoint) -> String {
    if endpoint.is_socket() {
        format!("unix://{}", endpoint.host)
    } else {
        format!("tcp://{}", endpoint)
    }
}

fn check_key(key: &str) -> Result<(), DomainError> {
    if key.is_empty()
        || key.len() > MEMCACHED_MAX_KEY_LEN
        || key.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(DomainError::cache(format!("Invalid memcached key: {:?}", key)));
    }
    Ok(())
}

/// The epoch record of one namespace, held on one server
pub struct EpochRecord<'a> {
    connection: &'a mut Connection,
    key: &'a str,
}

impl<'a> EpochRecord<'a> {
    pub fn new(connection: &'a mut Connection, key: &'a str) -> Self {
        Self { connection, key }
    }
}

#[async_trait]
impl<'a> EpochStore for EpochRecord<'a> {
    async fn load(&mut self) -> Result<Option<u64>, DomainError> {
        let raw = self.connection.get(self.key).await?;
        Ok(raw
            .and_then(|raw| String::from_utf8(raw).ok())
            .and_then(|raw| parse_epoch(&raw)))
    }

    async fn store_if_absent(&mut self, value: u64) -> Result<bool, DomainError> {
        self.connection.add(self.key, &value.to_string()).await
    }

    async fn store(&mut self, value: u64) -> Result<(), DomainError> {
        self.connection.set(self.key, &value.to_string(), 0).await?;
        Ok(())
    }

    async fn increment(&mut self) -> Result<Option<u64>, DomainError> {
        self.connection.increment(self.key).await
    }
}
