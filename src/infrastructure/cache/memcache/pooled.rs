//! Memcached driver distributing keys over every configured server

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::endpoint::{Endpoint, ServerPool};
use super::protocol::{Connection, EpochRecord};
use super::registry::ServerRegistry;
use super::{decode_fresh, encode_entry, push_server_settings, MemcacheConfig};
use crate::domain::cache::{
    resolve_duration, CacheDriver, CleanType, Clock, DriverKind, InvalidationEpoch, KeyNormalizer,
    SettingsForm, MEMCACHED_MAX_KEY_LEN,
};
use crate::domain::DomainError;

/// Distributed driver that registers all configured servers and routes each
/// key to one of them by hash.
///
/// The server list lives in a [`ServerRegistry`]. Persistent drivers built on
/// the same registry and persistent id share one list, and `connect()` only
/// registers servers that are missing from it.
#[derive(Debug)]
pub struct MemcachedDriver {
    configured: ServerPool,
    config: MemcacheConfig,
    registry: ServerRegistry,
    connections: Mutex<HashMap<Endpoint, Connection>>,
    normalizer: KeyNormalizer,
    epoch: InvalidationEpoch,
    clock: Arc<dyn Clock>,
}

impl MemcachedDriver {
    pub fn new(
        config: MemcacheConfig,
        epoch: InvalidationEpoch,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            configured: config.pool()?,
            normalizer: KeyNormalizer::new(config.prefix.clone()).with_max_len(MEMCACHED_MAX_KEY_LEN),
            registry: ServerRegistry::new(),
            connections: Mutex::new(HashMap::new()),
            config,
            epoch,
            clock,
        })
    }

    /// Shares the server list with other persistent drivers built on `registry`
    pub fn with_registry(mut self, registry: ServerRegistry) -> Self {
        if self.config.persistent {
            self.registry = registry;
        }
        self
    }

    /// Servers currently registered for this driver's persistent id
    pub fn registered_servers(&self) -> Vec<Endpoint> {
        self.registry.registered(&self.config.persistent_id)
    }

    async fn route(&self, key: &str) -> Option<Endpoint> {
        let mut servers = self.registered_servers();
        if servers.is_empty() && self.connect().await {
            servers = self.registered_servers();
        }
        if servers.is_empty() {
            return None;
        }

        let digest = Sha256::digest(key.as_bytes());
        let bucket = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize;
        Some(servers[bucket % servers.len()].clone())
    }

    async fn connection_for<'a>(
        &self,
        connections: &'a mut HashMap<Endpoint, Connection>,
        endpoint: &Endpoint,
    ) -> Option<&'a mut Connection> {
        if !connections.contains_key(endpoint) {
            let opened =
                Connection::open(endpoint, self.config.connect_timeout, self.config.request_timeout).await;
            match opened {
                Ok(connection) => {
                    connections.insert(endpoint.clone(), connection);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Memcached server unavailable");
                    return None;
                }
            }
        }
        connections.get_mut(endpoint)
    }

    /// Syncs with, or advances, the epoch record on the server its key
    /// routes to
    async fn shared_epoch(
        &self,
        connections: &mut HashMap<Endpoint, Connection>,
        advance: bool,
    ) -> Option<u64> {
        let epoch_key = self.normalizer.epoch_key();
        let endpoint = self.route(&epoch_key).await?;
        let connection = self.connection_for(connections, &endpoint).await?;

        let mut record = EpochRecord::new(connection, &epoch_key);
        let result = if advance {
            self.epoch.advance(&mut record, self.clock.as_ref()).await
        } else {
            self.epoch.sync(&mut record, self.clock.as_ref()).await
        };

        match result {
            Ok(epoch) => Some(epoch),
            Err(e) => {
                self.drop_connection(connections, &endpoint, e);
                None
            }
        }
    }

    async fn advance_epoch(&self, connections: &mut HashMap<Endpoint, Connection>) -> bool {
        if self.shared_epoch(connections, true).await.is_some() {
            return true;
        }
        self.epoch.bump();
        false
    }

    fn drop_connection(
        &self,
        connections: &mut HashMap<Endpoint, Connection>,
        endpoint: &Endpoint,
        error: DomainError,
    ) {
        warn!(endpoint = %endpoint, error = %error, "Memcached operation failed, dropping connection");
        connections.remove(endpoint);
    }
}

#[async_trait]
impl CacheDriver for MemcachedDriver {
    fn name(&self) -> &'static str {
        "memcached"
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Distributed
    }

    fn backend_available(&self) -> bool {
        true
    }

    fn preconditions_met(&self) -> bool {
        !self.configured.is_empty()
    }

    fn epoch(&self) -> &InvalidationEpoch {
        &self.epoch
    }

    async fn connect(&self) -> bool {
        let id = &self.config.persistent_id;
        let added = self.registry.register_missing(id, self.configured.endpoints());
        let registered = self.registry.registered(id).len();

        debug!(persistent_id = %id, added, registered, "Memcached servers registered");
        registered > 0
    }

    async fn get_data(&self, key: &str, max_age: Option<Duration>) -> Option<String> {
        let max_age = resolve_duration(max_age, self.config.default_ttl);

        let mut connections = self.connections.lock().await;
        let epoch = self.shared_epoch(&mut connections, false).await?;
        let key = self.normalizer.normalize(epoch, key);
        let endpoint = self.route(&key).await?;
        let connection = self.connection_for(&mut connections, &endpoint).await?;

        match connection.get(&key).await {
            Ok(Some(raw)) => decode_fresh(raw, self.clock.now(), max_age),
            Ok(None) => None,
            Err(e) => {
                self.drop_connection(&mut connections, &endpoint, e);
                None
            }
        }
    }

    async fn put_data(&self, key: &str, value: Option<&str>, ttl: Option<Duration>) -> bool {
        let encoded = match value {
            None => None,
            Some(value) => {
                let ttl = resolve_duration(ttl, self.config.default_ttl);
                match encode_entry(value, self.clock.now(), ttl) {
                    Ok(encoded) => Some(encoded),
                    Err(e) => {
                        warn!(driver = self.name(), error = %e, "Failed to encode cache entry");
                        return false;
                    }
                }
            }
        };

        let mut connections = self.connections.lock().await;
        let Some(epoch) = self.shared_epoch(&mut connections, false).await else {
            return false;
        };
        let key = self.normalizer.normalize(epoch, key);
        let Some(endpoint) = self.route(&key).await else {
            return false;
        };
        let Some(connection) = self.connection_for(&mut connections, &endpoint).await else {
            return false;
        };

        let result = match encoded {
            None => connection.delete(&key).await.map(|_| true),
            Some((raw, exptime)) => connection.set(&key, &raw, exptime).await,
        };

        match result {
            Ok(applied) => applied,
            Err(e) => {
                self.drop_connection(&mut connections, &endpoint, e);
                false
            }
        }
    }

    async fn clean_cache(&self, kind: CleanType) -> bool {
        let mut servers = self.registered_servers();
        if servers.is_empty() && self.connect().await {
            servers = self.registered_servers();
        }

        let mut connections = self.connections.lock().await;
        let mut flushed = !servers.is_empty();
        if kind != CleanType::Expired {
            for endpoint in &servers {
                let Some(connection) = self.connection_for(&mut connections, endpoint).await else {
                    flushed = false;
                    continue;
                };
                if let Err(e) = connection.flush_all().await {
                    self.drop_connection(&mut connections, endpoint, e);
                    flushed = false;
                }
            }
        }

        let advanced = self.advance_epoch(&mut connections).await;
        flushed && advanced
    }

    async fn invalidate_cache(&self) -> bool {
        let mut connections = self.connections.lock().await;
        self.advance_epoch(&mut connections).await
    }

    async fn get_version(&self) -> Option<String> {
        let servers = self.registered_servers();
        let mut connections = self.connections.lock().await;

        for endpoint in &servers {
            let Some(connection) = self.connection_for(&mut connections, endpoint).await else {
                continue;
            };
            match connection.version().await {
                Ok(version) => return Some(version),
                Err(e) => self.drop_connection(&mut connections, endpoint, e),
            }
        }

        None
    }

    fn cache_settings(&self, form: &mut SettingsForm) {
        push_server_settings(form, self.name(), &self.config.servers);
    }

    async fn quit(&self) -> bool {
        self.connections.lock().await.clear();
        if !self.config.persistent {
            self.registry.forget(&self.config.persistent_id);
        }
        true
    }
}
