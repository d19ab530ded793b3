//! Memcache driver bound to one randomly chosen server

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::endpoint::ServerPool;
use super::protocol::{Connection, EpochRecord};
use super::registry::PersistentConnections;
use super::{decode_fresh, encode_entry, push_server_settings, MemcacheConfig};
use crate::domain::cache::{
    resolve_duration, CacheDriver, CleanType, Clock, DriverKind, InvalidationEpoch, KeyNormalizer,
    SettingsForm, MEMCACHED_MAX_KEY_LEN,
};
use crate::domain::DomainError;

/// Distributed driver holding a single connection.
///
/// `connect()` walks the configured servers in random order and keeps the
/// first one that answers. Every key lives on that server. In persistent
/// mode `quit()` parks the connection in a [`PersistentConnections`] handle
/// instead of closing it.
#[derive(Debug)]
pub struct MemcacheDriver {
    pool: ServerPool,
    config: MemcacheConfig,
    connection: Mutex<Option<Connection>>,
    parked: PersistentConnections,
    normalizer: KeyNormalizer,
    epoch: InvalidationEpoch,
    clock: Arc<dyn Clock>,
}

impl MemcacheDriver {
    pub fn new(
        config: MemcacheConfig,
        epoch: InvalidationEpoch,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            pool: config.pool()?,
            normalizer: KeyNormalizer::new(config.prefix.clone()).with_max_len(MEMCACHED_MAX_KEY_LEN),
            connection: Mutex::new(None),
            parked: PersistentConnections::new(),
            config,
            epoch,
            clock,
        })
    }

    /// Shares parked connections with other drivers built on `parked`
    pub fn with_persistent_connections(mut self, parked: PersistentConnections) -> Self {
        self.parked = parked;
        self
    }

    async fn ensure_connected(&self, slot: &mut Option<Connection>) -> bool {
        if slot.is_some() {
            return true;
        }

        if self.config.persistent {
            if let Some(connection) = self.parked.take(&self.config.persistent_id) {
                debug!(endpoint = %connection.endpoint(), "Reusing persistent memcache connection");
                *slot = Some(connection);
                return true;
            }
        }

        let (connect_timeout, request_timeout) = (self.config.connect_timeout, self.config.request_timeout);
        let connected = self
            .pool
            .connect_first(|endpoint| async move {
                Connection::open(&endpoint, connect_timeout, request_timeout).await
            })
            .await;

        match connected {
            Some((_, connection)) => {
                *slot = Some(connection);
                true
            }
            None => {
                warn!(servers = %self.config.servers, "No memcache server accepted a connection");
                false
            }
        }
    }

    /// Adopts the server's epoch and returns `key` normalized under it
    async fn synced_key(&self, connection: &mut Connection, key: &str) -> Result<String, DomainError> {
        let epoch_key = self.normalizer.epoch_key();
        let epoch = self
            .epoch
            .sync(&mut EpochRecord::new(connection, &epoch_key), self.clock.as_ref())
            .await?;
        Ok(self.normalizer.normalize(epoch, key))
    }

    async fn advance_epoch(&self, slot: &mut Option<Connection>) -> bool {
        let Some(connection) = slot.as_mut() else {
            self.epoch.bump();
            return false;
        };

        let epoch_key = self.normalizer.epoch_key();
        let advanced = self
            .epoch
            .advance(&mut EpochRecord::new(connection, &epoch_key), self.clock.as_ref())
            .await;

        match advanced {
            Ok(_) => true,
            Err(e) => {
                self.epoch.bump();
                self.drop_connection(slot, e);
                false
            }
        }
    }

    fn drop_connection(&self, slot: &mut Option<Connection>, error: DomainError) {
        warn!(driver = self.name(), error = %error, "Memcache operation failed, dropping connection");
        *slot = None;
    }
}

#[async_trait]
impl CacheDriver for MemcacheDriver {
    fn name(&self) -> &'static str {
        "memcache"
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
        let mut slot = self.connection.lock().await;
        self.ensure_connected(&mut slot).await
    }

    async fn get_data(&self, key: &str, max_age: Option<Duration>) -> Option<String> {
        let max_age = resolve_duration(max_age, self.config.default_ttl);

        let mut slot = self.connection.lock().await;
        if !self.ensure_connected(&mut slot).await {
            return None;
        }
        let connection = slot.as_mut()?;

        let result = match self.synced_key(connection, key).await {
            Ok(key) => connection.get(&key).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(Some(raw)) => decode_fresh(raw, self.clock.now(), max_age),
            Ok(None) => None,
            Err(e) => {
                self.drop_connection(&mut slot, e);
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

        let mut slot = self.connection.lock().await;
        if !self.ensure_connected(&mut slot).await {
            return false;
        }
        let Some(connection) = slot.as_mut() else {
            return false;
        };

        let result = match self.synced_key(connection, key).await {
            Ok(key) => match &encoded {
                None => connection.delete(&key).await.map(|_| true),
                Some((raw, exptime)) => connection.set(&key, raw, *exptime).await,
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(applied) => applied,
            Err(e) => {
                self.drop_connection(&mut slot, e);
                false
            }
        }
    }

    async fn clean_cache(&self, kind: CleanType) -> bool {
        let mut slot = self.connection.lock().await;
        if !self.ensure_connected(&mut slot).await {
            self.epoch.bump();
            return false;
        }

        // memcached expires entries on its own
        if kind != CleanType::Expired {
            let flushed = match slot.as_mut() {
                Some(connection) => connection.flush_all().await,
                None => Ok(()),
            };
            match flushed {
                Ok(()) => debug!(driver = self.name(), "Flushed memcache server"),
                Err(e) => {
                    self.epoch.bump();
                    self.drop_connection(&mut slot, e);
                    return false;
                }
            }
        }

        // the flush also dropped the epoch record, so the new one is fresh
        self.advance_epoch(&mut slot).await
    }

    async fn invalidate_cache(&self) -> bool {
        let mut slot = self.connection.lock().await;
        if !self.ensure_connected(&mut slot).await {
            self.epoch.bump();
            return false;
        }
        self.advance_epoch(&mut slot).await
    }

    async fn get_version(&self) -> Option<String> {
        let mut slot = self.connection.lock().await;
        if !self.ensure_connected(&mut slot).await {
            return None;
        }
        let connection = slot.as_mut()?;

        match connection.version().await {
            Ok(version) => Some(version),
            Err(e) => {
                self.drop_connection(&mut slot, e);
                None
            }
        }
    }

    fn cache_settings(&self, form: &mut SettingsForm) {
        push_server_settings(form, self.name(), &self.config.servers);
    }

    async fn quit(&self) -> bool {
        let Some(connection) = self.connection.lock().await.take() else {
            return true;
        };

        if self.config.persistent {
            self.parked.park(&self.config.persistent_id, connection);
        }
        true
    }
}
