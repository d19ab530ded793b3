//! State that outlives a single driver instance in persistent mode

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::endpoint::Endpoint;
use super::protocol::Connection;

/// Idle connections parked between driver instances, keyed by persistent id.
///
/// A persistent [`MemcacheDriver`](super::MemcacheDriver) takes its
/// connection from here on connect and parks it again on quit, so the next
/// driver built on the same handle skips the pool walk.
#[derive(Debug, Clone, Default)]
pub struct PersistentConnections {
    parked: Arc<Mutex<HashMap<String, Connection>>>,
}

impl PersistentConnections {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.parked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn take(&self, id: &str) -> Option<Connection> {
        self.lock().remove(id)
    }

    pub fn park(&self, id: &str, connection: Connection) {
        self.lock().insert(id.to_string(), connection);
    }

    pub fn is_parked(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }
}

/// Server lists registered per persistent id.
///
/// Mirrors a client library that keeps its server list alive across
/// requests: connecting again must not register the same server twice.
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    pools: Arc<Mutex<HashMap<String, Vec<Endpoint>>>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Endpoint>>> {
        self.pools.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn registered(&self, id: &str) -> Vec<Endpoint> {
        self.lock().get(id).cloned().unwrap_or_default()
    }

    /// Registers the configured servers not already present and returns how
    /// many were added
    pub fn register_missing(&self, id: &str, configured: &[Endpoint]) -> usize {
        let mut pools = self.lock();
        let known = pools.entry(id.to_string()).or_default();

        let mut added = 0;
        for endpoint in configured {
            if !known.contains(endpoint) {
                known.push(endpoint.clone());
                added += 1;
            }
        }

        added
    }

    pub fn forget(&self, id: &str) {
        self.lock().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_missing_is_idempotent() {
        let registry = ServerRegistry::new();
        let servers = vec![Endpoint::tcp("a", 1), Endpoint::tcp("b", 2)];

        assert_eq!(registry.register_missing("forum", &servers), 2);
        assert_eq!(registry.register_missing("forum", &servers), 0);
        assert_eq!(registry.registered("forum").len(), 2);
    }

    #[test]
    fn test_register_only_new_servers() {
        let registry = ServerRegistry::new();
        registry.register_missing("forum", &[Endpoint::tcp("a", 1)]);

        let added = registry.register_missing("forum", &[Endpoint::tcp("a", 1), Endpoint::tcp("c", 3)]);

        assert_eq!(added, 1);
        assert_eq!(
            registry.registered("forum"),
            vec![Endpoint::tcp("a", 1), Endpoint::tcp("c", 3)]
        );
    }

    #[test]
    fn test_duplicate_entries_in_configuration_register_once() {
        let registry = ServerRegistry::new();
        let servers = vec![Endpoint::tcp("a", 1), Endpoint::tcp("a", 1)];

        registry.register_missing("forum", &servers);

        assert_eq!(registry.registered("forum").len(), 1);
    }

    #[test]
    fn test_ids_are_isolated() {
        let registry = ServerRegistry::new();
        registry.register_missing("one", &[Endpoint::tcp("a", 1)]);

        assert!(registry.registered("two").is_empty());

        registry.forget("one");
        assert!(registry.registered("one").is_empty());
    }
}
