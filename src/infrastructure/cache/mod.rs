//! Cache infrastructure - driver implementations per backend

mod factory;
mod gated_memory;
mod housekeeping;
mod in_memory;
pub mod memcache;
mod postgres;
mod redis;
mod relational;
mod shared_memory;
mod sqlite;

#[cfg(test)]
mod contract_tests;

pub use factory::{CacheConfig, CacheFactory, CacheType};
pub use gated_memory::{AdminCredentials, GatedMemoryConfig, GatedMemoryDriver};
pub use housekeeping::spawn_housekeeping_task;
pub use in_memory::MemoryStore;
pub use memcache::{MemcacheConfig, MemcacheDriver, MemcachedDriver, PersistentConnections, ServerRegistry};
pub use postgres::{PostgresConfig, PostgresDriver};
pub use redis::{RedisConfig, RedisDriver};
pub use relational::cache_table_name;
pub use shared_memory::{Segment, SharedMemoryConfig, SharedMemoryDriver};
pub use sqlite::{SqliteConfig, SqliteDriver};
