//! cachebridge
//!
//! One caching contract over interchangeable backends:
//! - In-process memory (shared segments, admin-gated clears)
//! - memcached servers, single connection or key-hashed pool
//! - Redis
//! - PostgreSQL and SQLite tables
//!
//! Keys are namespaced and folded with an invalidation epoch, so a bulk
//! clear can always fall back to making old keys unreachable.

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use domain::cache::{CacheDriver, CacheExt, CleanType};
pub use domain::DomainError;
pub use infrastructure::cache::{CacheConfig, CacheFactory, CacheType};
