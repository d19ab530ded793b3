//! CLI module for cachebridge
//!
//! Operator subcommands against the configured cache backend:
//! - `check`: report backend support and connect
//! - `version`: print the backend software version
//! - `get` / `put`: read or write one key
//! - `clean`: bulk-clear and bump the invalidation epoch
//! - `housekeep`: run housekeeping once, or periodically with `--watch`
//! - `settings`: print the admin settings fields as JSON

pub mod check;
pub mod clean;
pub mod entry;
pub mod housekeep;
pub mod settings;

use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use crate::config::AppConfig;
use crate::domain::cache::CacheDriver;
use crate::infrastructure::cache::{CacheFactory, CacheType};
use crate::infrastructure::logging;

/// cachebridge - one caching contract over memory, memcached, redis and SQL
#[derive(Parser)]
#[command(name = "cachebridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides applied on top of the loaded configuration
#[derive(Args, Clone, Debug, Default)]
pub struct BackendArgs {
    /// Backend to use instead of the configured one
    #[arg(long, global = true)]
    pub cache_type: Option<CacheType>,

    /// Server list for distributed backends
    #[arg(long, global = true)]
    pub servers: Option<String>,

    /// Key namespace
    #[arg(long, global = true)]
    pub prefix: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check that the backend is supported and reachable
    Check,

    /// Print the backend software version
    Version,

    /// Read one key
    Get(entry::GetArgs),

    /// Write or delete one key
    Put(entry::PutArgs),

    /// Bulk-clear the cache
    Clean(clean::CleanArgs),

    /// Run backend housekeeping
    Housekeep(housekeep::HousekeepArgs),

    /// Print the backend's admin settings fields
    Settings,
}

/// Loads configuration, installs logging and builds the selected driver
pub fn bootstrap(backend: &BackendArgs) -> anyhow::Result<(AppConfig, Arc<dyn CacheDriver>)> {
    dotenvy::dotenv().ok();

    let mut config = AppConfig::load().context("Failed to load configuration")?;
    logging::init_logging(&config.logging);

    if let Some(cache_type) = backend.cache_type {
        config.cache.cache_type = cache_type;
    }
    if let Some(servers) = &backend.servers {
        config.cache.servers = servers.clone();
    }
    if let Some(prefix) = &backend.prefix {
        config.cache.prefix = prefix.clone();
    }

    let driver = CacheFactory::new()
        .create(&config.cache)
        .with_context(|| format!("Failed to create {} cache driver", config.cache.cache_type))?;

    Ok((config, driver))
}

/// Connects the driver or fails the command
pub async fn connect(driver: &Arc<dyn CacheDriver>) -> anyhow::Result<()> {
    if !driver.connect().await {
        anyhow::bail!("Could not connect to the {} backend", driver.name());
    }
    Ok(())
}
