use serde::Deserialize;

use crate::infrastructure::cache::CacheConfig;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub housekeeping: HousekeepingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Background housekeeping schedule
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    pub interval_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self { interval_secs: 3_600 }
    }
}

impl AppConfig {
    /// Layers `config/default`, `config/local` and `CACHEBRIDGE__*`
    /// environment variables, e.g. `CACHEBRIDGE__CACHE__CACHE_TYPE=redis`
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("config")
    }

    pub fn load_from(dir: &str) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(&format!("{}/default", dir)).required(false))
            .add_source(config::File::with_name(&format!("{}/local", dir)).required(false))
            .add_source(
                config::Environment::with_prefix("CACHEBRIDGE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::CacheType;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.cache.cache_type, CacheType::SharedMemory);
        assert_eq!(config.housekeeping.interval_secs, 3_600);
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
            [logging]
            level = "debug"
            format = "json"

            [cache]
            cache_type = "memcached"
            servers = "cache1:11211,cache2"
            persistent = true
            persistent_id = "forum"
            default_ttl_secs = 300

            [cache.admin]
            user = "admin"
            password = "secret"
            "#,
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path().to_str().unwrap()).unwrap();

        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.cache.cache_type, CacheType::Memcached);
        assert_eq!(config.cache.servers, "cache1:11211,cache2");
        assert!(config.cache.persistent);
        assert_eq!(config.cache.default_ttl_secs, 300);
        assert_eq!(config.cache.admin.map(|a| a.user), Some("admin".to_string()));
        assert_eq!(config.cache.table_prefix, "");
    }

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let dir = TempDir::new().unwrap();

        let config = AppConfig::load_from(dir.path().to_str().unwrap()).unwrap();

        assert_eq!(config.cache.default_ttl_secs, 120);
    }
}
