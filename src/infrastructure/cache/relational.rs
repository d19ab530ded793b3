//! Helpers shared by the SQL-backed drivers

use crate::domain::DomainError;

/// Name of the cache table for a configured prefix.
///
/// The prefix is spliced into SQL text, so only `[A-Za-z0-9_]` is accepted.
pub fn cache_table_name(table_prefix: &str) -> Result<String, DomainError> {
    if let Some(bad) = table_prefix
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(DomainError::configuration(format!(
            "Invalid table prefix '{}': unexpected character {:?}",
            table_prefix, bad
        )));
    }

    Ok(format!("{}cache", table_prefix))
}

/// Read threshold for the `ttl` column.
///
/// A row is served while `ttl >= now - max_age`, where `ttl` holds the
/// absolute expiry. Rows therefore stay readable for up to `max_age` past
/// their expiry.
pub fn freshness_threshold(now: i64, max_age_secs: u64) -> i64 {
    now - max_age_secs as i64
}

/// Statements over the epoch row of a cache table.
///
/// The row shares the table with cached entries. Its generation is held in
/// the `ttl` column, which puts it far beyond any purge threshold.
#[derive(Debug, Clone)]
pub struct EpochQueries {
    pub load: String,
    pub insert_absent: String,
    pub upsert: String,
    pub increment: String,
}

impl EpochQueries {
    /// `bind(n)` renders the n-th placeholder of the target dialect
    pub fn new(table: &str, bind: fn(usize) -> String) -> Self {
        Self {
            load: format!("SELECT ttl FROM {} WHERE key = {}", table, bind(1)),
            insert_absent: format!(
                "INSERT INTO {} (key, value, ttl) VALUES ({}, '', {}) ON CONFLICT (key) DO NOTHING",
                table,
                bind(1),
                bind(2)
            ),
            upsert: format!(
                "INSERT INTO {} (key, value, ttl) VALUES ({}, '', {}) \
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value, ttl = excluded.ttl",
                table,
                bind(1),
                bind(2)
            ),
            increment: format!(
                "UPDATE {} SET ttl = ttl + 1 WHERE key = {} AND ttl > 0 RETURNING ttl",
                table,
                bind(1)
            ),
        }
    }
}

/// Reads a generation out of the `ttl` column. Zero or negative is unusable.
pub fn stored_epoch(ttl: i64) -> Option<u64> {
    u64::try_from(ttl).ok().filter(|value| *value > 0)
}

pub fn epoch_column(value: u64) -> Result<i64, DomainError> {
    i64::try_from(value)
        .map_err(|_| DomainError::storage(format!("Epoch {} does not fit the ttl column", value)))
}
