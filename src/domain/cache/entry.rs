//! Stored envelope for backends without native freshness checks

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// A value together with the times it was written and stops being valid.
///
/// In-process and distributed backends keep this envelope so a read can
/// apply the caller's freshness window independently of the TTL the writer
/// chose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "s")]
    pub stored_at: i64,
    #[serde(rename = "e")]
    pub expires_at: i64,
    #[serde(rename = "v")]
    pub value: String,
}

impl CacheEntry {
    pub fn new(value: impl Into<String>, now: i64, ttl: Duration) -> Self {
        Self {
            stored_at: now,
            expires_at: now.saturating_add(ttl.as_secs() as i64),
            value: value.into(),
        }
    }

    /// Seconds the backend should keep the entry around
    pub fn ttl_secs(&self) -> u64 {
        (self.expires_at - self.stored_at).max(0) as u64
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// True when the entry is unexpired and was written at most `max_age` ago
    pub fn is_fresh(&self, now: i64, max_age: Duration) -> bool {
        !self.is_expired(now) && now - self.stored_at <= max_age.as_secs() as i64
    }

    pub fn encode(&self) -> Result<String, DomainError> {
        serde_json::to_string(self)
            .map_err(|e| DomainError::serialization(format!("Failed to encode entry: {}", e)))
    }

    /// Decodes a stored envelope. Anything unreadable is treated as absent.
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}
