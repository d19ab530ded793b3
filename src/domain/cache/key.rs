//! Key normalization: logical key to backend-safe key

use sha2::{Digest, Sha256};

/// Longest key memcached accepts
pub const MEMCACHED_MAX_KEY_LEN: usize = 250;

/// Key column bound used by the relational drivers
pub const SQL_MAX_KEY_LEN: usize = 255;

/// Default bound for backends without a documented limit
pub const DEFAULT_MAX_KEY_LEN: usize = 1024;

/// Maps `(namespace, epoch, key)` onto a string a backend can store.
///
/// Separators that some backends treat as path-like (`:` and `/`) are
/// rewritten to `-` and `_`, whitespace and control characters become `_`,
/// and a backend-specific suffix is appended. Keys longer than `max_len`
/// keep their readable head and end in a SHA-256 digest of the full key.
#[derive(Debug, Clone)]
pub struct KeyNormalizer {
    namespace: String,
    suffix: String,
    max_len: usize,
}

impl KeyNormalizer {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            suffix: String::new(),
            max_len: DEFAULT_MAX_KEY_LEN,
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key holding the namespace's epoch in a shared backend. Normalized
    /// keys always carry the epoch right after the namespace, so this one
    /// cannot collide with them.
    pub fn epoch_key(&self) -> String {
        format!("{}~epoch{}", escape(&self.namespace), self.suffix)
    }

    pub fn normalize(&self, epoch: u64, key: &str) -> String {
        let logical = format!("{}{:x}-{}", self.namespace, epoch, key);
        let escaped = escape(&logical);

        if escaped.len() + self.suffix.len() <= self.max_len {
            return format!("{}{}", escaped, self.suffix);
        }

        let digest = hex::encode(Sha256::digest(escaped.as_bytes()));
        let budget = self
            .max_len
            .saturating_sub(digest.len() + self.suffix.len() + 1);
        let head = truncate_at_char_boundary(&escaped, budget);

        format!("{}~{}{}", head, digest, self.suffix)
    }
}

fn escape(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            ':' => '-',
            '/' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect()
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separators_are_escaped() {
        let normalizer = KeyNormalizer::new("forum");
        let key = normalizer.normalize(0x1f, "board:4/topics");

        assert_eq!(key, "forum1f-board-4_topics");
    }

    #[test]
    fn test_namespace_is_escaped_too() {
        let normalizer = KeyNormalizer::new("app:v2/");
        assert_eq!(normalizer.normalize(1, "k"), "app-v2_1-k");
    }

    #[test]
    fn test_whitespace_and_control_characters() {
        let normalizer = KeyNormalizer::new("");
        let key = normalizer.normalize(2, "a b\tc\n");

        assert_eq!(key, "2-a_b_c_");
    }

    #[test]
    fn test_suffix_is_appended() {
        let normalizer = KeyNormalizer::new("ns").with_suffix("-shm");
        assert_eq!(normalizer.normalize(3, "user"), "ns3-user-shm");
    }

    #[test]
    fn test_epoch_key_is_outside_the_data_keyspace() {
        let normalizer = KeyNormalizer::new("app:v2").with_suffix("-x");

        assert_eq!(normalizer.epoch_key(), "app-v2~epoch-x");
        assert_ne!(normalizer.epoch_key(), normalizer.normalize(0, "epoch"));
    }

    #[test]
    fn test_epoch_changes_key() {
        let normalizer = KeyNormalizer::new("ns");
        assert_ne!(normalizer.normalize(1, "k"), normalizer.normalize(2, "k"));
    }

    #[test]
    fn test_long_keys_are_bounded_and_distinct() {
        let normalizer = KeyNormalizer::new("ns")
            .with_suffix("-x")
            .with_max_len(MEMCACHED_MAX_KEY_LEN);

        let a = normalizer.normalize(1, &"a".repeat(400));
        let b = normalizer.normalize(1, &format!("{}b", "a".repeat(399)));

        assert!(a.len() <= MEMCACHED_MAX_KEY_LEN);
        assert!(b.len() <= MEMCACHED_MAX_KEY_LEN);
        assert!(a.ends_with("-x"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_long_multibyte_key_stays_valid_utf8() {
        let normalizer = KeyNormalizer::new("").with_max_len(80);
        let key = normalizer.normalize(1, &"é".repeat(100));

        assert!(key.len() <= 80);
        assert!(key.contains('~'));
    }
}
