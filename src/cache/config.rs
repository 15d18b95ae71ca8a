//! Cache configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_CAPACITY: usize = 1024;
const DEFAULT_POST_TTL_SECS: u64 = 300;
const DEFAULT_TERM_TTL_SECS: u64 = 300;
const DEFAULT_MENU_TTL_SECS: u64 = 900;

/// When cached query results are dropped before their TTL runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationPolicy {
    /// Entries live until they expire; readers may see results up to one TTL old.
    #[default]
    TtlOnly,
    /// Writes through the services forget every key the factories stored.
    OnWrite,
}

impl InvalidationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            InvalidationPolicy::TtlOnly => "ttl_only",
            InvalidationPolicy::OnWrite => "on_write",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Maximum entries in the in-process store.
    pub capacity: usize,
    pub post_ttl_secs: u64,
    pub term_ttl_secs: u64,
    pub menu_ttl_secs: u64,
    pub invalidation: InvalidationPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CAPACITY,
            post_ttl_secs: DEFAULT_POST_TTL_SECS,
            term_ttl_secs: DEFAULT_TERM_TTL_SECS,
            menu_ttl_secs: DEFAULT_MENU_TTL_SECS,
            invalidation: InvalidationPolicy::TtlOnly,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            capacity: settings.capacity,
            post_ttl_secs: settings.post_ttl_secs,
            term_ttl_secs: settings.term_ttl_secs,
            menu_ttl_secs: settings.menu_ttl_secs,
            invalidation: settings.invalidation,
        }
    }
}

impl CacheConfig {
    /// Capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn post_ttl(&self) -> Duration {
        Duration::from_secs(self.post_ttl_secs)
    }

    pub fn term_ttl(&self) -> Duration {
        Duration::from_secs(self.term_ttl_secs)
    }

    pub fn menu_ttl(&self) -> Duration {
        Duration::from_secs(self.menu_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.post_ttl(), Duration::from_secs(300));
        assert_eq!(config.term_ttl(), Duration::from_secs(300));
        assert_eq!(config.menu_ttl(), Duration::from_secs(900));
        assert_eq!(config.invalidation, InvalidationPolicy::TtlOnly);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.capacity_non_zero().get(), 1);
    }

    #[test]
    fn policy_names_round_trip_through_serde() {
        let policy: InvalidationPolicy =
            serde_json::from_str("\"on_write\"").expect("policy should parse");
        assert_eq!(policy, InvalidationPolicy::OnWrite);
        assert_eq!(policy.as_str(), "on_write");
    }
}
