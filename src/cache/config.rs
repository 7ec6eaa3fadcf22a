//! Runtime cache configuration.
//!
//! Controls the context gate, hard TTL, preloading and the memory tier bound.
//! Loaded from the `[cache]` section of `kiosk-cache.toml` and mutable at
//! runtime through [`CacheConfigUpdate`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

// Default values for cache configuration
const DEFAULT_CACHE_DURATION_MS: u64 = 24 * 60 * 60 * 1000;
const DEFAULT_MEMORY_TIER_LIMIT: usize = 100;

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; when false nothing is cached in any context.
    pub enable_caching: bool,
    /// Customer-facing kiosk screens.
    pub enable_for_kiosk: bool,
    /// Staff admin dashboards.
    pub enable_for_admin: bool,
    /// Restaurant owner dashboards.
    pub enable_for_owner: bool,
    /// Hard TTL (ms) after which a read deletes the entry.
    pub cache_duration_ms: u64,
    /// Run the startup preloader when a kiosk view initialises.
    pub preload_on_kiosk_init: bool,
    /// Maximum entries held by the memory tier.
    pub memory_tier_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            enable_for_kiosk: true,
            enable_for_admin: false,
            enable_for_owner: false,
            cache_duration_ms: DEFAULT_CACHE_DURATION_MS,
            preload_on_kiosk_init: true,
            memory_tier_limit: DEFAULT_MEMORY_TIER_LIMIT,
        }
    }
}

impl CacheConfig {
    pub fn cache_duration(&self) -> Duration {
        Duration::from_millis(self.cache_duration_ms)
    }

    /// Hard TTL in signed milliseconds for age comparisons.
    pub fn cache_duration_millis(&self) -> i64 {
        i64::try_from(self.cache_duration_ms).unwrap_or(i64::MAX)
    }

    /// Shallow-merge every `Some` field of `update` into this config.
    pub fn apply(&mut self, update: &CacheConfigUpdate) {
        if let Some(value) = update.enable_caching {
            self.enable_caching = value;
        }
        if let Some(value) = update.enable_for_kiosk {
            self.enable_for_kiosk = value;
        }
        if let Some(value) = update.enable_for_admin {
            self.enable_for_admin = value;
        }
        if let Some(value) = update.enable_for_owner {
            self.enable_for_owner = value;
        }
        if let Some(value) = update.cache_duration_ms {
            self.cache_duration_ms = value;
        }
        if let Some(value) = update.preload_on_kiosk_init {
            self.preload_on_kiosk_init = value;
        }
        if let Some(value) = update.memory_tier_limit {
            self.memory_tier_limit = value;
        }
    }
}

/// Partial configuration; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfigUpdate {
    pub enable_caching: Option<bool>,
    pub enable_for_kiosk: Option<bool>,
    pub enable_for_admin: Option<bool>,
    pub enable_for_owner: Option<bool>,
    pub cache_duration_ms: Option<u64>,
    pub preload_on_kiosk_init: Option<bool>,
    pub memory_tier_limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enable_caching);
        assert!(config.enable_for_kiosk);
        assert!(!config.enable_for_admin);
        assert!(!config.enable_for_owner);
        assert_eq!(config.cache_duration(), Duration::from_secs(24 * 60 * 60));
        assert!(config.preload_on_kiosk_init);
        assert_eq!(config.memory_tier_limit, 100);
    }

    #[test]
    fn apply_merges_only_present_fields() {
        let mut config = CacheConfig::default();
        config.apply(&CacheConfigUpdate {
            enable_for_admin: Some(true),
            cache_duration_ms: Some(5_000),
            ..Default::default()
        });

        assert!(config.enable_for_admin);
        assert_eq!(config.cache_duration_ms, 5_000);
        assert!(config.enable_for_kiosk);
        assert!(!config.enable_for_owner);
    }

    #[test]
    fn empty_update_is_a_no_op() {
        let mut config = CacheConfig::default();
        config.apply(&CacheConfigUpdate::default());
        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    fn deserializes_partial_tables() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"enable_for_owner": true}"#).expect("valid config");
        assert!(config.enable_for_owner);
        assert_eq!(config.memory_tier_limit, 100);
    }
}
