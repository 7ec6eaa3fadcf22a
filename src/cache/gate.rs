//! Per-context caching switch.
//!
//! Kiosk screens tolerate staleness for speed; admin and owner dashboards
//! read live data, so they default to caching disabled.

use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::config::{CacheConfig, CacheConfigUpdate};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::gate";

/// The surface consuming the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheContext {
    Kiosk,
    Admin,
    Owner,
}

impl CacheContext {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kiosk => "kiosk",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }
}

impl fmt::Display for CacheContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheContext {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kiosk" => Ok(Self::Kiosk),
            "admin" => Ok(Self::Admin),
            "owner" => Ok(Self::Owner),
            other => Err(format!("unknown cache context `{other}`")),
        }
    }
}

/// Live, shared cache configuration.
#[derive(Debug, Default)]
pub struct ContextGate {
    config: RwLock<CacheConfig>,
}

impl ContextGate {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Master switch AND the per-context switch; `None` uses the master alone.
    pub fn is_caching_enabled(&self, context: Option<CacheContext>) -> bool {
        let config = rw_read(&self.config, SOURCE, "is_caching_enabled");
        if !config.enable_caching {
            return false;
        }
        match context {
            None => true,
            Some(CacheContext::Kiosk) => config.enable_for_kiosk,
            Some(CacheContext::Admin) => config.enable_for_admin,
            Some(CacheContext::Owner) => config.enable_for_owner,
        }
    }

    /// Whether the startup preloader may run.
    pub fn should_preload(&self) -> bool {
        self.is_caching_enabled(Some(CacheContext::Kiosk)) && self.snapshot().preload_on_kiosk_init
    }

    pub fn snapshot(&self) -> CacheConfig {
        rw_read(&self.config, SOURCE, "snapshot").clone()
    }

    /// Shallow-merge `update` into the live config and return the result.
    pub fn update(&self, update: &CacheConfigUpdate) -> CacheConfig {
        let mut config = rw_write(&self.config, SOURCE, "update");
        config.apply(update);
        info!(config = ?*config, "Cache configuration updated");
        config.clone()
    }
}
