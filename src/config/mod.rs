//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU64, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, CoordinatorSettings, ManagerSettings};

mod cli;

pub use cli::*;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "kiosk-cache";
const DEFAULT_STORAGE_PATH: &str = "data/kiosk-cache.json";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
    pub storage: StorageSettings,
    pub coordinator: CoordinatorSettings,
    pub manager: ManagerSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub path: PathBuf,
    /// Byte ceiling for the durable store; unbounded when absent.
    pub quota_bytes: Option<NonZeroU64>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("KIOSK_CACHE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    storage: RawStorageSettings,
    coordinator: RawCoordinatorSettings,
    manager: RawManagerSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(path) = overrides.storage_path.as_ref() {
            self.storage.path = Some(path.clone());
        }
        if let Some(quota) = overrides.storage_quota_bytes {
            self.storage.quota_bytes = Some(quota);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            storage,
            coordinator,
            manager,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_config(cache)?;
        let storage = build_storage_settings(storage)?;
        let coordinator = build_coordinator_settings(coordinator, &cache)?;
        let manager = build_manager_settings(manager)?;

        Ok(Self {
            logging,
            cache,
            storage,
            coordinator,
            manager,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_config(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let cache_duration_ms = match cache.cache_duration_seconds {
        Some(seconds) => non_zero_secs(seconds, "cache.cache_duration_seconds")?.as_millis() as u64,
        None => defaults.cache_duration_ms,
    };

    let memory_tier_limit = match cache.memory_tier_limit {
        Some(0) => {
            return Err(LoadError::invalid(
                "cache.memory_tier_limit",
                "must be greater than zero",
            ));
        }
        Some(limit) => limit,
        None => defaults.memory_tier_limit,
    };

    Ok(CacheConfig {
        enable_caching: cache.enable_caching.unwrap_or(defaults.enable_caching),
        enable_for_kiosk: cache.enable_for_kiosk.unwrap_or(defaults.enable_for_kiosk),
        enable_for_admin: cache.enable_for_admin.unwrap_or(defaults.enable_for_admin),
        enable_for_owner: cache.enable_for_owner.unwrap_or(defaults.enable_for_owner),
        cache_duration_ms,
        preload_on_kiosk_init: cache
            .preload_on_kiosk_init
            .unwrap_or(defaults.preload_on_kiosk_init),
        memory_tier_limit,
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let path = storage
        .path
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_PATH));

    let quota_bytes = match storage.quota_bytes {
        Some(bytes) => Some(
            NonZeroU64::new(bytes)
                .ok_or_else(|| LoadError::invalid("storage.quota_bytes", "must be greater than zero"))?,
        ),
        None => None,
    };

    Ok(StorageSettings { path, quota_bytes })
}

fn build_coordinator_settings(
    coordinator: RawCoordinatorSettings,
    cache: &CacheConfig,
) -> Result<CoordinatorSettings, LoadError> {
    let defaults = CoordinatorSettings::default();

    let refresh_threshold = match coordinator.refresh_threshold_seconds {
        Some(seconds) => non_zero_secs(seconds, "coordinator.refresh_threshold_seconds")?,
        None => defaults.refresh_threshold,
    };
    if refresh_threshold >= cache.cache_duration() {
        return Err(LoadError::invalid(
            "coordinator.refresh_threshold_seconds",
            "must be shorter than cache.cache_duration_seconds",
        ));
    }

    let refresh_delay = coordinator
        .refresh_delay_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.refresh_delay);

    let optimization_interval = match coordinator.optimization_interval_seconds {
        Some(seconds) => non_zero_secs(seconds, "coordinator.optimization_interval_seconds")?,
        None => defaults.optimization_interval,
    };

    let max_entry_age = match coordinator.max_entry_age_seconds {
        Some(seconds) => non_zero_secs(seconds, "coordinator.max_entry_age_seconds")?,
        None => defaults.max_entry_age,
    };

    let low_priority_eviction_ratio = match coordinator.low_priority_eviction_ratio {
        Some(ratio) if ratio > 0.0 && ratio <= 1.0 => ratio,
        Some(_) => {
            return Err(LoadError::invalid(
                "coordinator.low_priority_eviction_ratio",
                "must be within (0, 1]",
            ));
        }
        None => defaults.low_priority_eviction_ratio,
    };

    Ok(CoordinatorSettings {
        refresh_threshold,
        refresh_delay,
        optimization_interval,
        max_entry_age,
        low_priority_eviction_ratio,
    })
}

fn build_manager_settings(manager: RawManagerSettings) -> Result<ManagerSettings, LoadError> {
    let defaults = ManagerSettings::default();

    let stale_window = match manager.stale_window_seconds {
        Some(seconds) => non_zero_secs(seconds, "manager.stale_window_seconds")?,
        None => defaults.stale_window,
    };

    let cooldown = manager
        .cooldown_seconds
        .map(Duration::from_secs)
        .unwrap_or(defaults.cooldown);

    let stale_threshold_percent = percent(
        manager.stale_threshold_percent,
        defaults.stale_threshold_percent,
        "manager.stale_threshold_percent",
    )?;
    let high_pressure_percent = percent(
        manager.high_pressure_percent,
        defaults.high_pressure_percent,
        "manager.high_pressure_percent",
    )?;
    let medium_pressure_percent = percent(
        manager.medium_pressure_percent,
        defaults.medium_pressure_percent,
        "manager.medium_pressure_percent",
    )?;
    if medium_pressure_percent >= high_pressure_percent {
        return Err(LoadError::invalid(
            "manager.medium_pressure_percent",
            "must be below manager.high_pressure_percent",
        ));
    }

    Ok(ManagerSettings {
        stale_window,
        cooldown,
        stale_threshold_percent,
        high_pressure_percent,
        medium_pressure_percent,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enable_caching: Option<bool>,
    enable_for_kiosk: Option<bool>,
    enable_for_admin: Option<bool>,
    enable_for_owner: Option<bool>,
    cache_duration_seconds: Option<u64>,
    preload_on_kiosk_init: Option<bool>,
    memory_tier_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    path: Option<PathBuf>,
    quota_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCoordinatorSettings {
    refresh_threshold_seconds: Option<u64>,
    refresh_delay_ms: Option<u64>,
    optimization_interval_seconds: Option<u64>,
    max_entry_age_seconds: Option<u64>,
    low_priority_eviction_ratio: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawManagerSettings {
    cooldown_seconds: Option<u64>,
    stale_window_seconds: Option<u64>,
    stale_threshold_percent: Option<f64>,
    high_pressure_percent: Option<f64>,
    medium_pressure_percent: Option<f64>,
}

fn non_zero_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn percent(value: Option<f64>, default: f64, key: &'static str) -> Result<f64, LoadError> {
    match value {
        Some(value) if (0.0..=100.0).contains(&value) => Ok(value),
        Some(_) => Err(LoadError::invalid(key, "must be within [0, 100]")),
        None => Ok(default),
    }
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
