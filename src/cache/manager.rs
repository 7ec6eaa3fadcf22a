//! Health diagnostics and multi-stage optimization on top of the coordinator.
//!
//! `perform_smart_optimization` is single-flight: a call made while another
//! is running fails with [`OptimizationError::InProgress`]. Calls inside the
//! cooldown window return an empty report marked `skipped`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::clock::duration_millis;
use super::collaborators::StorageEstimate;
use super::coordinator::CacheCoordinator;
use super::keys::{CacheDomain, RestaurantId};
use super::lock::mutex_lock;
use super::preload::Preloader;
use super::service::ScannedEntry;

const SOURCE: &str = "cache::manager";

pub const EMERGENCY_CLEANUP_MESSAGE: &str = "Emergency memory cleanup performed";

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    /// Entries older than this count as stale.
    pub stale_window: Duration,
    /// Minimum time between two smart optimizations.
    pub cooldown: Duration,
    pub stale_threshold_percent: f64,
    pub high_pressure_percent: f64,
    pub medium_pressure_percent: f64,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            stale_window: Duration::from_secs(15 * 60),
            cooldown: Duration::from_secs(30),
            stale_threshold_percent: 30.0,
            high_pressure_percent: 85.0,
            medium_pressure_percent: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
}

impl MemoryPressure {
    pub fn classify(usage_percent: f64, settings: &ManagerSettings) -> Self {
        if usage_percent > settings.high_pressure_percent {
            Self::High
        } else if usage_percent > settings.medium_pressure_percent {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheHealth {
    pub total_size: u64,
    pub total_entries: usize,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub stale_percentage: f64,
    pub redundant_entries: usize,
    pub memory_pressure: MemoryPressure,
    /// `None` when the storage estimate could not be obtained.
    pub storage: Option<StorageEstimate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptimizationReport {
    pub run_id: Uuid,
    pub cleared_entries: usize,
    pub freed_bytes: u64,
    pub optimizations: Vec<String>,
    pub skipped: bool,
}

impl OptimizationReport {
    fn record(&mut self, removed: usize, freed_bytes: u64, message: impl Into<String>) {
        self.cleared_entries += removed;
        self.freed_bytes += freed_bytes;
        self.optimizations.push(message.into());
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptimizationError {
    #[error("a cache optimization is already in progress")]
    InProgress,
}

/// Holds the single-flight flag for the lifetime of one run.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, OptimizationError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| OptimizationError::InProgress)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct EnhancedCacheManager {
    coordinator: Arc<CacheCoordinator>,
    preloader: Option<Arc<Preloader>>,
    settings: ManagerSettings,
    in_progress: AtomicBool,
    last_run: Mutex<Option<i64>>,
}

impl EnhancedCacheManager {
    pub fn new(coordinator: Arc<CacheCoordinator>, settings: ManagerSettings) -> Self {
        Self {
            coordinator,
            preloader: None,
            settings,
            in_progress: AtomicBool::new(false),
            last_run: Mutex::new(None),
        }
    }

    pub fn with_preloader(mut self, preloader: Arc<Preloader>) -> Self {
        self.preloader = Some(preloader);
        self
    }

    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }

    pub fn is_optimizing(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub async fn cache_health(&self) -> CacheHealth {
        let service = self.coordinator.service();
        let now = service.clock().now_millis();
        let entries = service.scan();
        let metrics = self.coordinator.metrics();

        let storage = match self.coordinator.images().storage_estimate().await {
            Ok(estimate) => Some(estimate),
            Err(error) => {
                warn!(error = %error, "Storage estimate unavailable; reporting low pressure");
                None
            }
        };
        let memory_pressure = storage.map_or(MemoryPressure::Low, |estimate| {
            MemoryPressure::classify(estimate.usage_percent(), &self.settings)
        });

        let stale = self.stale_entries(&entries, now).len();
        let stale_percentage = if entries.is_empty() {
            0.0
        } else {
            stale as f64 / entries.len() as f64 * 100.0
        };

        CacheHealth {
            total_size: entries.iter().map(|entry| entry.size_bytes).sum(),
            total_entries: entries.len(),
            hit_rate: metrics.hit_rate,
            miss_rate: metrics.miss_rate,
            stale_percentage,
            redundant_entries: superseded_entries(&entries).len(),
            memory_pressure,
            storage,
        }
    }

    /// Run the conditional optimization stages, then the coordinator sweep.
    pub async fn perform_smart_optimization(
        &self,
        restaurant: Option<&RestaurantId>,
    ) -> Result<OptimizationReport, OptimizationError> {
        let guard = RunGuard::acquire(&self.in_progress)?;

        let now = self.coordinator.service().clock().now_millis();
        let last_run = *mutex_lock(&self.last_run, SOURCE, "perform_smart_optimization");
        if let Some(last_run) = last_run {
            let since = now.saturating_sub(last_run);
            if since < duration_millis(self.settings.cooldown) {
                info!(since_ms = since, "Smart optimization skipped: cooldown active");
                return Ok(OptimizationReport {
                    skipped: true,
                    ..OptimizationReport::default()
                });
            }
        }

        Ok(self.run(restaurant, guard).await)
    }

    /// Reload `restaurant` from source, then optimize regardless of cooldown.
    pub async fn force_full_optimization(
        &self,
        restaurant: &RestaurantId,
    ) -> Result<OptimizationReport, OptimizationError> {
        let guard = RunGuard::acquire(&self.in_progress)?;

        let reloaded = match &self.preloader {
            Some(preloader) => Some(preloader.reload(restaurant).await),
            None => {
                warn!(restaurant = %restaurant, "No preloader attached; full optimization skips reload");
                None
            }
        };

        let mut report = self.run(Some(restaurant), guard).await;
        if let Some(reloaded) = reloaded {
            report.optimizations.insert(
                0,
                format!(
                    "Reloaded {} entries from source ({} failures)",
                    reloaded.entries_written,
                    reloaded.failures.len()
                ),
            );
        }
        Ok(report)
    }

    async fn run(&self, restaurant: Option<&RestaurantId>, _guard: RunGuard<'_>) -> OptimizationReport {
        let mut report = OptimizationReport {
            run_id: Uuid::new_v4(),
            ..OptimizationReport::default()
        };
        let health = self.cache_health().await;
        if health.storage.is_none() {
            report
                .optimizations
                .push("Storage estimate unavailable; pressure treated as low".to_string());
        }

        let service = self.coordinator.service();
        let now = service.clock().now_millis();

        if health.redundant_entries > 0 {
            let entries = service.scan();
            let (removed, freed) = self.remove_entries(superseded_entries(&entries));
            report.record(removed, freed, format!("Removed {removed} redundant entries"));
        }

        if health.memory_pressure == MemoryPressure::High {
            let entries = service.scan();
            let targets = entries
                .iter()
                .filter(|entry| is_emergency_target(entry, restaurant));
            let (removed, freed) = self.remove_entries(targets);
            report.record(removed, freed, EMERGENCY_CLEANUP_MESSAGE);
        }

        if health.stale_percentage > self.settings.stale_threshold_percent {
            let entries = service.scan();
            let (removed, freed) = self.remove_entries(self.stale_entries(&entries, now));
            report.record(removed, freed, format!("Removed {removed} stale entries"));
        }

        let coordinated = self.coordinator.perform_memory_optimization().await;
        report.record(
            coordinated.removed_entries(),
            coordinated.freed_bytes,
            "Coordinated memory optimization completed",
        );

        *mutex_lock(&self.last_run, SOURCE, "run") = Some(service.clock().now_millis());
        info!(
            run_id = %report.run_id,
            restaurant = ?restaurant.map(RestaurantId::as_str),
            cleared_entries = report.cleared_entries,
            freed_bytes = report.freed_bytes,
            optimizations = ?report.optimizations,
            "Smart optimization finished"
        );
        report
    }

    fn stale_entries<'a>(&self, entries: &'a [ScannedEntry], now: i64) -> Vec<&'a ScannedEntry> {
        let window = duration_millis(self.settings.stale_window);
        entries
            .iter()
            .filter(|entry| entry.age_millis(now).is_none_or(|age| age > window))
            .collect()
    }

    fn remove_entries<'a, I>(&self, entries: I) -> (usize, u64)
    where
        I: IntoIterator<Item = &'a ScannedEntry>,
    {
        let service = self.coordinator.service();
        entries
            .into_iter()
            .filter(|entry| service.remove_physical(&entry.storage_key))
            .fold((0, 0), |(count, bytes), entry| {
                (count + 1, bytes + entry.size_bytes)
            })
    }
}

/// Every member of a redundancy group except the newest one.
fn superseded_entries(entries: &[ScannedEntry]) -> Vec<&ScannedEntry> {
    let mut groups: HashMap<(&RestaurantId, &str), Vec<&ScannedEntry>> = HashMap::new();
    for entry in entries {
        groups
            .entry((entry.key.restaurant(), entry.key.key().group_key()))
            .or_default()
            .push(entry);
    }

    groups
        .into_values()
        .filter(|members| members.len() > 1)
        .flat_map(|mut members| {
            members.sort_by_key(|entry| std::cmp::Reverse(entry.timestamp));
            members.into_iter().skip(1)
        })
        .collect()
}

/// Other tenants' menus plus every tenant's images and auth data.
fn is_emergency_target(entry: &ScannedEntry, current: Option<&RestaurantId>) -> bool {
    match entry.domain() {
        CacheDomain::Images | CacheDomain::Auth => true,
        CacheDomain::Menu | CacheDomain::Categories => {
            current.is_some_and(|current| entry.key.restaurant() != current)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::collaborators::{AlwaysOnline, ImageCache, ImageCacheError};
    use crate::cache::config::CacheConfig;
    use crate::cache::coordinator::CoordinatorSettings;
    use crate::cache::gate::{CacheContext, ContextGate};
    use crate::cache::keys::DomainKey;
    use crate::cache::policy::PolicyTable;
    use crate::cache::service::CacheService;
    use crate::cache::store::MemoryKvStore;

    const MB: u64 = 1_000_000;

    struct YieldingImages {
        used: u64,
        quota: u64,
    }

    #[async_trait]
    impl ImageCache for YieldingImages {
        fn cleanup(&self) -> Result<(), ImageCacheError> {
            Ok(())
        }

        async fn storage_estimate(&self) -> Result<StorageEstimate, ImageCacheError> {
            tokio::task::yield_now().await;
            Ok(StorageEstimate {
                used: self.used,
                quota: self.quota,
            })
        }
    }

    fn manager(used: u64) -> (EnhancedCacheManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let service = Arc::new(CacheService::new(
            Arc::new(MemoryKvStore::new()),
            Arc::new(ContextGate::new(CacheConfig::default())),
            clock.clone(),
        ));
        let coordinator = CacheCoordinator::new(
            service,
            PolicyTable::default(),
            Arc::new(YieldingImages {
                used,
                quota: 10 * MB,
            }),
            Arc::new(AlwaysOnline),
            CoordinatorSettings::default(),
        );
        (
            EnhancedCacheManager::new(Arc::new(coordinator), ManagerSettings::default()),
            clock,
        )
    }

    fn write(manager: &EnhancedCacheManager, restaurant: &str, key: DomainKey) {
        manager.coordinator().service().set(
            &key,
            &json!(key.as_str()),
            &RestaurantId::new(restaurant),
            CacheContext::Kiosk,
        );
    }

    #[test]
    fn pressure_thresholds() {
        let settings = ManagerSettings::default();
        assert_eq!(MemoryPressure::classify(90.0, &settings), MemoryPressure::High);
        assert_eq!(MemoryPressure::classify(85.0, &settings), MemoryPressure::Medium);
        assert_eq!(MemoryPressure::classify(61.0, &settings), MemoryPressure::Medium);
        assert_eq!(MemoryPressure::classify(60.0, &settings), MemoryPressure::Low);
    }

    #[tokio::test]
    async fn health_reports_pressure_staleness_and_redundancy() {
        let (manager, clock) = manager(9 * MB);
        write(&manager, "r", DomainKey::parse("menu_1700000000000"));
        clock.advance(Duration::from_secs(20 * 60));
        write(&manager, "r", DomainKey::parse("menu_1700000300000"));
        write(&manager, "r", DomainKey::menu_item("1"));
        write(&manager, "r", DomainKey::menu_item("2"));

        let health = manager.cache_health().await;
        assert_eq!(health.memory_pressure, MemoryPressure::High);
        assert_eq!(health.total_entries, 4);
        assert_eq!(health.redundant_entries, 1);
        assert_eq!(health.stale_percentage, 25.0);
        assert!(health.total_size > 0);
    }

    #[tokio::test]
    async fn redundant_cleanup_keeps_newest_member() {
        let (manager, clock) = manager(0);
        write(&manager, "r", DomainKey::parse("menu_full_v1"));
        clock.advance(Duration::from_secs(1));
        write(&manager, "r", DomainKey::parse("menu_full_v2"));

        let report = manager
            .perform_smart_optimization(None)
            .await
            .expect("not in progress");
        assert!(report.optimizations.contains(&"Removed 1 redundant entries".to_string()));
        assert_eq!(
            manager.coordinator().service().physical_keys(),
            vec!["kiosk_cache_v1_r_menu_full_v2".to_string()]
        );
    }

    #[tokio::test]
    async fn high_pressure_triggers_emergency_cleanup() {
        let (manager, _) = manager(9 * MB);
        let current = RestaurantId::new("rest-1");
        write(&manager, "rest-1", DomainKey::categories());
        write(&manager, "rest-2", DomainKey::categories());
        write(&manager, "rest-2", DomainKey::toppings());
        write(&manager, "rest-1", DomainKey::auth("session"));

        let report = manager
            .perform_smart_optimization(Some(&current))
            .await
            .expect("not in progress");
        assert!(
            report
                .optimizations
                .contains(&EMERGENCY_CLEANUP_MESSAGE.to_string())
        );
        assert_eq!(
            manager.coordinator().service().physical_keys(),
            vec![
                "kiosk_cache_v1_rest-1_categories".to_string(),
                "kiosk_cache_v1_rest-2_toppings".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_runs_are_rejected() {
        let (manager, _) = manager(0);
        write(&manager, "r", DomainKey::categories());

        let (first, second) = futures::join!(
            manager.perform_smart_optimization(None),
            manager.perform_smart_optimization(None)
        );
        assert!(first.is_ok());
        assert_eq!(second, Err(OptimizationError::InProgress));
        assert!(!manager.is_optimizing());
    }

    #[tokio::test]
    async fn cooldown_skips_back_to_back_runs() {
        let (manager, clock) = manager(0);
        let first = manager
            .perform_smart_optimization(None)
            .await
            .expect("first run");
        assert!(!first.skipped);

        let second = manager
            .perform_smart_optimization(None)
            .await
            .expect("second run");
        assert!(second.skipped);
        assert!(second.optimizations.is_empty());

        clock.advance(Duration::from_secs(31));
        let third = manager
            .perform_smart_optimization(None)
            .await
            .expect("third run");
        assert!(!third.skipped);
    }

    #[tokio::test]
    async fn stale_majority_is_removed() {
        let (manager, clock) = manager(0);
        write(&manager, "r", DomainKey::categories());
        write(&manager, "r", DomainKey::toppings());
        clock.advance(Duration::from_secs(16 * 60));
        write(&manager, "r", DomainKey::restaurant());

        let report = manager
            .perform_smart_optimization(None)
            .await
            .expect("not in progress");
        assert!(report.optimizations.contains(&"Removed 2 stale entries".to_string()));
        assert_eq!(report.cleared_entries, 2);
        assert_eq!(manager.coordinator().service().physical_keys().len(), 1);
    }

    #[tokio::test]
    async fn force_full_bypasses_cooldown() {
        let (manager, _) = manager(0);
        manager
            .perform_smart_optimization(None)
            .await
            .expect("first run");

        let report = manager
            .force_full_optimization(&RestaurantId::new("r"))
            .await
            .expect("forced run");
        assert!(!report.skipped);
        assert!(
            report
                .optimizations
                .contains(&"Coordinated memory optimization completed".to_string())
        );
    }
}
