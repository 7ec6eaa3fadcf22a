//! Cache coordinator.
//!
//! Routes reads and writes through the policy table, fans invalidation
//! events out to every matching domain, schedules background refreshes for
//! aging entries and runs the periodic memory-optimization sweep.
//!
//! Reads follow stale-while-revalidate: an entry older than the refresh
//! threshold but within its TTL is returned immediately while a deferred
//! refresh is queued. The refresh queue deduplicates `(key, restaurant)`
//! pairs; an entry leaves the queue when its attempt finishes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metrics::{gauge, histogram};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::clock::duration_millis;
use super::collaborators::{ImageCache, NetworkStatus, Refresher};
use super::events::{InvalidationEvent, InvalidationMetadata, InvalidationOutcome};
use super::gate::CacheContext;
use super::keys::{CacheDomain, DomainKey, RestaurantId, StorageKey};
use super::lock::mutex_lock;
use super::policy::{CachePolicy, PolicyTable, Priority};
use super::service::{CacheService, ScannedEntry};

const SOURCE: &str = "cache::coordinator";
const METRIC_REFRESH_QUEUE_LEN: &str = "kiosk_cache_refresh_queue_len";
const METRIC_OPTIMIZATION_MS: &str = "kiosk_cache_optimization_ms";

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    /// Age after which a served hit schedules a background refresh.
    pub refresh_threshold: Duration,
    /// Delay before a scheduled refresh runs.
    pub refresh_delay: Duration,
    /// Period of the maintenance sweep.
    pub optimization_interval: Duration,
    /// Entries older than this are removed by the sweep regardless of domain.
    pub max_entry_age: Duration,
    /// Usage/quota ratio above which low-priority entries are evicted.
    pub low_priority_eviction_ratio: f64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            refresh_threshold: Duration::from_secs(30 * 60),
            refresh_delay: Duration::from_secs(1),
            optimization_interval: Duration::from_secs(10 * 60),
            max_entry_age: Duration::from_secs(24 * 60 * 60),
            low_priority_eviction_ratio: 0.8,
        }
    }
}

/// Access counters accumulated over the coordinator's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub memory_usage_bytes: u64,
    pub last_cleanup_timestamp: Option<i64>,
    pub total_requests: u64,
    pub cache_hits: u64,
}

impl CacheMetrics {
    fn record(&mut self, hit: bool) {
        self.total_requests += 1;
        if hit {
            self.cache_hits += 1;
        }
        self.hit_rate = self.cache_hits as f64 / self.total_requests as f64 * 100.0;
        self.miss_rate = 100.0 - self.hit_rate;
    }
}

/// A pending background refresh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefreshTarget {
    pub key: DomainKey,
    pub restaurant: RestaurantId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryOptimizationReport {
    pub expired_removed: usize,
    pub image_cleanup: bool,
    pub usage_ratio: Option<f64>,
    pub low_priority_removed: usize,
    pub freed_bytes: u64,
}

impl MemoryOptimizationReport {
    pub fn removed_entries(&self) -> usize {
        self.expired_removed + self.low_priority_removed
    }
}

pub struct CacheCoordinator {
    service: Arc<CacheService>,
    policies: PolicyTable,
    images: Arc<dyn ImageCache>,
    network: Arc<dyn NetworkStatus>,
    refresher: Option<Arc<dyn Refresher>>,
    settings: CoordinatorSettings,
    metrics: Mutex<CacheMetrics>,
    refresh_queue: Arc<Mutex<HashSet<RefreshTarget>>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl CacheCoordinator {
    pub fn new(
        service: Arc<CacheService>,
        policies: PolicyTable,
        images: Arc<dyn ImageCache>,
        network: Arc<dyn NetworkStatus>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            service,
            policies,
            images,
            network,
            refresher: None,
            settings,
            metrics: Mutex::new(CacheMetrics::default()),
            refresh_queue: Arc::new(Mutex::new(HashSet::new())),
            maintenance: Mutex::new(None),
        }
    }

    /// Attach the callback that background refreshes invoke.
    pub fn with_refresher(mut self, refresher: Arc<dyn Refresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn service(&self) -> &Arc<CacheService> {
        &self.service
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn images(&self) -> &Arc<dyn ImageCache> {
        &self.images
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn metrics(&self) -> CacheMetrics {
        mutex_lock(&self.metrics, SOURCE, "metrics").clone()
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        key: &DomainKey,
        restaurant: &RestaurantId,
        context: CacheContext,
    ) -> Option<T> {
        let now = self.service.clock().now_millis();
        let entry = match self.service.get_entry::<T>(key, restaurant, context) {
            Some(entry) if self.exceeds_policy_ttl(key.domain(), entry.age_millis(now)) => {
                self.service.remove(key, restaurant);
                debug!(key = %key, restaurant = %restaurant, "Entry past its domain TTL removed");
                None
            }
            other => other,
        };

        mutex_lock(&self.metrics, SOURCE, "get").record(entry.is_some());

        let entry = entry?;
        if entry.age_millis(now) > duration_millis(self.settings.refresh_threshold) {
            self.schedule_background_refresh(key, restaurant);
        }
        Some(entry.data)
    }

    /// Write through the service, first sweeping if the key's domain is over
    /// its byte bound.
    pub async fn set<T: Serialize>(
        &self,
        key: &DomainKey,
        data: &T,
        restaurant: &RestaurantId,
        context: CacheContext,
    ) -> bool {
        if !self.service.gate().is_caching_enabled(Some(context)) {
            debug!(key = %key, %context, "Coordinator write skipped: caching disabled");
            return false;
        }

        let limit = self
            .policies
            .policy_for(key.domain())
            .and_then(|policy| policy.max_size_bytes);
        if let Some(limit) = limit {
            let usage = self.service.namespace_usage_bytes();
            if usage > limit {
                info!(
                    key = %key,
                    domain = %key.domain(),
                    usage_bytes = usage,
                    limit_bytes = limit,
                    "Domain size bound exceeded; optimizing before write"
                );
                self.perform_memory_optimization().await;
            }
        }

        self.service.set(key, data, restaurant, context)
    }

    /// Clear every domain whose rules list `event`, plus the single-entity
    /// keys named in `metadata`.
    pub fn invalidate(
        &self,
        event: &InvalidationEvent,
        restaurant: &RestaurantId,
        metadata: Option<&InvalidationMetadata>,
    ) -> InvalidationOutcome {
        let event_id = Uuid::new_v4();
        let mut cleared_domains = Vec::new();
        let mut removed_entries = 0;

        for (domain, policy) in self.policies.iter() {
            if policy.matches(event) {
                removed_entries += self.service.clear_domain(restaurant, domain);
                if domain == CacheDomain::Restaurant {
                    removed_entries += self.service.remove_slug_aliases(restaurant);
                }
                cleared_domains.push(domain);
            }
        }

        if let Some(metadata) = metadata {
            if let Some(item_id) = metadata.item_id.as_deref() {
                removed_entries +=
                    usize::from(self.service.remove(&DomainKey::menu_item(item_id), restaurant));
            }
            if let Some(category_id) = metadata.category_id.as_deref() {
                removed_entries +=
                    usize::from(self.service.remove(&DomainKey::category(category_id), restaurant));
            }
        }

        info!(
            event_id = %event_id,
            event = %event,
            restaurant = %restaurant,
            cleared_domains = ?cleared_domains,
            removed_entries,
            "Cache invalidated"
        );

        InvalidationOutcome {
            event_id,
            event: event.clone(),
            cleared_domains,
            removed_entries,
        }
    }

    /// Expired-entry cleanup, image-cache cleanup, then low-priority eviction
    /// when usage is above the configured ratio. Each stage runs even if an
    /// earlier one failed.
    pub async fn perform_memory_optimization(&self) -> MemoryOptimizationReport {
        let run_id = Uuid::new_v4();
        let started_at = Instant::now();
        let now = self.service.clock().now_millis();
        let usage_before = self.service.namespace_usage_bytes();

        let max_age = duration_millis(self.settings.max_entry_age);
        let expired_removed = self
            .service
            .scan()
            .into_iter()
            .filter(|entry| self.is_sweepable(entry, now, max_age))
            .filter(|entry| self.service.remove_physical(&entry.storage_key))
            .count();

        let image_cleanup = match self.images.cleanup() {
            Ok(()) => true,
            Err(error) => {
                warn!(run_id = %run_id, error = %error, "Image cache cleanup failed");
                false
            }
        };

        let (usage_ratio, low_priority_removed) = match self.images.storage_estimate().await {
            Ok(estimate) => {
                let ratio = estimate.ratio();
                let removed = if ratio > self.settings.low_priority_eviction_ratio {
                    self.evict_low_priority()
                } else {
                    0
                };
                (Some(ratio), removed)
            }
            Err(error) => {
                warn!(run_id = %run_id, error = %error, "Storage estimate failed; skipping low-priority eviction");
                (None, 0)
            }
        };

        let usage_after = self.service.namespace_usage_bytes();
        {
            let mut metrics = mutex_lock(&self.metrics, SOURCE, "perform_memory_optimization");
            metrics.memory_usage_bytes = usage_after;
            metrics.last_cleanup_timestamp = Some(now);
        }

        let report = MemoryOptimizationReport {
            expired_removed,
            image_cleanup,
            usage_ratio,
            low_priority_removed,
            freed_bytes: usage_before.saturating_sub(usage_after),
        };

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_OPTIMIZATION_MS).record(elapsed_ms);
        info!(
            run_id = %run_id,
            expired_removed = report.expired_removed,
            low_priority_removed = report.low_priority_removed,
            freed_bytes = report.freed_bytes,
            elapsed_ms,
            "Memory optimization finished"
        );
        report
    }

    pub fn pending_refreshes(&self) -> Vec<RefreshTarget> {
        mutex_lock(&self.refresh_queue, SOURCE, "pending_refreshes")
            .iter()
            .cloned()
            .collect()
    }

    pub fn is_refresh_pending(&self, key: &DomainKey, restaurant: &RestaurantId) -> bool {
        let target = RefreshTarget {
            key: key.clone(),
            restaurant: restaurant.clone(),
        };
        mutex_lock(&self.refresh_queue, SOURCE, "is_refresh_pending").contains(&target)
    }

    /// Start the periodic sweep on the current tokio runtime.
    ///
    /// Returns `false` outside a runtime. The task holds only a weak
    /// reference and stops once the coordinator is dropped.
    pub fn spawn_maintenance(self: &Arc<Self>) -> bool {
        let Ok(handle) = Handle::try_current() else {
            warn!("No tokio runtime; cache maintenance not started");
            return false;
        };

        let coordinator = Arc::downgrade(self);
        let period = self.settings.optimization_interval.max(Duration::from_millis(1));
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                coordinator.perform_memory_optimization().await;
            }
        });

        if let Some(previous) = mutex_lock(&self.maintenance, SOURCE, "spawn_maintenance").replace(task) {
            previous.abort();
        }
        info!(period_secs = period.as_secs(), "Cache maintenance started");
        true
    }

    /// Stop the sweep and drain the refresh queue. Refresh tasks already
    /// running are left to finish.
    pub fn shutdown(&self) {
        if let Some(task) = mutex_lock(&self.maintenance, SOURCE, "shutdown").take() {
            task.abort();
        }
        let drained = {
            let mut queue = mutex_lock(&self.refresh_queue, SOURCE, "shutdown");
            let drained = queue.len();
            queue.clear();
            drained
        };
        gauge!(METRIC_REFRESH_QUEUE_LEN).set(0.0);
        info!(drained, "Cache coordinator shut down");
    }

    fn schedule_background_refresh(&self, key: &DomainKey, restaurant: &RestaurantId) -> bool {
        if !self.network.is_online() {
            debug!(key = %key, restaurant = %restaurant, "Offline; background refresh skipped");
            return false;
        }
        let Ok(handle) = Handle::try_current() else {
            debug!(key = %key, restaurant = %restaurant, "No tokio runtime; background refresh skipped");
            return false;
        };

        let target = RefreshTarget {
            key: key.clone(),
            restaurant: restaurant.clone(),
        };
        {
            let mut queue = mutex_lock(&self.refresh_queue, SOURCE, "schedule_refresh");
            if !queue.insert(target.clone()) {
                return false;
            }
            gauge!(METRIC_REFRESH_QUEUE_LEN).set(queue.len() as f64);
        }
        debug!(key = %key, restaurant = %restaurant, "Background refresh scheduled");

        let queue = Arc::clone(&self.refresh_queue);
        let refresher = self.refresher.clone();
        let delay = self.settings.refresh_delay;
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            match refresher {
                Some(refresher) => match refresher.refresh(&target.key, &target.restaurant).await {
                    Ok(()) => {
                        info!(key = %target.key, restaurant = %target.restaurant, "Background refresh completed");
                    }
                    Err(error) => {
                        warn!(
                            key = %target.key,
                            restaurant = %target.restaurant,
                            error = %error,
                            "Background refresh failed"
                        );
                    }
                },
                None => {
                    debug!(key = %target.key, restaurant = %target.restaurant, "No refresher attached; refresh dropped");
                }
            }

            let mut queue = mutex_lock(&*queue, SOURCE, "refresh_complete");
            queue.remove(&target);
            gauge!(METRIC_REFRESH_QUEUE_LEN).set(queue.len() as f64);
        });
        true
    }

    fn exceeds_policy_ttl(&self, domain: CacheDomain, age_millis: i64) -> bool {
        self.policies
            .policy_for(domain)
            .is_some_and(|policy| age_millis > duration_millis(policy.ttl))
    }

    fn is_sweepable(&self, entry: &ScannedEntry, now: i64, max_age: i64) -> bool {
        match entry.age_millis(now) {
            None => true,
            Some(age) => age > max_age || self.exceeds_policy_ttl(entry.domain(), age),
        }
    }

    fn evict_low_priority(&self) -> usize {
        let is_low = |key: &StorageKey| {
            key.key().is_temporary()
                || self
                    .policies
                    .policy_for(key.key().domain())
                    .is_some_and(|policy: &CachePolicy| policy.priority == Priority::Low)
        };
        let removed = self.service.remove_matching(is_low);
        info!(removed, "Low-priority cache entries evicted");
        removed
    }
}

impl Drop for CacheCoordinator {
    fn drop(&mut self) {
        if let Some(task) = mutex_lock(&self.maintenance, SOURCE, "drop").take() {
            task.abort();
        }
    }
}
