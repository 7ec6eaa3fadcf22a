//! Kiosk cache system.
//!
//! A two-tier cache for restaurant kiosk data:
//!
//! - **Memory tier**: bounded map of decoded envelopes in front of storage
//! - **Durable tier**: any [`KvStore`], namespaced per restaurant
//!
//! Layered on top:
//!
//! - [`CacheService`]: gated get/set/clear with hard-TTL expiry
//! - [`CacheCoordinator`]: policy-aware writes, rule-based invalidation,
//!   stale-while-revalidate refresh and the periodic memory sweep
//! - [`EnhancedCacheManager`]: health diagnostics and single-flight
//!   smart/full optimization
//! - [`Preloader`]: kiosk startup population from a [`DataSource`]
//!
//! ## Configuration
//!
//! Runtime behavior is controlled via the `[cache]` section of
//! `kiosk-cache.toml` and can be changed live through [`ContextGate::update`]:
//!
//! ```toml
//! [cache]
//! enable_caching = true
//! enable_for_kiosk = true
//! enable_for_admin = false
//! cache_duration_seconds = 86400
//! # ... see config.rs for all options
//! ```

mod clock;
mod codec;
mod collaborators;
mod config;
mod coordinator;
mod events;
mod gate;
mod keys;
mod lock;
mod manager;
mod memory;
mod policy;
mod preload;
mod service;
mod store;

use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{CacheEntry, CodecError, EntryHeader};
pub use collaborators::{
    AlwaysOnline, DEFAULT_STORAGE_QUOTA_BYTES, ImageCache, ImageCacheError, NetworkStatus,
    RefreshError, Refresher, StorageEstimate, StoreImageCache,
};
pub use config::{CacheConfig, CacheConfigUpdate};
pub use coordinator::{
    CacheCoordinator, CacheMetrics, CoordinatorSettings, MemoryOptimizationReport, RefreshTarget,
};
pub use events::{InvalidationEvent, InvalidationMetadata, InvalidationOutcome};
pub use gate::{CacheContext, ContextGate};
pub use keys::{CacheDomain, DomainKey, NAMESPACE_PREFIX, RestaurantId, StorageKey};
pub use manager::{
    CacheHealth, EMERGENCY_CLEANUP_MESSAGE, EnhancedCacheManager, ManagerSettings,
    MemoryPressure, OptimizationError, OptimizationReport,
};
pub use memory::MemoryTier;
pub use policy::{CachePolicy, PolicyTable, Priority};
pub use preload::{DataSource, DataSourceError, PreloadReport, Preloader};
pub use service::{CacheService, ScannedEntry};
pub use store::{KvStore, MemoryKvStore, StoreError, entry_size};

pub(crate) use lock::{rw_read, rw_write};
pub(crate) use store::check_quota;

static DEFAULT_SERVICE: Lazy<Arc<CacheService>> = Lazy::new(|| {
    Arc::new(CacheService::new(
        Arc::new(MemoryKvStore::new()),
        Arc::new(ContextGate::default()),
        Arc::new(SystemClock),
    ))
});

/// Process-wide service over an in-memory store, initialised on first use.
pub fn default_service() -> Arc<CacheService> {
    Arc::clone(&DEFAULT_SERVICE)
}

pub fn set_cache_item<T: Serialize>(
    key: &str,
    data: &T,
    restaurant: &str,
    context: CacheContext,
) -> bool {
    DEFAULT_SERVICE.set(
        &DomainKey::parse(key),
        data,
        &RestaurantId::new(restaurant),
        context,
    )
}

pub fn get_cache_item<T: DeserializeOwned>(
    key: &str,
    restaurant: &str,
    context: CacheContext,
) -> Option<T> {
    DEFAULT_SERVICE.get(&DomainKey::parse(key), &RestaurantId::new(restaurant), context)
}

pub fn clear_cache(restaurant: &str, key: Option<&str>) -> usize {
    let key = key.map(DomainKey::parse);
    DEFAULT_SERVICE.clear(&RestaurantId::new(restaurant), key.as_ref())
}

pub fn is_caching_enabled(context: Option<CacheContext>) -> bool {
    DEFAULT_SERVICE.gate().is_caching_enabled(context)
}

pub fn update_cache_config(update: &CacheConfigUpdate) -> CacheConfig {
    DEFAULT_SERVICE.gate().update(update)
}
