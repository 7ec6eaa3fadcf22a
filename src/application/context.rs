//! Wiring of the cache stack from resolved settings.

use std::sync::Arc;

use tracing::info;

use crate::{
    cache::{
        AlwaysOnline, CacheCoordinator, CacheService, Clock, ContextGate, DataSource,
        EnhancedCacheManager, KvStore, PolicyTable, Preloader, StoreImageCache, SystemClock,
    },
    config::Settings,
    infra::{error::InfraError, store::FileKvStore},
};

/// Every layer of the cache, built over one durable store.
#[derive(Clone)]
pub struct CacheStack {
    pub service: Arc<CacheService>,
    pub coordinator: Arc<CacheCoordinator>,
    pub manager: Arc<EnhancedCacheManager>,
    pub preloader: Option<Arc<Preloader>>,
}

impl CacheStack {
    /// Open the configured file store and assemble the stack over it.
    pub fn build(
        settings: &Settings,
        source: Option<Arc<dyn DataSource>>,
    ) -> Result<Self, InfraError> {
        let quota = settings.storage.quota_bytes.map(|quota| quota.get());
        let store = FileKvStore::open(settings.storage.path.clone(), quota)?;
        info!(
            path = %settings.storage.path.display(),
            quota_bytes = ?quota,
            "Durable cache store opened"
        );
        Ok(Self::assemble(
            Arc::new(store),
            settings,
            source,
            Arc::new(SystemClock),
        ))
    }

    pub fn assemble(
        store: Arc<dyn KvStore>,
        settings: &Settings,
        source: Option<Arc<dyn DataSource>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let gate = Arc::new(ContextGate::new(settings.cache.clone()));
        let service = Arc::new(CacheService::new(Arc::clone(&store), gate, clock));
        let preloader =
            source.map(|source| Arc::new(Preloader::new(Arc::clone(&service), source)));

        let mut coordinator = CacheCoordinator::new(
            Arc::clone(&service),
            PolicyTable::default(),
            Arc::new(StoreImageCache::new(store)),
            Arc::new(AlwaysOnline),
            settings.coordinator.clone(),
        );
        if let Some(preloader) = preloader.as_ref() {
            coordinator = coordinator.with_refresher(preloader.clone());
        }
        let coordinator = Arc::new(coordinator);

        let mut manager =
            EnhancedCacheManager::new(Arc::clone(&coordinator), settings.manager.clone());
        if let Some(preloader) = preloader.as_ref() {
            manager = manager.with_preloader(Arc::clone(preloader));
        }

        Self {
            service,
            coordinator,
            manager: Arc::new(manager),
            preloader,
        }
    }
}
