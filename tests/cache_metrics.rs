use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use kiosk_cache::cache::{
    AlwaysOnline, CacheConfig, CacheContext, CacheCoordinator, CacheService, ContextGate,
    CoordinatorSettings, DomainKey, KvStore, ManualClock, MemoryKvStore, PolicyTable,
    RestaurantId, StorageKey, StoreImageCache,
};
use kiosk_cache::infra::telemetry;
use metrics_util::debugging::DebuggingRecorder;
use serde_json::{Value, json};

fn service(store: Arc<dyn KvStore>, config: CacheConfig, clock: Arc<ManualClock>) -> Arc<CacheService> {
    Arc::new(CacheService::new(store, Arc::new(ContextGate::new(config)), clock))
}

#[tokio::test]
async fn cache_metrics_emit_expected_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let clock = Arc::new(ManualClock::default());
    let restaurant = RestaurantId::new("rest-1");
    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());

    // memory hit, miss and eviction through a one-entry memory tier
    let small = service(
        Arc::clone(&store),
        CacheConfig {
            memory_tier_limit: 1,
            ..CacheConfig::default()
        },
        clock.clone(),
    );
    small.set(&DomainKey::categories(), &json!(["c1"]), &restaurant, CacheContext::Kiosk);
    let _: Option<Value> = small.get(&DomainKey::categories(), &restaurant, CacheContext::Kiosk);
    let _: Option<Value> = small.get(&DomainKey::toppings(), &restaurant, CacheContext::Kiosk);
    small.set(&DomainKey::toppings(), &json!(["t1"]), &restaurant, CacheContext::Kiosk);

    // durable hit from a second service sharing the store
    let fresh = service(Arc::clone(&store), CacheConfig::default(), clock.clone());
    let _: Option<Value> = fresh.get(&DomainKey::categories(), &restaurant, CacheContext::Kiosk);

    // corrupt envelope
    let corrupt_key = StorageKey::new(&restaurant, &DomainKey::restaurant()).encode();
    store.set(&corrupt_key, "{not json").expect("raw write");
    let _: Option<Value> = fresh.get(&DomainKey::restaurant(), &restaurant, CacheContext::Kiosk);

    // write failure against a full store
    let full = service(
        Arc::new(MemoryKvStore::with_quota(8)),
        CacheConfig::default(),
        clock.clone(),
    );
    full.set(&DomainKey::categories(), &json!(["too big"]), &restaurant, CacheContext::Kiosk);

    // background refresh queue and the maintenance sweep
    let coordinator = CacheCoordinator::new(
        Arc::clone(&fresh),
        PolicyTable::default(),
        Arc::new(StoreImageCache::new(Arc::clone(&store))),
        Arc::new(AlwaysOnline),
        CoordinatorSettings::default(),
    );
    clock.advance(Duration::from_secs(45 * 60));
    let _: Option<Value> = coordinator.get(&DomainKey::categories(), &restaurant, CacheContext::Kiosk);
    coordinator.perform_memory_optimization().await;

    // expiry past the hard TTL
    clock.advance(Duration::from_secs(24 * 60 * 60));
    let _: Option<Value> = fresh.get(&DomainKey::toppings(), &restaurant, CacheContext::Kiosk);
    coordinator.shutdown();

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for expected in [
        "kiosk_cache_memory_hit_total",
        "kiosk_cache_durable_hit_total",
        "kiosk_cache_miss_total",
        "kiosk_cache_memory_evict_total",
        "kiosk_cache_expired_total",
        "kiosk_cache_corrupt_total",
        "kiosk_cache_write_failed_total",
        "kiosk_cache_refresh_queue_len",
        "kiosk_cache_optimization_ms",
    ] {
        assert!(names.contains(expected), "missing metric {expected}: {names:?}");
    }
}
