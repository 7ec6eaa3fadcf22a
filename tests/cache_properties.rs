//! Behavioural guarantees of the cache stack, driven through the public API
//! with a manual clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiosk_cache::cache::{
    AlwaysOnline, CacheConfig, CacheContext, CacheCoordinator, CacheDomain, CacheService,
    ContextGate, CoordinatorSettings, DomainKey, EMERGENCY_CLEANUP_MESSAGE, EnhancedCacheManager,
    ImageCache, ImageCacheError, InvalidationEvent, ManagerSettings, ManualClock, MemoryKvStore,
    MemoryPressure, OptimizationError, PolicyTable, RestaurantId, StorageEstimate,
};
use serde_json::{Value, json};

const QUOTA: u64 = 10 * 1024 * 1024;

/// Reports a fixed share of a 10MB quota as used.
struct FixedUsage {
    used: u64,
}

#[async_trait]
impl ImageCache for FixedUsage {
    fn cleanup(&self) -> Result<(), ImageCacheError> {
        Ok(())
    }

    async fn storage_estimate(&self) -> Result<StorageEstimate, ImageCacheError> {
        tokio::task::yield_now().await;
        Ok(StorageEstimate {
            used: self.used,
            quota: QUOTA,
        })
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    service: Arc<CacheService>,
    coordinator: Arc<CacheCoordinator>,
    manager: EnhancedCacheManager,
}

fn harness_with(config: CacheConfig, used: u64) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let service = Arc::new(CacheService::new(
        Arc::new(MemoryKvStore::new()),
        Arc::new(ContextGate::new(config)),
        clock.clone(),
    ));
    let coordinator = Arc::new(CacheCoordinator::new(
        Arc::clone(&service),
        PolicyTable::default(),
        Arc::new(FixedUsage { used }),
        Arc::new(AlwaysOnline),
        CoordinatorSettings::default(),
    ));
    let manager = EnhancedCacheManager::new(Arc::clone(&coordinator), ManagerSettings::default());
    Harness {
        clock,
        service,
        coordinator,
        manager,
    }
}

fn harness() -> Harness {
    harness_with(CacheConfig::default(), 0)
}

fn rid(id: &str) -> RestaurantId {
    RestaurantId::new(id)
}

#[test]
fn ttl_boundary_flips_hit_to_miss_and_removes_entry() {
    let h = harness();
    let key = DomainKey::categories();
    let ttl = h.service.gate().snapshot().cache_duration();

    assert!(h.service.set(&key, &json!([1, 2]), &rid("r"), CacheContext::Kiosk));

    h.clock.advance(ttl);
    let at_boundary: Option<Value> = h.service.get(&key, &rid("r"), CacheContext::Kiosk);
    assert_eq!(at_boundary, Some(json!([1, 2])));

    h.clock.advance(Duration::from_millis(1));
    let past_boundary: Option<Value> = h.service.get(&key, &rid("r"), CacheContext::Kiosk);
    assert_eq!(past_boundary, None);
    assert!(h.service.physical_keys().is_empty());
    assert!(h.service.store().keys().expect("keys").is_empty());
}

#[test]
fn disabled_contexts_never_round_trip() {
    let h = harness();
    let key = DomainKey::restaurant();
    let value = json!({"id": "r", "name": "Noodle Bar"});

    for context in [CacheContext::Admin, CacheContext::Owner] {
        assert!(!h.service.set(&key, &value, &rid("r"), context));
        let read: Option<Value> = h.service.get(&key, &rid("r"), context);
        assert_eq!(read, None, "{context} should not cache");
    }

    assert!(h.service.set(&key, &value, &rid("r"), CacheContext::Kiosk));
    let read: Option<Value> = h.service.get(&key, &rid("r"), CacheContext::Kiosk);
    assert_eq!(read, Some(value));
}

#[test]
fn master_switch_disables_every_context() {
    let h = harness_with(
        CacheConfig {
            enable_caching: false,
            ..CacheConfig::default()
        },
        0,
    );
    assert!(!h.service.set(&DomainKey::toppings(), &json!([]), &rid("r"), CacheContext::Kiosk));
    assert!(!h.service.gate().is_caching_enabled(None));
}

#[test]
fn restaurants_never_see_each_other() {
    let h = harness();
    let key = DomainKey::categories();
    h.service.set(&key, &json!(["a-only"]), &rid("A"), CacheContext::Kiosk);

    let read: Option<Value> = h.service.get(&key, &rid("B"), CacheContext::Kiosk);
    assert_eq!(read, None);

    h.service.set(&key, &json!(["b-only"]), &rid("B"), CacheContext::Kiosk);
    let read: Option<Value> = h.service.get(&key, &rid("A"), CacheContext::Kiosk);
    assert_eq!(read, Some(json!(["a-only"])));
}

#[test]
fn lookalike_restaurant_ids_do_not_collide() {
    let h = harness();
    h.service
        .set(&DomainKey::parse("x_menu"), &json!("first"), &rid("a"), CacheContext::Kiosk);
    let read: Option<Value> =
        h.service
            .get(&DomainKey::parse("menu"), &rid("a_x"), CacheContext::Kiosk);
    assert_eq!(read, None);
}

#[test]
fn rewriting_same_value_counts_refreshes() {
    let h = harness();
    let key = DomainKey::menu_item("42");
    let value = json!({"id": "42", "name": "Ramen", "price_cents": 1250});

    h.service.set(&key, &value, &rid("r"), CacheContext::Kiosk);
    let first = h
        .service
        .get_entry::<Value>(&key, &rid("r"), CacheContext::Kiosk)
        .expect("first read");
    assert_eq!(first.data, value);
    assert_eq!(first.refresh_count, None);

    h.service.set(&key, &value, &rid("r"), CacheContext::Kiosk);
    h.service.set(&key, &value, &rid("r"), CacheContext::Kiosk);
    let third = h
        .service
        .get_entry::<Value>(&key, &rid("r"), CacheContext::Kiosk)
        .expect("third read");
    assert_eq!(third.data, value);
    assert_eq!(third.refresh_count, Some(2));
}

#[test]
fn invalidation_clears_exactly_the_listed_domains() {
    let events = [
        InvalidationEvent::MenuUpdate,
        InvalidationEvent::CategoryUpdate,
        InvalidationEvent::ItemUpdate,
        InvalidationEvent::RestaurantUpdate,
        InvalidationEvent::ToppingUpdate,
        InvalidationEvent::ImageUpdate,
        InvalidationEvent::AuthUpdate,
        InvalidationEvent::Logout,
    ];
    let policies = PolicyTable::default();

    for event in events {
        let h = harness();
        let keys = [
            DomainKey::root(CacheDomain::Menu),
            DomainKey::menu_item("1"),
            DomainKey::restaurant(),
            DomainKey::categories(),
            DomainKey::toppings(),
            DomainKey::image("logo"),
            DomainKey::auth("session"),
        ];
        for key in &keys {
            h.service.set(key, &json!(key.as_str()), &rid("r"), CacheContext::Kiosk);
            h.service.set(key, &json!(key.as_str()), &rid("other"), CacheContext::Kiosk);
        }

        let outcome = h.coordinator.invalidate(&event, &rid("r"), None);
        let cleared = policies.domains_for_event(&event);
        assert_eq!(outcome.cleared_domains, cleared, "{event}");

        for key in &keys {
            let read: Option<Value> = h.service.get(key, &rid("r"), CacheContext::Kiosk);
            assert_eq!(
                read.is_none(),
                cleared.contains(&key.domain()),
                "{event} vs {key}"
            );
            let other: Option<Value> = h.service.get(key, &rid("other"), CacheContext::Kiosk);
            assert!(other.is_some(), "{event} leaked into another restaurant");
        }
    }
}

#[tokio::test]
async fn concurrent_optimizations_are_single_flight() {
    let h = harness();
    h.service
        .set(&DomainKey::parse("menu_v1"), &json!(1), &rid("r"), CacheContext::Kiosk);
    h.clock.advance(Duration::from_secs(1));
    h.service
        .set(&DomainKey::parse("menu_v2"), &json!(2), &rid("r"), CacheContext::Kiosk);

    let (first, second) = futures::join!(
        h.manager.perform_smart_optimization(None),
        h.manager.perform_smart_optimization(None)
    );

    let first = first.expect("first run wins");
    assert_eq!(second, Err(OptimizationError::InProgress));
    assert_eq!(first.cleared_entries, 1);
    assert_eq!(h.service.physical_keys().len(), 1);
    assert!(!h.manager.is_optimizing());
}

#[test]
fn categories_scenario_expires_after_cache_duration() {
    let h = harness();
    let key = DomainKey::parse("categories");
    let duration = h.service.gate().snapshot().cache_duration();

    h.service
        .set(&key, &json!([{"id": "c1"}]), &rid("rest-1"), CacheContext::Kiosk);
    let read: Option<Value> = h.service.get(&key, &rid("rest-1"), CacheContext::Kiosk);
    assert_eq!(read, Some(json!([{"id": "c1"}])));

    h.clock.advance(duration + Duration::from_millis(1));
    let read: Option<Value> = h.service.get(&key, &rid("rest-1"), CacheContext::Kiosk);
    assert_eq!(read, None);
}

#[test]
fn menu_update_scenario_spares_toppings() {
    let h = harness();
    let restaurant = rid("rest-1");
    for key in ["menu", "categories", "toppings"] {
        h.service
            .set(&DomainKey::parse(key), &json!(key), &restaurant, CacheContext::Kiosk);
    }

    h.coordinator
        .invalidate(&InvalidationEvent::MenuUpdate, &restaurant, None);

    let menu: Option<Value> = h.coordinator.get(&DomainKey::parse("menu"), &restaurant, CacheContext::Kiosk);
    let categories: Option<Value> =
        h.coordinator
            .get(&DomainKey::parse("categories"), &restaurant, CacheContext::Kiosk);
    let toppings: Option<Value> =
        h.coordinator
            .get(&DomainKey::parse("toppings"), &restaurant, CacheContext::Kiosk);
    assert_eq!(menu, None);
    assert_eq!(categories, None);
    assert_eq!(toppings, Some(json!("toppings")));
}

#[tokio::test]
async fn high_pressure_scenario_runs_emergency_cleanup() {
    let used = QUOTA / 10 * 9;
    let h = harness_with(CacheConfig::default(), used);
    h.service
        .set(&DomainKey::categories(), &json!([]), &rid("rest-1"), CacheContext::Kiosk);

    let health = h.manager.cache_health().await;
    assert_eq!(health.memory_pressure, MemoryPressure::High);

    let report = h
        .manager
        .perform_smart_optimization(Some(&rid("rest-1")))
        .await
        .expect("not in progress");
    assert!(
        report
            .optimizations
            .iter()
            .any(|message| message == EMERGENCY_CLEANUP_MESSAGE),
        "{:?}",
        report.optimizations
    );
}
