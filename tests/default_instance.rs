//! The process-wide convenience wrappers share one service, so every test
//! here runs serially and restores the gate before returning.

use kiosk_cache::cache::{
    CacheConfigUpdate, CacheContext, clear_cache, default_service, get_cache_item,
    is_caching_enabled, set_cache_item, update_cache_config,
};
use serde_json::{Value, json};
use serial_test::serial;

#[test]
#[serial]
fn categories_round_trip_through_default_instance() {
    assert!(set_cache_item(
        "categories",
        &json!([{"id": "c1"}]),
        "rest-1",
        CacheContext::Kiosk
    ));

    let read: Option<Value> = get_cache_item("categories", "rest-1", CacheContext::Kiosk);
    assert_eq!(read, Some(json!([{"id": "c1"}])));

    let other: Option<Value> = get_cache_item("categories", "rest-2", CacheContext::Kiosk);
    assert_eq!(other, None);

    assert_eq!(clear_cache("rest-1", None), 1);
}

#[test]
#[serial]
fn runtime_update_toggles_contexts() {
    assert!(is_caching_enabled(Some(CacheContext::Kiosk)));
    assert!(!is_caching_enabled(Some(CacheContext::Owner)));

    let updated = update_cache_config(&CacheConfigUpdate {
        enable_for_kiosk: Some(false),
        enable_for_owner: Some(true),
        ..CacheConfigUpdate::default()
    });
    assert!(!updated.enable_for_kiosk);
    assert!(updated.enable_for_owner);
    assert!(!set_cache_item("toppings", &json!([]), "rest-9", CacheContext::Kiosk));
    assert!(set_cache_item("toppings", &json!([]), "rest-9", CacheContext::Owner));

    update_cache_config(&CacheConfigUpdate {
        enable_for_kiosk: Some(true),
        enable_for_owner: Some(false),
        ..CacheConfigUpdate::default()
    });
    assert!(is_caching_enabled(Some(CacheContext::Kiosk)));
    assert_eq!(clear_cache("rest-9", Some("toppings")), 1);
}

#[test]
#[serial]
fn default_service_is_shared() {
    let first = default_service();
    let second = default_service();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}
