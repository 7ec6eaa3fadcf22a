//! In-memory tier in front of the durable store.
//!
//! Holds decoded envelopes so hot reads skip string parsing. Bounded by
//! entry count; when full, the oldest-inserted entry is evicted. Reads use
//! `peek` and never reorder, so a rewrite is the only thing that makes an
//! entry young again.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use tracing::debug;

use super::codec::CacheEntry;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::memory";
const METRIC_MEMORY_EVICT: &str = "kiosk_cache_memory_evict_total";

pub struct MemoryTier {
    entries: Mutex<LruCache<String, CacheEntry<Value>>>,
}

impl MemoryTier {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(non_zero(limit))),
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry<Value>> {
        mutex_lock(&self.entries, SOURCE, "get").peek(key).cloned()
    }

    /// Insert or replace `key`. Returns the key evicted to make room, if any.
    pub fn put(&self, key: String, entry: CacheEntry<Value>) -> Option<String> {
        let evicted = mutex_lock(&self.entries, SOURCE, "put")
            .push(key.clone(), entry)
            .map(|(old_key, _)| old_key)
            .filter(|old_key| *old_key != key);

        if let Some(evicted_key) = evicted.as_deref() {
            counter!(METRIC_MEMORY_EVICT).increment(1);
            debug!(evicted_key, "Memory tier evicted oldest entry");
        }
        evicted
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry<Value>> {
        mutex_lock(&self.entries, SOURCE, "remove").pop(key)
    }

    pub fn keys(&self) -> Vec<String> {
        mutex_lock(&self.entries, SOURCE, "keys")
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Apply a new entry bound, evicting the oldest entries if it shrank.
    pub fn ensure_capacity(&self, limit: usize) {
        let limit = non_zero(limit);
        let mut entries = mutex_lock(&self.entries, SOURCE, "ensure_capacity");
        if entries.cap() != limit {
            entries.resize(limit);
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn non_zero(limit: usize) -> NonZeroUsize {
    NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry(n: i64) -> CacheEntry<Value> {
        CacheEntry::new(json!(n), n, None)
    }

    #[test]
    fn evicts_oldest_inserted_when_full() {
        let tier = MemoryTier::new(2);
        assert!(tier.put("a".into(), entry(1)).is_none());
        assert!(tier.put("b".into(), entry(2)).is_none());

        // Reads do not refresh insertion order.
        assert!(tier.get("a").is_some());

        assert_eq!(tier.put("c".into(), entry(3)).as_deref(), Some("a"));
        assert!(tier.get("a").is_none());
        assert!(tier.get("b").is_some());
        assert!(tier.get("c").is_some());
    }

    #[test]
    fn replacing_a_key_is_not_an_eviction() {
        let tier = MemoryTier::new(2);
        tier.put("a".into(), entry(1));
        assert!(tier.put("a".into(), entry(2)).is_none());
        assert_eq!(tier.get("a").map(|e| e.timestamp), Some(2));
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn zero_limit_is_clamped_to_one() {
        let tier = MemoryTier::new(0);
        tier.put("a".into(), entry(1));
        tier.put("b".into(), entry(2));
        assert_eq!(tier.keys(), vec!["b".to_string()]);
    }

    #[test]
    fn shrinking_capacity_drops_oldest() {
        let tier = MemoryTier::new(3);
        tier.put("a".into(), entry(1));
        tier.put("b".into(), entry(2));
        tier.put("c".into(), entry(3));

        tier.ensure_capacity(1);
        assert_eq!(tier.keys(), vec!["c".to_string()]);
    }
}
