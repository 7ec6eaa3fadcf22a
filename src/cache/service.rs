//! Basic cache service.
//!
//! Owns the physical read/write path: context gating, envelope encoding,
//! the memory tier, the durable store and hard-TTL enforcement. Storage
//! failures never reach callers; they degrade to a miss or to a
//! memory-only write.

use std::collections::BTreeSet;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::codec::{self, CacheEntry};
use super::gate::{CacheContext, ContextGate};
use super::keys::{CacheDomain, DomainKey, NAMESPACE_PREFIX, RestaurantId, StorageKey};
use super::memory::MemoryTier;
use super::store::{KvStore, entry_size};

const METRIC_MEMORY_HIT: &str = "kiosk_cache_memory_hit_total";
const METRIC_DURABLE_HIT: &str = "kiosk_cache_durable_hit_total";
const METRIC_MISS: &str = "kiosk_cache_miss_total";
const METRIC_EXPIRED: &str = "kiosk_cache_expired_total";
const METRIC_CORRUPT: &str = "kiosk_cache_corrupt_total";
const METRIC_WRITE_FAILED: &str = "kiosk_cache_write_failed_total";

/// One namespaced entry found by [`CacheService::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedEntry {
    pub storage_key: String,
    pub key: StorageKey,
    /// `None` when the envelope could not be decoded.
    pub timestamp: Option<i64>,
    pub size_bytes: u64,
}

impl ScannedEntry {
    pub fn age_millis(&self, now: i64) -> Option<i64> {
        self.timestamp
            .map(|timestamp| now.saturating_sub(timestamp).max(0))
    }

    pub fn domain(&self) -> CacheDomain {
        self.key.key().domain()
    }
}

pub struct CacheService {
    store: Arc<dyn KvStore>,
    gate: Arc<ContextGate>,
    clock: Arc<dyn Clock>,
    memory: MemoryTier,
}

impl CacheService {
    pub fn new(store: Arc<dyn KvStore>, gate: Arc<ContextGate>, clock: Arc<dyn Clock>) -> Self {
        let memory = MemoryTier::new(gate.snapshot().memory_tier_limit);
        Self {
            store,
            gate,
            clock,
            memory,
        }
    }

    pub fn gate(&self) -> &Arc<ContextGate> {
        &self.gate
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    /// Write `data` under `(restaurant, key)`.
    ///
    /// Returns `false` when caching is disabled for `context` (a no-op) or the
    /// value cannot be serialized. A durable-store failure still returns
    /// `true`: the memory tier holds the entry for this process.
    pub fn set<T: Serialize>(
        &self,
        key: &DomainKey,
        data: &T,
        restaurant: &RestaurantId,
        context: CacheContext,
    ) -> bool {
        if !self.gate.is_caching_enabled(Some(context)) {
            debug!(key = %key, restaurant = %restaurant, %context, "Cache write skipped: caching disabled");
            return false;
        }

        let data = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(error) => {
                counter!(METRIC_WRITE_FAILED).increment(1);
                warn!(key = %key, restaurant = %restaurant, error = %error, "Cache value is not serializable");
                return false;
            }
        };

        let storage_key = StorageKey::new(restaurant, key).encode();
        let refresh_count = self
            .previous_refresh_count(&storage_key)
            .map(|previous| previous.unwrap_or(0).saturating_add(1));
        let entry = CacheEntry::new(data, self.clock.now_millis(), refresh_count);

        self.memory
            .ensure_capacity(self.gate.snapshot().memory_tier_limit);
        self.memory.put(storage_key.clone(), entry.clone());

        match codec::encode(&entry) {
            Ok(raw) => {
                if let Err(error) = self.store.set(&storage_key, &raw) {
                    counter!(METRIC_WRITE_FAILED).increment(1);
                    warn!(
                        storage_key = %storage_key,
                        error = %error,
                        "Durable cache write failed; memory tier keeps the entry"
                    );
                }
            }
            Err(error) => {
                counter!(METRIC_WRITE_FAILED).increment(1);
                warn!(storage_key = %storage_key, error = %error, "Cache envelope encoding failed");
            }
        }

        debug!(storage_key = %storage_key, refresh_count = ?refresh_count, "Cache entry written");
        true
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        key: &DomainKey,
        restaurant: &RestaurantId,
        context: CacheContext,
    ) -> Option<T> {
        self.get_entry(key, restaurant, context)
            .map(|entry| entry.data)
    }

    /// Read the full envelope for `(restaurant, key)`.
    ///
    /// Expired and undecodable entries are deleted and reported as misses.
    pub fn get_entry<T: DeserializeOwned>(
        &self,
        key: &DomainKey,
        restaurant: &RestaurantId,
        context: CacheContext,
    ) -> Option<CacheEntry<T>> {
        if !self.gate.is_caching_enabled(Some(context)) {
            return None;
        }

        let storage_key = StorageKey::new(restaurant, key).encode();
        let (entry, from_memory) = match self.memory.get(&storage_key) {
            Some(entry) => (entry, true),
            None => (self.read_durable(&storage_key)?, false),
        };

        let now = self.clock.now_millis();
        let ttl = self.gate.snapshot().cache_duration_millis();
        if entry.age_millis(now) > ttl {
            counter!(METRIC_EXPIRED).increment(1);
            counter!(METRIC_MISS).increment(1);
            self.remove_physical(&storage_key);
            debug!(storage_key = %storage_key, age_ms = entry.age_millis(now), "Cache entry expired");
            return None;
        }

        if from_memory {
            counter!(METRIC_MEMORY_HIT).increment(1);
        } else {
            counter!(METRIC_DURABLE_HIT).increment(1);
            self.memory.put(storage_key.clone(), entry.clone());
        }

        let CacheEntry {
            data,
            timestamp,
            refresh_count,
        } = entry;
        match serde_json::from_value::<T>(data) {
            Ok(data) => {
                debug!(storage_key = %storage_key, from_memory, "Cache hit");
                Some(CacheEntry::new(data, timestamp, refresh_count))
            }
            Err(error) => {
                counter!(METRIC_CORRUPT).increment(1);
                warn!(storage_key = %storage_key, error = %error, "Cached payload has unexpected shape; removing");
                self.remove_physical(&storage_key);
                None
            }
        }
    }

    /// Remove one logical key. Returns whether anything was removed.
    pub fn remove(&self, key: &DomainKey, restaurant: &RestaurantId) -> bool {
        self.remove_physical(&StorageKey::new(restaurant, key).encode())
    }

    /// Remove a physical key from both tiers.
    pub fn remove_physical(&self, storage_key: &str) -> bool {
        let in_memory = self.memory.remove(storage_key).is_some();
        let in_store = match self.store.get(storage_key) {
            Ok(Some(_)) => match self.store.remove(storage_key) {
                Ok(()) => true,
                Err(error) => {
                    warn!(storage_key, error = %error, "Durable cache removal failed");
                    false
                }
            },
            Ok(None) => false,
            Err(error) => {
                warn!(storage_key, error = %error, "Durable cache lookup failed during removal");
                false
            }
        };
        in_memory || in_store
    }

    /// Clear the whole restaurant namespace, or a single key within it.
    pub fn clear(&self, restaurant: &RestaurantId, specific_key: Option<&DomainKey>) -> usize {
        if let Some(key) = specific_key {
            return usize::from(self.remove(key, restaurant));
        }

        let prefix = StorageKey::tenant_prefix(restaurant);
        let removed = self
            .physical_keys()
            .into_iter()
            .filter(|storage_key| storage_key.starts_with(&prefix))
            .filter(|storage_key| self.remove_physical(storage_key))
            .count();
        info!(restaurant = %restaurant, removed, "Restaurant cache cleared");
        removed
    }

    /// Remove every entry of `domain` belonging to `restaurant`.
    pub fn clear_domain(&self, restaurant: &RestaurantId, domain: CacheDomain) -> usize {
        self.remove_matching(|key| key.restaurant() == restaurant && key.key().domain() == domain)
    }

    /// Remove every namespaced entry whose decoded key satisfies `predicate`.
    pub fn remove_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&StorageKey) -> bool,
    {
        self.physical_keys()
            .into_iter()
            .filter(|raw| StorageKey::decode(raw).is_some_and(|key| predicate(&key)))
            .filter(|raw| self.remove_physical(raw))
            .count()
    }

    /// Remove `restaurant_slug` copies in any namespace whose payload `id`
    /// is `restaurant`.
    pub fn remove_slug_aliases(&self, restaurant: &RestaurantId) -> usize {
        let slug_key = DomainKey::restaurant_slug();
        self.physical_keys()
            .into_iter()
            .filter(|raw| StorageKey::decode(raw).is_some_and(|key| *key.key() == slug_key))
            .filter(|raw| {
                self.peek(raw).is_some_and(|entry| {
                    entry.data.get("id").and_then(Value::as_str) == Some(restaurant.as_str())
                })
            })
            .filter(|raw| self.remove_physical(raw))
            .count()
    }

    /// Every namespaced physical key across both tiers, sorted.
    pub fn physical_keys(&self) -> Vec<String> {
        let mut keys: BTreeSet<String> = match self.store.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter(|key| key.starts_with(NAMESPACE_PREFIX))
                .collect(),
            Err(error) => {
                warn!(error = %error, "Durable cache key enumeration failed");
                BTreeSet::new()
            }
        };
        keys.extend(self.memory.keys());
        keys.into_iter().collect()
    }

    /// Inspect every namespaced entry without applying TTLs.
    pub fn scan(&self) -> Vec<ScannedEntry> {
        self.physical_keys()
            .into_iter()
            .filter_map(|storage_key| {
                let key = StorageKey::decode(&storage_key)?;
                let (timestamp, size_bytes) = self.describe(&storage_key)?;
                Some(ScannedEntry {
                    storage_key,
                    key,
                    timestamp,
                    size_bytes,
                })
            })
            .collect()
    }

    /// Bytes held by namespaced entries.
    pub fn namespace_usage_bytes(&self) -> u64 {
        self.scan().iter().map(|entry| entry.size_bytes).sum()
    }

    fn describe(&self, storage_key: &str) -> Option<(Option<i64>, u64)> {
        match self.store.get(storage_key) {
            Ok(Some(raw)) => {
                let timestamp = codec::decode_header(&raw)
                    .ok()
                    .map(|header| header.timestamp);
                return Some((timestamp, entry_size(storage_key, &raw)));
            }
            Ok(None) => {}
            Err(error) => {
                warn!(storage_key, error = %error, "Durable cache read failed during scan");
            }
        }

        let entry = self.memory.get(storage_key)?;
        let size = codec::encode(&entry)
            .map(|raw| entry_size(storage_key, &raw))
            .unwrap_or_else(|_| storage_key.len() as u64);
        Some((Some(entry.timestamp), size))
    }

    fn read_durable(&self, storage_key: &str) -> Option<CacheEntry<Value>> {
        let raw = match self.store.get(storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                counter!(METRIC_MISS).increment(1);
                debug!(storage_key, "Cache miss");
                return None;
            }
            Err(error) => {
                counter!(METRIC_MISS).increment(1);
                warn!(storage_key, error = %error, "Durable cache read failed");
                return None;
            }
        };

        match codec::decode::<Value>(&raw) {
            Ok(entry) => Some(entry),
            Err(error) => {
                counter!(METRIC_CORRUPT).increment(1);
                counter!(METRIC_MISS).increment(1);
                warn!(storage_key, error = %error, "Corrupt cache entry removed");
                self.remove_physical(storage_key);
                None
            }
        }
    }

    /// Decoded envelope from either tier, without TTL or gate checks.
    fn peek(&self, storage_key: &str) -> Option<CacheEntry<Value>> {
        if let Some(entry) = self.memory.get(storage_key) {
            return Some(entry);
        }
        let raw = self.store.get(storage_key).ok().flatten()?;
        codec::decode::<Value>(&raw).ok()
    }

    /// `Some(count)` when an entry already exists under `storage_key`.
    fn previous_refresh_count(&self, storage_key: &str) -> Option<Option<u32>> {
        if let Some(entry) = self.memory.get(storage_key) {
            return Some(entry.refresh_count);
        }
        let raw = self.store.get(storage_key).ok().flatten()?;
        codec::decode_header(&raw)
            .ok()
            .map(|header| header.refresh_count)
    }
}
