//! Durable key-value tier.
//!
//! The cache treats persistent storage as a synchronous, string-keyed map
//! with an optional byte quota. `MemoryKvStore` is the in-process
//! implementation; a file-backed one lives in `infra::store`.

use std::collections::BTreeMap;
use std::sync::RwLock;

use thiserror::Error;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage quota exceeded: {needed} bytes needed, quota is {quota} bytes")]
    QuotaExceeded { needed: u64, quota: u64 },
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage contents are corrupt: {message}")]
    Corrupt { message: String },
}

impl StoreError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}

/// Persistent string-keyed storage shared by every cache tier above it.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Maximum number of bytes the store accepts, if bounded.
    fn quota_bytes(&self) -> Option<u64> {
        None
    }

    /// Bytes currently held, counting keys and values.
    fn usage_bytes(&self) -> Result<u64, StoreError> {
        let mut total = 0;
        for key in self.keys()? {
            if let Some(value) = self.get(&key)? {
                total += entry_size(&key, &value);
            }
        }
        Ok(total)
    }
}

/// Size accounted for one stored pair.
pub fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

/// Reject a write that would push `entries` past `quota`.
pub(crate) fn check_quota(
    entries: &BTreeMap<String, String>,
    key: &str,
    value: &str,
    quota: Option<u64>,
) -> Result<(), StoreError> {
    let Some(quota) = quota else {
        return Ok(());
    };
    let current: u64 = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
    let replaced = entries.get(key).map_or(0, |old| entry_size(key, old));
    let needed = current - replaced + entry_size(key, value);
    if needed > quota {
        return Err(StoreError::QuotaExceeded { needed, quota });
    }
    Ok(())
}

/// Ordered in-process store.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, String>>,
    quota: Option<u64>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: u64) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            quota: Some(quota),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(rw_read(&self.entries, SOURCE, "get").get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "set");
        check_quota(&entries, key, value, self.quota)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        rw_write(&self.entries, SOURCE, "remove").remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(rw_read(&self.entries, SOURCE, "keys").keys().cloned().collect())
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.quota
    }

    fn usage_bytes(&self) -> Result<u64, StoreError> {
        Ok(rw_read(&self.entries, SOURCE, "usage_bytes")
            .iter()
            .map(|(k, v)| entry_size(k, v))
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let store = MemoryKvStore::new();
        store.set("a", "1").expect("set");
        assert_eq!(store.get("a").expect("get").as_deref(), Some("1"));

        store.remove("a").expect("remove");
        assert!(store.get("a").expect("get").is_none());
        store.remove("a").expect("removing a missing key is fine");
    }

    #[test]
    fn keys_are_sorted() {
        let store = MemoryKvStore::new();
        store.set("b", "2").expect("set");
        store.set("a", "1").expect("set");
        assert_eq!(store.keys().expect("keys"), vec!["a", "b"]);
    }

    #[test]
    fn quota_rejects_oversized_writes() {
        let store = MemoryKvStore::with_quota(10);
        store.set("k", "12345").expect("fits");

        let err = store.set("other", "123456").expect_err("exceeds quota");
        assert!(matches!(
            err,
            StoreError::QuotaExceeded {
                needed: 17,
                quota: 10
            }
        ));
        assert!(store.get("other").expect("get").is_none());
    }

    #[test]
    fn quota_accounts_for_replaced_values() {
        let store = MemoryKvStore::with_quota(10);
        store.set("k", "123456789").expect("fits");
        store.set("k", "987654321").expect("replacement fits");
        assert_eq!(store.usage_bytes().expect("usage"), 10);
    }

    #[test]
    fn default_usage_counts_keys_and_values() {
        struct Wrapper(MemoryKvStore);

        impl KvStore for Wrapper {
            fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
                self.0.get(key)
            }
            fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
                self.0.set(key, value)
            }
            fn remove(&self, key: &str) -> Result<(), StoreError> {
                self.0.remove(key)
            }
            fn keys(&self) -> Result<Vec<String>, StoreError> {
                self.0.keys()
            }
        }

        let store = Wrapper(MemoryKvStore::new());
        store.set("ab", "cde").expect("set");
        assert_eq!(store.usage_bytes().expect("usage"), 5);
        assert_eq!(store.quota_bytes(), None);
    }
}
