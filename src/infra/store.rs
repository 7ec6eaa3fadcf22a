//! File-backed durable store.
//!
//! The whole map lives in one JSON object on disk. Every mutation rewrites
//! the file through a temporary sibling that is renamed into place, so a
//! crash leaves either the old or the new contents.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::cache::{KvStore, StoreError, check_quota, rw_read, rw_write};

const SOURCE: &str = "infra::store";

pub struct FileKvStore {
    path: PathBuf,
    quota: Option<u64>,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileKvStore {
    /// Open `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>, quota: Option<u64>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| {
                StoreError::corrupt(format!("{}: {err}", path.display()))
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };

        info!(
            path = %path.display(),
            entries = entries.len(),
            quota_bytes = ?quota,
            "Durable cache store opened"
        );
        Ok(Self {
            path,
            quota,
            entries: RwLock::new(entries),
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut file = NamedTempFile::new_in(dir)?;
        let encoded = serde_json::to_vec(entries).map_err(io::Error::other)?;
        file.write_all(&encoded)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|err| err.error)?;

        debug!(path = %self.path.display(), bytes = encoded.len(), "Durable cache store persisted");
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(rw_read(&self.entries, SOURCE, "get").get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "set");
        check_quota(&entries, key, value, self.quota)?;

        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(err) = self.persist(&entries) {
            match previous {
                Some(previous) => entries.insert(key.to_string(), previous),
                None => entries.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "remove");
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(err) = self.persist(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(err);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(rw_read(&self.entries, SOURCE, "keys").keys().cloned().collect())
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.quota
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_file_opens_empty() {
        let dir = TempDir::new().expect("temp dir");
        let store = FileKvStore::open(dir.path().join("cache.json"), None).expect("open");
        assert!(store.keys().expect("keys").is_empty());
    }

    #[test]
    fn writes_survive_reopen() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("nested").join("cache.json");
        {
            let store = FileKvStore::open(&path, None).expect("open");
            store.set("a", "1").expect("set a");
            store.set("b", "2").expect("set b");
            store.remove("a").expect("remove a");
        }

        let reopened = FileKvStore::open(&path, None).expect("reopen");
        assert_eq!(reopened.keys().expect("keys"), vec!["b".to_string()]);
        assert_eq!(reopened.get("b").expect("get"), Some("2".to_string()));
    }

    #[test]
    fn quota_rejects_oversized_writes() {
        let dir = TempDir::new().expect("temp dir");
        let store = FileKvStore::open(dir.path().join("cache.json"), Some(8)).expect("open");
        store.set("k", "1234").expect("fits");
        let err = store.set("k2", "12345").expect_err("over quota");
        assert!(matches!(err, StoreError::QuotaExceeded { quota: 8, .. }));
        assert_eq!(store.keys().expect("keys").len(), 1);
        assert_eq!(store.quota_bytes(), Some(8));
    }

    #[test]
    fn unreadable_file_is_corrupt() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("cache.json");
        fs::write(&path, "[1, 2").expect("seed");
        let err = FileKvStore::open(&path, None).err().expect("corrupt");
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
