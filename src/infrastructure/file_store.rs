// File-backed and in-memory key/value stores
use crate::application::snapshot_store::{KeyValueStore, StoreError};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// One JSON file per key under a directory. Calls block; the persistence
/// gateway runs them on the blocking pool.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        // Readers only ever see a complete file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            entries: Mutex::default(),
            quota: Some(bytes),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(available) = self.quota {
            if value.len() > available {
                return Err(StoreError::QuotaExceeded {
                    needed: value.len(),
                    available,
                });
            }
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("chart-store-{}", std::process::id()));
        let store = FileStore::new(&dir);

        assert!(store.get("chromatography_chart_data").unwrap().is_none());
        store.set("chromatography_chart_data", "{\"a\":1}").unwrap();
        assert_eq!(
            store.get("chromatography_chart_data").unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        store.remove("chromatography_chart_data").unwrap();
        store.remove("chromatography_chart_data").unwrap();
        assert!(store.get("chromatography_chart_data").unwrap().is_none());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_file_store_sanitizes_keys() {
        let store = FileStore::new("/var/lib/chart");
        assert_eq!(
            store.path_for("../escape/key"),
            PathBuf::from("/var/lib/chart/___escape_key.json")
        );
    }

    #[test]
    fn test_memory_store_quota() {
        let store = MemoryStore::with_quota(4);
        assert!(matches!(
            store.set("k", "too long"),
            Err(StoreError::QuotaExceeded { needed: 8, available: 4 })
        ));
        store.set("k", "ok").unwrap();
        assert_eq!(store.len(), 1);
    }
}
