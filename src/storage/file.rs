//! Storage persisted to a local JSON file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;
use tracing::{debug, error, warn};

use super::Storage;
use crate::error::StorageError;

/// Storage file name.
const STORAGE_FILE: &str = "local_storage.json";

/// Get the default path of the storage file.
///
/// Returns `<data dir>/twa-auth/local_storage.json`, e.g.
/// `~/.local/share/twa-auth/local_storage.json` on Linux.
pub fn default_storage_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "twa", "twa-auth").map(|dirs| dirs.data_dir().join(STORAGE_FILE))
}

/// Key-value storage backed by a single JSON object on disk.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    /// Serialises read-modify-write of the file.
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Open storage at the platform default location.
    pub fn open_default() -> Result<Self, StorageError> {
        default_storage_path()
            .map(Self::new)
            .ok_or_else(|| StorageError::ReadFailed("Could not determine data directory".into()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the whole map. A missing or corrupted file reads as empty.
    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content =
            fs::read_to_string(&self.path).map_err(|e| StorageError::ReadFailed(e.to_string()))?;

        match serde_json::from_str(&content) {
            Ok(items) => Ok(items),
            Err(e) => {
                error!("Failed to parse storage file {:?}: {}, starting empty", self.path, e);
                Ok(BTreeMap::new())
            }
        }
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(items)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

        fs::write(&self.path, content).map_err(|e| StorageError::WriteFailed(e.to_string()))?;

        debug!("Saved storage to {:?}", self.path);
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.load()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut items = self.load()?;
        items.insert(key.to_string(), value.to_string());
        self.persist(&items)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut items = self.load()?;
        if items.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&items).map_err(|e| {
            warn!("Failed to remove {} from storage: {}", key, e);
            StorageError::DeleteFailed(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_storage_path() {
        if let Some(path) = default_storage_path() {
            assert!(path.ends_with(STORAGE_FILE));
        }
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");

        let storage = FileStorage::new(&path);
        storage.set_item("tgAuthData", "{\"a\":1}").unwrap();
        storage.set_item("other", "x").unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(
            reopened.get_item("tgAuthData").unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        reopened.remove_item("tgAuthData").unwrap();
        assert_eq!(storage.get_item("tgAuthData").unwrap(), None);
        assert_eq!(storage.get_item("other").unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn test_corrupted_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "not json").unwrap();

        let storage = FileStorage::new(&path);
        assert_eq!(storage.get_item("tgAuthData").unwrap(), None);

        storage.set_item("tgAuthData", "v").unwrap();
        assert_eq!(storage.get_item("tgAuthData").unwrap().as_deref(), Some("v"));
    }
}
