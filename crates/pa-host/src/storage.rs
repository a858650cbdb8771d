//! Versioned JSON persistence
//!
//! Each storage key maps to one file under the storage directory, wrapped in
//! a [`StorageFile`] envelope carrying the schema version.

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{key} was written by a newer schema (v{found}, supported v{supported})")]
    UnsupportedVersion {
        key: String,
        supported: u32,
        found: u32,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// On-disk envelope
///
/// ```json
/// { "version": 1, "minor_version": 1, "key": "plant_assistant.config_entries", "data": { ... } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    pub version: u32,
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

impl<T> StorageFile<T> {
    pub fn new(key: impl Into<String>, data: T, version: u32, minor_version: u32) -> Self {
        Self {
            version,
            minor_version,
            key: key.into(),
            data,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    /// Storage rooted at `<config_dir>/.storage`
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: config_dir.as_ref().join(".storage"),
        }
    }

    pub fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Load a key, refusing files whose major version is newer than `supported`
    ///
    /// Returns `Ok(None)` when nothing has been saved under the key yet.
    pub async fn load<T>(&self, key: &str, supported: u32) -> StorageResult<Option<StorageFile<T>>>
    where
        T: DeserializeOwned,
    {
        let path = self.file_path(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key, "No stored data");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let file: StorageFile<T> = serde_json::from_str(&content)?;
        if file.version > supported {
            warn!(key, found = file.version, supported, "Stored data is from a newer schema");
            return Err(StorageError::UnsupportedVersion {
                key: key.to_string(),
                supported,
                found: file.version,
            });
        }

        debug!(key, version = file.version, minor_version = file.minor_version, "Loaded storage file");
        Ok(Some(file))
    }

    /// Write a file atomically through a temp file and rename
    pub async fn save<T>(&self, file: &StorageFile<T>) -> StorageResult<()>
    where
        T: Serialize,
    {
        fs::create_dir_all(&self.dir).await?;

        let path = self.file_path(&file.key);
        let temp_path = self.file_path(&format!("{}.tmp", file.key));

        let content = serde_json::to_string_pretty(file)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(key = %file.key, version = file.version, "Saved storage file");
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.file_path(key)).await {
            Ok(()) => {
                debug!(key, "Deleted storage file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());

        let file = StorageFile::new("plant_assistant.test", json!({"zones": 2}), 1, 1);
        storage.save(&file).await.unwrap();

        let loaded = storage
            .load::<serde_json::Value>("plant_assistant.test", 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.data["zones"], 2);
        assert!(!storage.file_path("plant_assistant.test.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_key_loads_none() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        let loaded = storage.load::<serde_json::Value>("nothing", 1).await.unwrap();
        assert!(loaded.is_none());
        storage.delete("nothing").await.unwrap();
    }

    #[tokio::test]
    async fn test_newer_schema_is_refused() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        storage
            .save(&StorageFile::new("k", json!({}), 3, 1))
            .await
            .unwrap();

        let err = storage.load::<serde_json::Value>("k", 2).await.unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedVersion { found: 3, .. }));
    }
}
