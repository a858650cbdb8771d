//! Config entries
//!
//! Each entry holds one configured instance of an integration: a `data`
//! mapping fixed at creation and an `options` mapping the user edits later.
//! Entries are persisted through [`Storage`] when one is attached, and a
//! reload runs the handler the owning domain registered.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use pa_core::{ConfigDocument, ConfigEntryStore, HostError, HostResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::storage::{Storage, StorageError, StorageFile};

pub const STORAGE_KEY: &str = "plant_assistant.config_entries";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Setup failed for {entry_id}: {reason}")]
    SetupFailed { entry_id: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Lifecycle state of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    #[default]
    NotLoaded,
    SetupInProgress,
    Loaded,
    SetupError,
}

/// A configured integration instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub domain: String,
    pub title: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub options: Map<String, Value>,
    pub version: u32,
    #[serde(skip)]
    pub state: ConfigEntryState,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl ConfigEntry {
    pub fn new(domain: impl Into<String>, title: impl Into<String>, document: ConfigDocument) -> Self {
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: document.data,
            options: document.options,
            version: 1,
            state: ConfigEntryState::NotLoaded,
            created_at: now,
            modified_at: now,
        }
    }

    /// Use a fixed entry id instead of a generated one
    pub fn with_entry_id(mut self, entry_id: impl Into<String>) -> Self {
        self.entry_id = entry_id.into();
        self
    }

    pub fn document(&self) -> ConfigDocument {
        ConfigDocument::new(self.data.clone(), self.options.clone())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigEntriesData {
    entries: Vec<ConfigEntry>,
}

/// Set-up routine a domain registers; run on every reload
pub type ReloadHandler =
    Arc<dyn Fn(ConfigEntry) -> BoxFuture<'static, Result<(), String>> + Send + Sync + 'static>;

pub struct ConfigEntries {
    storage: Option<Arc<Storage>>,
    entries: DashMap<String, ConfigEntry>,
    handlers: DashMap<String, ReloadHandler>,
    reload_counts: DashMap<String, usize>,
    /// Entries whose writes are rejected, with the reason reported
    write_failures: DashMap<String, String>,
    /// Serializes reloads
    reload_lock: Mutex<()>,
}

impl ConfigEntries {
    /// In-memory entries, never persisted
    pub fn new() -> Self {
        Self {
            storage: None,
            entries: DashMap::new(),
            handlers: DashMap::new(),
            reload_counts: DashMap::new(),
            write_failures: DashMap::new(),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn with_storage(storage: Arc<Storage>) -> Self {
        Self {
            storage: Some(storage),
            ..Self::new()
        }
    }

    pub async fn load(&self) -> ConfigEntriesResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        if let Some(file) = storage
            .load::<ConfigEntriesData>(STORAGE_KEY, STORAGE_VERSION)
            .await?
        {
            info!(count = file.data.entries.len(), "Loading config entries from storage");
            for entry in file.data.entries {
                self.entries.insert(entry.entry_id.clone(), entry);
            }
        }
        Ok(())
    }

    pub async fn save(&self) -> ConfigEntriesResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let sorted: BTreeMap<String, ConfigEntry> = self
            .entries
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        let data = ConfigEntriesData {
            entries: sorted.into_values().collect(),
        };
        storage
            .save(&StorageFile::new(STORAGE_KEY, data, STORAGE_VERSION, STORAGE_MINOR_VERSION))
            .await?;
        Ok(())
    }

    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        info!(entry_id = %entry.entry_id, domain = %entry.domain, title = %entry.title, "Adding config entry");
        self.entries.insert(entry.entry_id.clone(), entry.clone());
        self.save().await?;
        Ok(entry)
    }

    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let (_, entry) = self
            .entries
            .remove(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        self.reload_counts.remove(entry_id);
        self.save().await?;
        Ok(entry)
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|e| e.clone())
    }

    /// Entries of a domain, oldest first
    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        let mut entries: Vec<ConfigEntry> = self
            .entries
            .iter()
            .filter(|e| e.domain == domain)
            .map(|e| e.clone())
            .collect();
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });
        entries
    }

    /// Replace the document of an entry and persist
    pub async fn update_document(
        &self,
        entry_id: &str,
        document: ConfigDocument,
    ) -> ConfigEntriesResult<()> {
        {
            let mut entry = self
                .entries
                .get_mut(entry_id)
                .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
            entry.data = document.data;
            entry.options = document.options;
            entry.modified_at = Utc::now();
        }
        debug!(entry_id, "Updated config entry document");
        self.save().await
    }

    pub fn set_state(&self, entry_id: &str, state: ConfigEntryState) {
        if let Some(mut entry) = self.entries.get_mut(entry_id) {
            entry.state = state;
            debug!(entry_id, ?state, "Config entry state changed");
        }
    }

    pub fn register_reload_handler(&self, domain: &str, handler: ReloadHandler) {
        self.handlers.insert(domain.to_string(), handler);
        debug!(domain, "Registered reload handler");
    }

    /// Run the domain's handler for an entry
    ///
    /// Entries of domains without a handler are marked loaded.
    pub async fn reload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.reload_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        *self.reload_counts.entry(entry_id.to_string()).or_insert(0) += 1;

        let handler = self.handlers.get(&entry.domain).map(|h| h.clone());
        self.set_state(entry_id, ConfigEntryState::SetupInProgress);

        if let Some(handler) = handler {
            if let Err(reason) = handler(entry).await {
                warn!(entry_id, %reason, "Config entry setup failed");
                self.set_state(entry_id, ConfigEntryState::SetupError);
                return Err(ConfigEntriesError::SetupFailed {
                    entry_id: entry_id.to_string(),
                    reason,
                });
            }
        }

        self.set_state(entry_id, ConfigEntryState::Loaded);
        info!(entry_id, "Reloaded config entry");
        Ok(())
    }

    /// How many reloads an entry has gone through
    pub fn reload_count(&self, entry_id: &str) -> usize {
        self.reload_counts.get(entry_id).map(|c| *c).unwrap_or(0)
    }

    /// Reject every later document write to an entry
    ///
    /// Lets callers exercise their handling of a failed persist.
    pub fn fail_writes(&self, entry_id: &str, reason: impl Into<String>) {
        self.write_failures.insert(entry_id.to_string(), reason.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ConfigEntries {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigEntryStore for ConfigEntries {
    fn entry_ids(&self, domain: &str) -> Vec<String> {
        self.get_by_domain(domain)
            .into_iter()
            .map(|e| e.entry_id)
            .collect()
    }

    fn read(&self, entry_id: &str) -> Option<ConfigDocument> {
        self.get(entry_id).map(|e| e.document())
    }

    async fn write(&self, entry_id: &str, document: ConfigDocument) -> HostResult<()> {
        if let Some(reason) = self.write_failures.get(entry_id).map(|r| r.clone()) {
            return Err(HostError::Persist {
                entry_id: entry_id.to_string(),
                reason,
            });
        }
        self.update_document(entry_id, document)
            .await
            .map_err(|e| match e {
                ConfigEntriesError::NotFound(id) => HostError::EntryNotFound(id),
                other => HostError::Persist {
                    entry_id: entry_id.to_string(),
                    reason: other.to_string(),
                },
            })
    }

    async fn reload(&self, entry_id: &str) -> HostResult<()> {
        ConfigEntries::reload(self, entry_id)
            .await
            .map_err(|e| match e {
                ConfigEntriesError::NotFound(id) => HostError::EntryNotFound(id),
                other => HostError::Reload {
                    entry_id: entry_id.to_string(),
                    reason: other.to_string(),
                },
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn zone_entry() -> ConfigEntry {
        ConfigEntry::new(
            "plant_assistant",
            "Garden",
            ConfigDocument::from_values(json!({"name": "Garden"}), json!({"irrigation_zones": {}})),
        )
    }

    #[tokio::test]
    async fn test_add_and_read_through_store_trait() {
        let entries = ConfigEntries::new();
        let entry = entries.add(zone_entry()).await.unwrap();

        assert_eq!(entries.entry_ids("plant_assistant"), vec![entry.entry_id.clone()]);
        assert!(entries.entry_ids("other").is_empty());

        let doc = ConfigEntryStore::read(&entries, &entry.entry_id).unwrap();
        assert_eq!(doc.data["name"], "Garden");
    }

    #[tokio::test]
    async fn test_write_persists_to_storage() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(dir.path()));
        let entries = ConfigEntries::with_storage(storage.clone());
        let entry = entries.add(zone_entry()).await.unwrap();

        let mut doc = entry.document();
        doc.options.insert("touched".into(), json!(true));
        ConfigEntryStore::write(&entries, &entry.entry_id, doc).await.unwrap();

        let reopened = ConfigEntries::with_storage(storage);
        reopened.load().await.unwrap();
        assert_eq!(reopened.get(&entry.entry_id).unwrap().options["touched"], true);
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let entries = ConfigEntries::new();
        let entry = entries.add(zone_entry()).await.unwrap();
        entries.fail_writes(&entry.entry_id, "disk full");

        let err = ConfigEntryStore::write(&entries, &entry.entry_id, ConfigDocument::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Persist { .. }));
        assert_eq!(entries.get(&entry.entry_id).unwrap().data["name"], "Garden");
    }

    #[tokio::test]
    async fn test_reload_runs_handler_and_counts() {
        let entries = ConfigEntries::new();
        let entry = entries.add(zone_entry()).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        entries.register_reload_handler(
            "plant_assistant",
            Arc::new(move |_entry: ConfigEntry| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                }
                .boxed()
            }),
        );

        entries.reload(&entry.entry_id).await.unwrap();
        ConfigEntryStore::reload(&entries, &entry.entry_id).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(entries.reload_count(&entry.entry_id), 2);
        assert_eq!(entries.get(&entry.entry_id).unwrap().state, ConfigEntryState::Loaded);
    }

    #[tokio::test]
    async fn test_failed_reload_sets_error_state() {
        let entries = ConfigEntries::new();
        let entry = entries.add(zone_entry()).await.unwrap();
        entries.register_reload_handler(
            "plant_assistant",
            Arc::new(|_entry: ConfigEntry| async { Err::<(), _>("boom".to_string()) }.boxed()),
        );

        let err = ConfigEntryStore::reload(&entries, &entry.entry_id).await.unwrap_err();
        assert!(matches!(err, HostError::Reload { .. }));
        assert_eq!(entries.get(&entry.entry_id).unwrap().state, ConfigEntryState::SetupError);
        assert!(matches!(
            ConfigEntryStore::reload(&entries, "missing").await,
            Err(HostError::EntryNotFound(_))
        ));
    }
}
