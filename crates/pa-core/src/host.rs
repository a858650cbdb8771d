//! Contracts of the host collaborators
//!
//! The plugin runs inside a host that owns the entity registry, the state
//! store and the config entry store. These traits are the only surface the
//! plugin's core reads through, so the core can be driven by the real host
//! or by the in-process model in `pa-host`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::State;

/// Errors reported by host operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("config entry not found: {0}")]
    EntryNotFound(String),

    #[error("failed to persist config entry {entry_id}: {reason}")]
    Persist { entry_id: String, reason: String },

    #[error("failed to reload config entry {entry_id}: {reason}")]
    Reload { entry_id: String, reason: String },
}

pub type HostResult<T> = Result<T, HostError>;

/// The registry facts the plugin needs about one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Current entity id (the mutable name)
    pub entity_id: String,
    /// Stable id assigned by the owning platform
    pub unique_id: Option<String>,
    /// Owning device, if any
    pub device_id: Option<String>,
    /// Platform that created the entity
    pub platform: String,
}

impl RegistryEntry {
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or(&self.entity_id)
    }
}

/// Read-only view of the host's entity registry
pub trait EntityLookup: Send + Sync {
    /// Look up the live entry currently named `entity_id`
    fn get_by_name(&self, entity_id: &str) -> Option<RegistryEntry>;

    /// Look up the live entry carrying `unique_id`
    fn find_by_unique_id(&self, unique_id: &str) -> Option<RegistryEntry>;

    /// Live entries belonging to `device_id`
    fn list_by_device(&self, device_id: &str) -> Vec<RegistryEntry>;

    /// Snapshot of every live entry
    fn list_all(&self) -> Vec<RegistryEntry>;
}

/// Read-only view of the host's state store
pub trait StateReader: Send + Sync {
    fn get_state(&self, entity_id: &str) -> Option<State>;
}

/// The persisted part of a config entry
///
/// Treated as an opaque nested mapping; callers pattern-match on the field
/// names they know and leave everything else untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl ConfigDocument {
    pub fn new(data: Map<String, Value>, options: Map<String, Value>) -> Self {
        Self { data, options }
    }

    /// Build a document from `json!` literals; non-object values become empty maps
    pub fn from_values(data: Value, options: Value) -> Self {
        let into_map = |v: Value| match v {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(into_map(data), into_map(options))
    }
}

/// The host's config entry store
#[async_trait]
pub trait ConfigEntryStore: Send + Sync {
    /// Ids of every entry owned by `domain`
    fn entry_ids(&self, domain: &str) -> Vec<String>;

    /// Current document of an entry
    fn read(&self, entry_id: &str) -> Option<ConfigDocument>;

    /// Replace an entry's document and persist it
    async fn write(&self, entry_id: &str, document: ConfigDocument) -> HostResult<()>;

    /// Tear down and re-create everything the entry set up
    async fn reload(&self, entry_id: &str) -> HostResult<()>;
}
