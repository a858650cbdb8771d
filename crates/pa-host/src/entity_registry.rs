//! Entity registry
//!
//! Maps the mutable entity id of every entity to the unique id its platform
//! assigned and the device that owns it. Creates, renames and removals are
//! announced on the event bus as `entity_registry_updated`.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use pa_core::events::{EntityRegistryUpdatedData, RegistryAction};
use pa_core::{Context, EntityId, EntityLookup, RegistryEntry};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bus::EventBus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntityRegistryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity id already registered: {0}")]
    AlreadyExists(String),

    #[error("Invalid entity id: {0}")]
    InvalidEntityId(String),
}

/// A registered entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Internal id (ULID)
    pub id: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_entry_id: Option<String>,
    pub platform: String,
    /// User-set name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl EntityEntry {
    fn new(
        entity_id: &str,
        platform: &str,
        unique_id: Option<&str>,
        config_entry_id: Option<&str>,
        device_id: Option<&str>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string(),
            entity_id: entity_id.to_string(),
            unique_id: unique_id.map(str::to_string),
            device_id: device_id.map(str::to_string),
            config_entry_id: config_entry_id.map(str::to_string),
            platform: platform.to_string(),
            name: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or(&self.entity_id)
    }

    fn to_registry_entry(&self) -> RegistryEntry {
        RegistryEntry {
            entity_id: self.entity_id.clone(),
            unique_id: self.unique_id.clone(),
            device_id: self.device_id.clone(),
            platform: self.platform.clone(),
        }
    }
}

/// Entity registry with unique id and device indexes
///
/// Entries are stored as `Arc<EntityEntry>` so reads never clone the entry.
pub struct EntityRegistry {
    /// Primary index in registration order
    by_entity_id: RwLock<IndexMap<String, Arc<EntityEntry>>>,

    /// unique_id -> entity_id
    by_unique_id: DashMap<String, String>,

    /// device_id -> entity_ids
    by_device_id: DashMap<String, HashSet<String>>,

    event_bus: Option<Arc<EventBus>>,
}

impl EntityRegistry {
    /// A registry that does not announce its mutations
    pub fn new() -> Self {
        Self {
            by_entity_id: RwLock::new(IndexMap::new()),
            by_unique_id: DashMap::new(),
            by_device_id: DashMap::new(),
            event_bus: None,
        }
    }

    /// A registry that fires `entity_registry_updated` on the given bus
    pub fn with_event_bus(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus: Some(event_bus),
            ..Self::new()
        }
    }

    fn fire(&self, data: EntityRegistryUpdatedData) {
        if let Some(bus) = &self.event_bus {
            bus.fire_typed(data, Context::new());
        }
    }

    fn index_entry(&self, entry: Arc<EntityEntry>) {
        let entity_id = entry.entity_id.clone();

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id.insert(unique_id.clone(), entity_id.clone());
        }
        if let Some(ref device_id) = entry.device_id {
            self.by_device_id
                .entry(device_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }
        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.insert(entity_id, entry);
        }
    }

    fn unindex_entry(&self, entry: &EntityEntry) {
        let entity_id = &entry.entity_id;

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id.remove(unique_id);
        }
        if let Some(ref device_id) = entry.device_id {
            if let Some(mut ids) = self.by_device_id.get_mut(device_id) {
                ids.remove(entity_id);
            }
        }
        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.shift_remove(entity_id);
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .ok()
            .and_then(|idx| idx.get(entity_id).cloned())
    }

    pub fn get_by_unique_id(&self, unique_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_unique_id
            .get(unique_id)
            .and_then(|entity_id| self.get(&entity_id))
    }

    pub fn get_by_device_id(&self, device_id: &str) -> Vec<Arc<EntityEntry>> {
        let mut entries: Vec<Arc<EntityEntry>> = self
            .by_device_id
            .get(device_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        entries
    }

    /// Register an entity, or return the existing entry with the same unique id
    pub fn get_or_create(
        &self,
        platform: &str,
        entity_id: &str,
        unique_id: Option<&str>,
        config_entry_id: Option<&str>,
        device_id: Option<&str>,
    ) -> Arc<EntityEntry> {
        if let Some(existing) = unique_id.and_then(|uid| self.get_by_unique_id(uid)) {
            return existing;
        }
        if let Some(existing) = self.get(entity_id) {
            warn!(entity_id, "Entity id already registered; returning existing entry");
            return existing;
        }

        let entry = Arc::new(EntityEntry::new(
            entity_id,
            platform,
            unique_id,
            config_entry_id,
            device_id,
        ));
        self.index_entry(entry.clone());
        debug!(entity_id, platform, unique_id, "Registered entity");

        self.fire(EntityRegistryUpdatedData {
            action: RegistryAction::Create,
            entity_id: entity_id.to_string(),
            old_entity_id: None,
        });
        entry
    }

    /// Change an entity's id, keeping its unique id and device
    pub fn rename(&self, old_entity_id: &str, new_entity_id: &str) -> Result<Arc<EntityEntry>, EntityRegistryError> {
        new_entity_id
            .parse::<EntityId>()
            .map_err(|_| EntityRegistryError::InvalidEntityId(new_entity_id.to_string()))?;

        let existing = self
            .get(old_entity_id)
            .ok_or_else(|| EntityRegistryError::NotFound(old_entity_id.to_string()))?;
        if old_entity_id == new_entity_id {
            return Ok(existing);
        }
        if self.get(new_entity_id).is_some() {
            return Err(EntityRegistryError::AlreadyExists(new_entity_id.to_string()));
        }

        let mut renamed = (*existing).clone();
        renamed.entity_id = new_entity_id.to_string();
        renamed.modified_at = Utc::now();
        let renamed = Arc::new(renamed);

        self.unindex_entry(&existing);
        self.index_entry(renamed.clone());
        info!(old_entity_id, new_entity_id, "Renamed entity");

        self.fire(EntityRegistryUpdatedData::renamed(old_entity_id, new_entity_id));
        Ok(renamed)
    }

    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let entry = self.get(entity_id)?;
        self.unindex_entry(&entry);
        debug!(entity_id, "Removed entity");

        self.fire(EntityRegistryUpdatedData {
            action: RegistryAction::Remove,
            entity_id: entity_id.to_string(),
            old_entity_id: None,
        });
        Some(entry)
    }

    /// Every entry, in registration order
    pub fn entries(&self) -> Vec<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .map(|idx| idx.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_entity_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityLookup for EntityRegistry {
    fn get_by_name(&self, entity_id: &str) -> Option<RegistryEntry> {
        self.get(entity_id).map(|e| e.to_registry_entry())
    }

    fn find_by_unique_id(&self, unique_id: &str) -> Option<RegistryEntry> {
        self.get_by_unique_id(unique_id).map(|e| e.to_registry_entry())
    }

    fn list_by_device(&self, device_id: &str) -> Vec<RegistryEntry> {
        self.get_by_device_id(device_id)
            .iter()
            .map(|e| e.to_registry_entry())
            .collect()
    }

    fn list_all(&self) -> Vec<RegistryEntry> {
        self.entries().iter().map(|e| e.to_registry_entry()).collect()
    }
}
