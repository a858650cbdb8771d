//! An in-memory host with fixture builders

use std::collections::HashMap;

use pa_core::{Context, EntityId, State};
use pa_host::{ConfigEntry, ConfigEntryState};
use pa_core::ConfigDocument;
use pa_integration::{HostServices, Settings};
use serde_json::Value;

use super::init_tracing;

pub struct TestHost {
    pub services: HostServices,
}

impl TestHost {
    pub fn new() -> Self {
        init_tracing();
        Self {
            services: HostServices::in_memory(&Settings::default()),
        }
    }

    /// Register a third-party sensor and publish a value for it
    pub fn source_sensor(
        &self,
        entity_id: &str,
        unique_id: &str,
        device_id: Option<&str>,
        value: &str,
        attributes: Value,
    ) {
        self.services
            .registry
            .get_or_create("ble_monitor", entity_id, Some(unique_id), None, device_id);
        self.set_state(entity_id, value, attributes);
    }

    /// Register a plant database sensor carrying bounds as attributes
    pub fn plant(&self, entity_id: &str, device_id: &str, bounds: Value) {
        self.services.registry.get_or_create(
            pa_core::constants::PLANT_PLATFORM,
            entity_id,
            Some(&format!("pdb-{entity_id}")),
            None,
            Some(device_id),
        );
        self.set_state(entity_id, "ok", bounds);
    }

    pub fn set_state(&self, entity_id: &str, value: &str, attributes: Value) -> State {
        let entity_id: EntityId = entity_id.parse().expect("Invalid entity_id");
        let attributes: HashMap<String, Value> = match attributes {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        self.services
            .states
            .set(entity_id, value, attributes, Context::new())
    }

    /// Rename an entity the way the host does: registry first, then its state
    pub fn rename(&self, old: &str, new: &str) {
        self.services
            .registry
            .rename(old, new)
            .expect("rename should succeed");
        let old_id: EntityId = old.parse().expect("Invalid entity_id");
        let new_id: EntityId = new.parse().expect("Invalid entity_id");
        self.services.states.rename(&old_id, new_id);
    }

    pub async fn add_entry(&self, entry_id: &str, data: Value, options: Value) -> ConfigEntry {
        let entry = ConfigEntry::new(
            pa_core::constants::DOMAIN,
            entry_id,
            ConfigDocument::from_values(data, options),
        )
        .with_entry_id(entry_id);
        self.services
            .config_entries
            .add(entry)
            .await
            .expect("entry should be added")
    }

    pub fn entry(&self, entry_id: &str) -> ConfigEntry {
        self.services
            .config_entries
            .get(entry_id)
            .expect("entry should exist")
    }

    pub fn entry_state(&self, entry_id: &str) -> ConfigEntryState {
        self.entry(entry_id).state
    }

    pub fn reload_count(&self, entry_id: &str) -> usize {
        self.services.config_entries.reload_count(entry_id)
    }

    pub fn state(&self, entity_id: &str) -> Option<State> {
        self.services.states.get(entity_id)
    }

    pub fn attribute(&self, entity_id: &str, key: &str) -> Option<String> {
        self.state(entity_id)?.attribute_str(key).map(str::to_string)
    }

    pub fn assert_state(&self, entity_id: &str, expected: &str) {
        let state = self.services.states.get_state(entity_id);
        assert_eq!(
            state.as_deref(),
            Some(expected),
            "Expected entity {} to be in state '{}', but was {:?}",
            entity_id,
            expected,
            state
        );
    }
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}
