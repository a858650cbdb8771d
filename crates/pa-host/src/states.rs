//! Published entity states
//!
//! Tracks the current state of every entity and fires `state_changed` on the
//! event bus for each write and removal.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use pa_core::events::StateChangedData;
use pa_core::{Context, EntityId, State, StateReader};
use tracing::{debug, instrument, trace};

use crate::bus::EventBus;

pub struct StateStore {
    /// All entity states keyed by entity_id string
    states: DashMap<String, State>,
    event_bus: Arc<EventBus>,
}

impl StateStore {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            event_bus,
        }
    }

    /// Write the state of an entity and fire STATE_CHANGED
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let key = entity_id.to_string();
        let old_state = self.states.get(&key).map(|s| s.clone());

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone()),
            None => State::new(entity_id.clone(), state, attributes, context.clone()),
        };

        debug!(
            state = %new_state.state,
            changed = old_state.as_ref().map(|s| s.state != new_state.state).unwrap_or(true),
            "Setting entity state"
        );

        self.states.insert(key, new_state.clone());

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            },
            context,
        );

        new_state
    }

    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// The state value, or None if the entity has no state
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    /// All entity ids of a domain, sorted
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        let prefix = format!("{}.", domain);
        let mut ids: Vec<String> = self
            .states
            .iter()
            .filter(|r| r.key().starts_with(&prefix))
            .map(|r| r.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Remove an entity's state; fires STATE_CHANGED with no new state
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let old_state = self.states.remove(&entity_id.to_string()).map(|(_, s)| s);

        if let Some(ref state) = old_state {
            trace!("Removing entity state");
            self.event_bus.fire_typed(
                StateChangedData {
                    entity_id: entity_id.clone(),
                    old_state: Some(state.clone()),
                    new_state: None,
                },
                context,
            );
        }

        old_state
    }

    /// Move a state to a new entity id, as the host does after a registry rename
    ///
    /// Fires a removal for the old id and a write for the new one.
    pub fn rename(&self, old: &EntityId, new: EntityId) -> Option<State> {
        let previous = self.remove(old, Context::new())?;
        Some(self.set(new, previous.state, previous.attributes, Context::new()))
    }

    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

impl StateReader for StateStore {
    fn get_state(&self, entity_id: &str) -> Option<State> {
        self.get(entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pa_core::events::STATE_CHANGED;
    use serde_json::json;

    fn store() -> (Arc<EventBus>, StateStore) {
        let bus = Arc::new(EventBus::new());
        (bus.clone(), StateStore::new(bus))
    }

    #[tokio::test]
    async fn test_set_fires_state_changed() {
        let (bus, states) = store();
        let mut rx = bus.subscribe_typed::<StateChangedData>();

        states.set(
            "sensor.probe_temperature".parse().unwrap(),
            "21.5",
            HashMap::from([("unit_of_measurement".to_string(), json!("°C"))]),
            Context::new(),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type.as_str(), STATE_CHANGED);
        assert_eq!(event.data.entity_id.to_string(), "sensor.probe_temperature");
        assert!(event.data.old_state.is_none());
        assert_eq!(states.get_state("sensor.probe_temperature").as_deref(), Some("21.5"));
    }

    #[tokio::test]
    async fn test_remove_fires_empty_new_state() {
        let (bus, states) = store();
        let id: EntityId = "sensor.probe_ec".parse().unwrap();
        states.set(id.clone(), "350", HashMap::new(), Context::new());

        let mut rx = bus.subscribe_typed::<StateChangedData>();
        assert!(states.remove(&id, Context::new()).is_some());

        let event = rx.recv().await.unwrap();
        assert!(event.data.new_state.is_none());
        assert!(states.get("sensor.probe_ec").is_none());
    }

    #[test]
    fn test_rename_moves_state() {
        let (_bus, states) = store();
        let old: EntityId = "sensor.old_rh".parse().unwrap();
        states.set(old.clone(), "55", HashMap::new(), Context::new());

        states.rename(&old, "sensor.new_rh".parse().unwrap());

        assert!(states.get("sensor.old_rh").is_none());
        assert_eq!(states.get_state("sensor.new_rh").as_deref(), Some("55"));
        assert_eq!(states.entity_ids("sensor"), vec!["sensor.new_rh".to_string()]);
    }
}
