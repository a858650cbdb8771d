use std::collections::HashMap;
use std::sync::Arc;

use pa_core::events::StateChangedData;
use pa_core::{Context, EntityId, State};
use pa_entity_monitor::ReferenceResolver;
use pa_host::{EventBus, StateStore, TypedEventReceiver};
use tracing::trace;

/// Host handles every sensor publishes and reads through
#[derive(Clone)]
pub struct SensorContext {
    pub states: Arc<StateStore>,
    pub bus: Arc<EventBus>,
    pub resolver: ReferenceResolver,
}

impl SensorContext {
    pub fn new(states: Arc<StateStore>, bus: Arc<EventBus>, resolver: ReferenceResolver) -> Self {
        Self {
            states,
            bus,
            resolver,
        }
    }

    /// The id the registry now uses for our entity, if it moved from `known`
    pub fn renamed_to(&self, unique_id: &str, known: &EntityId) -> Option<EntityId> {
        let current = self.resolver.resolve_name(unique_id)?;
        if current == known.to_string() {
            return None;
        }
        current.parse().ok()
    }

    pub fn state_of(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id)
    }

    pub fn publish(
        &self,
        entity_id: &EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
    ) {
        let state = state.into();
        trace!(entity_id = %entity_id, state = %state, "Publishing sensor state");
        self.states
            .set(entity_id.clone(), state, attributes, Context::new());
    }

    pub fn state_changes(&self) -> TypedEventReceiver<StateChangedData> {
        self.bus.subscribe_typed::<StateChangedData>()
    }
}
