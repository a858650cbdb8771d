//! Core types for Plant Assistant
//!
//! This crate provides the vocabulary shared by every other crate in the
//! workspace: entity ids and references, states, events and their payloads,
//! the plugin's naming constants, and the contracts of the host collaborators
//! (entity registry, state store, config entry store) the plugin runs inside.

mod context;
mod entity_id;
mod event;
mod reference;
mod state;

pub mod constants;
pub mod host;

pub use context::Context;
pub use entity_id::{slugify, EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use host::{ConfigDocument, ConfigEntryStore, EntityLookup, HostError, HostResult, RegistryEntry, StateReader};
pub use reference::EntityReference;
pub use state::State;

/// State value published when an entity has no usable value
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// State value published when a value exists but is not known yet
pub const STATE_UNKNOWN: &str = "unknown";

/// Standard event types consumed and produced by the plugin
pub mod events {
    use serde::{Deserialize, Serialize};

    use super::*;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type for entity registry mutations
    pub const ENTITY_REGISTRY_UPDATED: &str = "entity_registry_updated";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Kind of mutation carried by an ENTITY_REGISTRY_UPDATED event
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum RegistryAction {
        Create,
        Update,
        Remove,
    }

    /// Data for ENTITY_REGISTRY_UPDATED events
    ///
    /// `old_entity_id` is only present on updates that changed the entity id.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct EntityRegistryUpdatedData {
        pub action: RegistryAction,
        pub entity_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub old_entity_id: Option<String>,
    }

    impl EntityRegistryUpdatedData {
        /// Build the payload of a rename
        pub fn renamed(old_entity_id: impl Into<String>, entity_id: impl Into<String>) -> Self {
            Self {
                action: RegistryAction::Update,
                entity_id: entity_id.into(),
                old_entity_id: Some(old_entity_id.into()),
            }
        }
    }

    impl EventData for EntityRegistryUpdatedData {
        fn event_type() -> &'static str {
            ENTITY_REGISTRY_UPDATED
        }
    }
}
