//! Event types delivered by the host event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Context;

/// Trait for typed event payloads
pub trait EventData: Clone + Send + Sync + 'static {
    /// The event type string for this payload
    fn event_type() -> &'static str;
}

/// Event type identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(String);

impl EventType {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Special event type that matches all events
    pub fn match_all() -> Self {
        Self("*".to_string())
    }

    pub fn is_match_all(&self) -> bool {
        self.0 == "*"
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event fired on the host bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T = serde_json::Value> {
    pub event_type: EventType,
    pub data: T,
    pub time_fired: DateTime<Utc>,
    pub context: Context,
}

impl<T> Event<T> {
    /// Create a new event stamped with the current time
    pub fn new(event_type: impl Into<EventType>, data: T, context: Context) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            time_fired: Utc::now(),
            context,
        }
    }
}

impl<T: EventData> Event<T> {
    /// Create a typed event from its payload
    pub fn typed(data: T, context: Context) -> Self {
        Self::new(T::event_type(), data, context)
    }
}

impl<T: EventData + Serialize> Event<T> {
    /// Erase the payload type so the event can travel on the untyped bus
    pub fn into_untyped(self) -> Event<serde_json::Value> {
        Event {
            event_type: self.event_type,
            data: serde_json::to_value(&self.data).unwrap_or_default(),
            time_fired: self.time_fired,
            context: self.context,
        }
    }
}

impl Event<serde_json::Value> {
    /// Parse the payload as `T`
    ///
    /// Returns `None` when the event type does not match or the payload is
    /// missing fields `T` requires.
    pub fn parse<T: EventData + serde::de::DeserializeOwned>(&self) -> Option<T> {
        if self.event_type.as_str() != T::event_type() {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EntityRegistryUpdatedData, RegistryAction, ENTITY_REGISTRY_UPDATED};
    use serde_json::json;

    #[test]
    fn test_parse_matching_payload() {
        let event = Event::new(
            ENTITY_REGISTRY_UPDATED,
            json!({"action": "update", "entity_id": "sensor.b", "old_entity_id": "sensor.a"}),
            Context::new(),
        );

        let data: EntityRegistryUpdatedData = event.parse().unwrap();
        assert_eq!(data.action, RegistryAction::Update);
        assert_eq!(data.old_entity_id.as_deref(), Some("sensor.a"));
    }

    #[test]
    fn test_parse_rejects_other_event_type() {
        let event = Event::new(
            "state_changed",
            json!({"action": "update", "entity_id": "sensor.b"}),
            Context::new(),
        );
        assert!(event.parse::<EntityRegistryUpdatedData>().is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_payload() {
        let event = Event::new(ENTITY_REGISTRY_UPDATED, json!({"action": "update"}), Context::new());
        assert!(event.parse::<EntityRegistryUpdatedData>().is_none());
    }

    #[test]
    fn test_typed_into_untyped() {
        let event = Event::typed(
            EntityRegistryUpdatedData::renamed("sensor.a", "sensor.b"),
            Context::new(),
        )
        .into_untyped();

        assert_eq!(event.event_type.as_str(), ENTITY_REGISTRY_UPDATED);
        assert_eq!(event.data["old_entity_id"], "sensor.a");
    }
}
