//! State type representing an entity's published value

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Context, EntityId, STATE_UNAVAILABLE, STATE_UNKNOWN};

/// The published state of an entity at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub entity_id: EntityId,

    /// The state value (e.g., "23.5", "normal", "unavailable")
    pub state: String,

    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// When the state value last changed
    pub last_changed: DateTime<Utc>,

    /// When the state was last written, even if the value did not change
    pub last_updated: DateTime<Utc>,

    pub context: Context,
}

impl State {
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: now,
            last_updated: now,
            context,
        }
    }

    /// Create an updated state, preserving `last_changed` if the value is the same
    pub fn with_update(
        &self,
        new_state: impl Into<String>,
        new_attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        let new_state = new_state.into();
        let last_changed = if self.state == new_state {
            self.last_changed
        } else {
            now
        };

        Self {
            entity_id: self.entity_id.clone(),
            state: new_state,
            attributes: new_attributes,
            last_changed,
            last_updated: now,
            context,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNAVAILABLE
    }

    /// True when the value is a real reading rather than a placeholder
    pub fn has_value(&self) -> bool {
        self.state != STATE_UNAVAILABLE && self.state != STATE_UNKNOWN
    }

    /// Parse the state value as a finite number
    pub fn numeric(&self) -> Option<f64> {
        self.state
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }

    /// Get an attribute value by key
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get a string attribute without cloning through serde
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        // Timestamps and context are not compared
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: &str) -> State {
        State::new(
            "sensor.soil_ec".parse().unwrap(),
            value,
            HashMap::from([("source_entity".to_string(), json!("sensor.probe_ec"))]),
            Context::new(),
        )
    }

    #[test]
    fn test_numeric() {
        assert_eq!(state("350").numeric(), Some(350.0));
        assert_eq!(state(" 21.5 ").numeric(), Some(21.5));
        assert_eq!(state("unavailable").numeric(), None);
        assert_eq!(state("NaN").numeric(), None);
    }

    #[test]
    fn test_with_update_keeps_last_changed() {
        let first = state("350");
        let second = first.with_update("350", HashMap::new(), Context::new());
        assert_eq!(first.last_changed, second.last_changed);

        let third = second.with_update("360", HashMap::new(), Context::new());
        assert!(third.last_changed >= second.last_changed);
        assert_eq!(third.state, "360");
    }

    #[test]
    fn test_attribute_str() {
        assert_eq!(state("1").attribute_str("source_entity"), Some("sensor.probe_ec"));
        assert!(!state("unknown").has_value());
    }
}
