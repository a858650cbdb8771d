//! Rename-resilient references to host entities

use serde::{Deserialize, Serialize};

/// A reference to a host entity: its current name plus, when known, the
/// stable id the host assigned at creation
///
/// The name can be reassigned by the user at any time; the stable id never
/// changes and is never reused. References created by older configurations
/// may not carry a stable id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityReference {
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
}

impl EntityReference {
    pub fn new(entity_id: impl Into<String>, unique_id: Option<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            unique_id,
        }
    }

    /// A reference that has not captured a stable id
    pub fn by_name(entity_id: impl Into<String>) -> Self {
        Self::new(entity_id, None)
    }

    /// Does this reference point at the entity that was called `old_name`
    /// and carries `stable_id`?
    ///
    /// Either condition is enough: the name match covers references that
    /// never captured a stable id, the identity match covers references whose
    /// name is already stale.
    pub fn matches(&self, old_name: &str, stable_id: Option<&str>) -> bool {
        if self.entity_id == old_name {
            return true;
        }
        match (self.unique_id.as_deref(), stable_id) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => false,
        }
    }

    /// Repoint at a new name, keeping the captured stable id unless a new one is given
    pub fn repoint(&mut self, entity_id: impl Into<String>, unique_id: Option<String>) {
        self.entity_id = entity_id.into();
        if unique_id.is_some() {
            self.unique_id = unique_id;
        }
    }
}

impl std::fmt::Display for EntityReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.unique_id {
            Some(uid) => write!(f, "{} ({})", self.entity_id, uid),
            None => f.write_str(&self.entity_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_by_name() {
        let r = EntityReference::by_name("sensor.patio_rh");
        assert!(r.matches("sensor.patio_rh", None));
        assert!(r.matches("sensor.patio_rh", Some("uid-1")));
        assert!(!r.matches("sensor.other", Some("uid-1")));
    }

    #[test]
    fn test_matches_by_identity_when_name_is_stale() {
        let r = EntityReference::new("sensor.stale_name", Some("uid-1".into()));
        assert!(r.matches("sensor.patio_rh", Some("uid-1")));
        assert!(!r.matches("sensor.patio_rh", Some("uid-2")));
        assert!(!r.matches("sensor.patio_rh", None));
    }

    #[test]
    fn test_repoint_keeps_identity() {
        let mut r = EntityReference::new("sensor.a", Some("uid-1".into()));
        r.repoint("sensor.b", None);
        assert_eq!(r, EntityReference::new("sensor.b", Some("uid-1".into())));

        r.repoint("sensor.c", Some("uid-9".into()));
        assert_eq!(r.unique_id.as_deref(), Some("uid-9"));
    }
}
