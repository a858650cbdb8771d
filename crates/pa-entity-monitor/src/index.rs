//! Locating the mirror entities that depend on a source entity

use std::collections::BTreeSet;
use std::sync::Arc;

use pa_core::constants::{ATTR_SOURCE_ENTITY, ATTR_SOURCE_UNIQUE_ID, DOMAIN, MIRROR_SUFFIXES};
use pa_core::{EntityReference, RegistryEntry, StateReader};
use tracing::{debug, trace};

use crate::resolver::ReferenceResolver;

/// Scans the registry for our mirror entities and tests each one's published
/// source reference
pub struct MirrorReferenceIndex {
    resolver: ReferenceResolver,
    states: Arc<dyn StateReader>,
    suffixes: Vec<String>,
}

impl MirrorReferenceIndex {
    pub fn new(resolver: ReferenceResolver, states: Arc<dyn StateReader>) -> Self {
        Self {
            resolver,
            states,
            suffixes: MIRROR_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn is_candidate(&self, entry: &RegistryEntry) -> bool {
        if entry.domain() != "sensor" {
            return false;
        }
        let Some(unique_id) = entry.unique_id.as_deref() else {
            return false;
        };
        unique_id.starts_with(DOMAIN) && self.suffixes.iter().any(|s| unique_id.ends_with(s.as_str()))
    }

    /// The source reference a mirror currently publishes
    pub fn published_source(&self, mirror_entity_id: &str) -> Option<EntityReference> {
        let state = self.states.get_state(mirror_entity_id)?;
        let name = state.attribute_str(ATTR_SOURCE_ENTITY).unwrap_or_default();
        let unique_id = state.attribute_str(ATTR_SOURCE_UNIQUE_ID).map(str::to_string);
        if name.is_empty() && unique_id.is_none() {
            return None;
        }
        Some(EntityReference::new(name, unique_id))
    }

    /// Mirrors whose published source matches `old_entity_id` by name or
    /// `stable_id` by identity
    ///
    /// The registry has already applied the rename by the time this runs, so
    /// callers capture `stable_id` under the new name.
    pub fn find_dependents(
        &self,
        old_entity_id: &str,
        stable_id: Option<&str>,
    ) -> BTreeSet<String> {
        if !self.resolver.is_available() {
            debug!("Entity registry not available, skipping mirror search");
            return BTreeSet::new();
        }

        let dependents: BTreeSet<String> = self
            .resolver
            .entries()
            .into_iter()
            .filter(|entry| self.is_candidate(entry))
            .filter_map(|entry| {
                let source = self.published_source(&entry.entity_id)?;
                if source.matches(old_entity_id, stable_id) {
                    trace!(
                        mirror = %entry.entity_id,
                        source = %source,
                        "Mirror references renamed source"
                    );
                    Some(entry.entity_id)
                } else {
                    None
                }
            })
            .collect();

        debug!(
            old_entity_id,
            stable_id = ?stable_id,
            count = dependents.len(),
            "Mirror dependents found"
        );
        dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pa_core::{Context, EntityId};
    use pa_host::{EntityRegistry, EventBus, StateStore};
    use serde_json::json;
    use std::collections::HashMap;

    struct Fixture {
        registry: Arc<EntityRegistry>,
        states: Arc<StateStore>,
        index: MirrorReferenceIndex,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(EntityRegistry::new());
        let states = Arc::new(StateStore::new(Arc::new(EventBus::new())));
        let index = MirrorReferenceIndex::new(ReferenceResolver::new(registry.clone()), states.clone());
        Fixture {
            registry,
            states,
            index,
        }
    }

    impl Fixture {
        fn mirror(&self, entity_id: &str, unique_id: &str, source: &str, source_uid: Option<&str>) {
            self.registry
                .get_or_create("plant_assistant", entity_id, Some(unique_id), Some("entry"), None);
            let mut attributes = HashMap::from([(ATTR_SOURCE_ENTITY.to_string(), json!(source))]);
            if let Some(uid) = source_uid {
                attributes.insert(ATTR_SOURCE_UNIQUE_ID.to_string(), json!(uid));
            }
            self.states.set(
                entity_id.parse::<EntityId>().unwrap(),
                "40",
                attributes,
                Context::new(),
            );
        }
    }

    #[test]
    fn test_finds_by_name_and_by_identity() {
        let f = fixture();
        f.mirror(
            "sensor.patio_humidity",
            "plant_assistant_e1_patio_humidity_linked",
            "sensor.old_rh",
            None,
        );
        // Stale name, correct identity
        f.mirror(
            "sensor.porch_humidity",
            "plant_assistant_e1_porch_humidity_linked",
            "sensor.something_stale",
            Some("uid-rh"),
        );
        f.mirror(
            "sensor.shed_humidity",
            "plant_assistant_e1_shed_humidity_linked",
            "sensor.unrelated",
            Some("uid-other"),
        );

        let found = f.index.find_dependents("sensor.old_rh", Some("uid-rh"));
        assert_eq!(
            found.into_iter().collect::<Vec<_>>(),
            vec!["sensor.patio_humidity".to_string(), "sensor.porch_humidity".to_string()]
        );
    }

    #[test]
    fn test_ignores_foreign_and_non_mirror_entities() {
        let f = fixture();
        // Right attributes, wrong namespace
        f.mirror("sensor.foreign", "other_e1_patio_humidity_linked", "sensor.old_rh", None);
        // Our namespace, but an aggregated sensor rather than a mirror
        f.mirror("sensor.patio_min_temp", "plant_assistant_e1_patio_min_temperature", "sensor.old_rh", None);

        assert!(f.index.find_dependents("sensor.old_rh", Some("uid-rh")).is_empty());
    }

    #[test]
    fn test_mirror_without_state_is_skipped() {
        let f = fixture();
        f.registry.get_or_create(
            "plant_assistant",
            "sensor.patio_temperature",
            Some("plant_assistant_e1_patio_temperature_mirror"),
            None,
            None,
        );
        assert!(f.index.find_dependents("sensor.old_temp", Some("uid-temp")).is_empty());
        assert!(f.index.published_source("sensor.patio_temperature").is_none());
    }

    #[test]
    fn test_unavailable_registry_returns_empty() {
        let states = Arc::new(StateStore::new(Arc::new(EventBus::new())));
        let index = MirrorReferenceIndex::new(ReferenceResolver::unavailable(), states);
        assert!(index.find_dependents("sensor.a", Some("uid")).is_empty());
    }
}
