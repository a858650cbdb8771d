//! Typed view of Plant Assistant config entry documents
//!
//! Two document shapes exist. A main entry keeps its zones under
//! `options.irrigation_zones.<zone_id>.locations.<location_id>`; a location
//! subentry keeps a single location directly in `data`. The monitor edits the
//! raw documents, so this model only reads them.

use indexmap::IndexMap;
use pa_aggregation::LocationLinks;
use pa_core::constants::{CONF_IRRIGATION_ZONES, CONF_NAME, MAX_PLANT_SLOTS};
use pa_core::{ConfigDocument, EntityReference};
use pa_sensors::SlotAssignment;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IntegrationError, IntegrationResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlantSlotConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plant_device_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring_device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_entity_unique_id: Option<String>,
    #[serde(default)]
    pub plant_slots: IndexMap<String, PlantSlotConfig>,
}

impl LocationConfig {
    pub fn links(&self) -> LocationLinks {
        LocationLinks {
            monitoring_device: self.monitoring_device_id.is_some(),
            humidity_entity: self.humidity_entity_id.is_some(),
        }
    }

    /// The stored humidity reference, name plus stable id when captured
    pub fn humidity_reference(&self) -> Option<EntityReference> {
        self.humidity_entity_id
            .as_ref()
            .map(|id| EntityReference::new(id.clone(), self.humidity_entity_unique_id.clone()))
    }

    pub fn slot_assignments(&self) -> Vec<SlotAssignment> {
        self.plant_slots
            .iter()
            .map(|(slot_id, slot)| SlotAssignment::new(slot_id.clone(), slot.plant_device_id.clone()))
            .collect()
    }

    pub fn validate(&self) -> IntegrationResult<()> {
        if self.plant_slots.len() > MAX_PLANT_SLOTS {
            return Err(IntegrationError::TooManySlots {
                location: self.name.clone(),
                count: self.plant_slots.len(),
                max: MAX_PLANT_SLOTS,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrrigationZoneConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_device_id: Option<String>,
    #[serde(default)]
    pub locations: IndexMap<String, LocationConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlantAssistantOptions {
    #[serde(default)]
    pub irrigation_zones: IndexMap<String, IrrigationZoneConfig>,
}

/// A location found in an entry, with the key it is stored under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryLocation {
    pub zone_id: Option<String>,
    pub location_id: String,
    pub config: LocationConfig,
}

/// Read every location an entry configures, in document order
///
/// A document with neither zones nor a subentry `name` configures nothing.
pub fn entry_locations(entry_id: &str, document: &ConfigDocument) -> IntegrationResult<Vec<EntryLocation>> {
    let invalid = |source| IntegrationError::InvalidEntry {
        entry_id: entry_id.to_string(),
        source,
    };

    let locations: Vec<EntryLocation> = if document.options.contains_key(CONF_IRRIGATION_ZONES) {
        let options: PlantAssistantOptions =
            serde_json::from_value(Value::Object(document.options.clone())).map_err(invalid)?;
        options
            .irrigation_zones
            .into_iter()
            .flat_map(|(zone_id, zone)| {
                zone.locations
                    .into_iter()
                    .map(move |(location_id, config)| EntryLocation {
                        zone_id: Some(zone_id.clone()),
                        location_id,
                        config,
                    })
            })
            .collect()
    } else if document.data.contains_key(CONF_NAME) {
        let config: LocationConfig =
            serde_json::from_value(Value::Object(document.data.clone())).map_err(invalid)?;
        vec![EntryLocation {
            zone_id: None,
            location_id: entry_id.to_string(),
            config,
        }]
    } else {
        Vec::new()
    };

    for location in &locations {
        location.config.validate()?;
    }
    Ok(locations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn main_entry() -> ConfigDocument {
        ConfigDocument::from_values(
            json!({"name": "Garden"}),
            json!({
                "irrigation_zones": {
                    "zone_1": {
                        "name": "Front",
                        "locations": {
                            "loc_b": {
                                "name": "Patio",
                                "monitoring_device_id": "dev-probe",
                                "humidity_entity_id": "sensor.rh",
                                "humidity_entity_unique_id": "uid-rh",
                                "plant_slots": {
                                    "slot_1": {"name": "Fern", "plant_device_id": "dev-fern"},
                                    "slot_2": {}
                                }
                            },
                            "loc_a": {"name": "Bed"}
                        }
                    }
                }
            }),
        )
    }

    #[test]
    fn test_main_entry_locations_in_order() {
        let locations = entry_locations("e1", &main_entry()).unwrap();
        let names: Vec<_> = locations.iter().map(|l| l.config.name.as_str()).collect();
        assert_eq!(names, ["Patio", "Bed"]);

        let patio = &locations[0];
        assert_eq!(patio.zone_id.as_deref(), Some("zone_1"));
        assert_eq!(patio.location_id, "loc_b");
        assert_eq!(
            patio.config.links(),
            LocationLinks {
                monitoring_device: true,
                humidity_entity: true
            }
        );
        assert_eq!(
            patio.config.humidity_reference(),
            Some(EntityReference::new("sensor.rh", Some("uid-rh".into())))
        );
        assert_eq!(
            patio.config.slot_assignments(),
            vec![
                SlotAssignment::new("slot_1", Some("dev-fern".into())),
                SlotAssignment::new("slot_2", None),
            ]
        );
        assert_eq!(locations[1].config.links(), LocationLinks::default());
    }

    #[test]
    fn test_subentry_location() {
        let doc = ConfigDocument::from_values(
            json!({"name": "Kitchen", "humidity_entity_id": "sensor.kitchen_rh"}),
            json!({}),
        );
        let locations = entry_locations("sub1", &doc).unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].location_id, "sub1");
        assert_eq!(locations[0].zone_id, None);
        assert!(locations[0].config.links().humidity_entity);
    }

    #[test]
    fn test_empty_and_invalid_documents() {
        let empty = ConfigDocument::from_values(json!({}), json!({}));
        assert!(entry_locations("e1", &empty).unwrap().is_empty());

        let bad = ConfigDocument::from_values(json!({}), json!({"irrigation_zones": {"z": {"locations": 3}}}));
        assert!(matches!(
            entry_locations("e1", &bad),
            Err(IntegrationError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn test_slot_limit() {
        let slots: serde_json::Map<String, Value> = (0..=MAX_PLANT_SLOTS)
            .map(|i| (format!("slot_{i}"), json!({})))
            .collect();
        let doc = ConfigDocument::from_values(json!({"name": "Crowded", "plant_slots": slots}), json!({}));
        match entry_locations("e1", &doc) {
            Err(IntegrationError::TooManySlots { count, max, .. }) => {
                assert_eq!(count, MAX_PLANT_SLOTS + 1);
                assert_eq!(max, MAX_PLANT_SLOTS);
            }
            other => panic!("expected TooManySlots, got {other:?}"),
        }
    }
}
