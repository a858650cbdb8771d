//! Names shared between the plugin's entities, its config documents and the
//! rename-tracking subsystem

/// Integration domain; prefixes every unique id the plugin creates
pub const DOMAIN: &str = "plant_assistant";

/// Platform of the plant database whose sensors carry plant bounds
pub const PLANT_PLATFORM: &str = "openplantbook_ref";

/// Upper bound on plant slots per location
pub const MAX_PLANT_SLOTS: usize = 20;

// Config document fields
pub const CONF_IRRIGATION_ZONES: &str = "irrigation_zones";
pub const CONF_LOCATIONS: &str = "locations";
pub const CONF_NAME: &str = "name";
pub const CONF_LINKED_DEVICE_ID: &str = "linked_device_id";
pub const CONF_MONITORING_DEVICE_ID: &str = "monitoring_device_id";
pub const CONF_HUMIDITY_ENTITY_ID: &str = "humidity_entity_id";
pub const CONF_HUMIDITY_ENTITY_UNIQUE_ID: &str = "humidity_entity_unique_id";
pub const CONF_PLANT_SLOTS: &str = "plant_slots";
pub const CONF_PLANT_DEVICE_ID: &str = "plant_device_id";

// Unique id suffixes of mirror entities
pub const SUFFIX_HUMIDITY_LINKED: &str = "humidity_linked";
pub const SUFFIX_TEMPERATURE_MIRROR: &str = "temperature_mirror";
pub const SUFFIX_ILLUMINANCE_MIRROR: &str = "illuminance_mirror";
pub const SUFFIX_SOIL_MOISTURE_MIRROR: &str = "soil_moisture_mirror";
pub const SUFFIX_SOIL_CONDUCTIVITY_MIRROR: &str = "soil_conductivity_mirror";
pub const SUFFIX_SOIL_CONDUCTIVITY_STATUS: &str = "soil_conductivity_status";

/// Every suffix that marks one of our entities as a mirror
pub const MIRROR_SUFFIXES: [&str; 6] = [
    SUFFIX_HUMIDITY_LINKED,
    SUFFIX_TEMPERATURE_MIRROR,
    SUFFIX_ILLUMINANCE_MIRROR,
    SUFFIX_SOIL_MOISTURE_MIRROR,
    SUFFIX_SOIL_CONDUCTIVITY_MIRROR,
    SUFFIX_SOIL_CONDUCTIVITY_STATUS,
];

// Attributes published by mirror entities
pub const ATTR_SOURCE_ENTITY: &str = "source_entity";
pub const ATTR_SOURCE_UNIQUE_ID: &str = "source_unique_id";

// Attributes published by aggregated sensors
pub const ATTR_SOURCE_PLANT_DEVICE_IDS: &str = "source_plant_device_ids";
pub const ATTR_CONTRIBUTING_SLOT_IDS: &str = "contributing_slot_ids";
pub const ATTR_LAST_UPDATE: &str = "last_update";

// Standard presentation attributes
pub const ATTR_UNIT_OF_MEASUREMENT: &str = "unit_of_measurement";
pub const ATTR_DEVICE_CLASS: &str = "device_class";
pub const ATTR_ICON: &str = "icon";
pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";

/// Build the unique id of an entity the plugin owns
///
/// Format: `plant_assistant_<entry_id>_<location_slug>_<suffix>`
pub fn entity_unique_id(entry_id: &str, location_name: &str, suffix: &str) -> String {
    format!(
        "{}_{}_{}_{}",
        DOMAIN,
        entry_id,
        crate::slugify(location_name),
        suffix
    )
}
