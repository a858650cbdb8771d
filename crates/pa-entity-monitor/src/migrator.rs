//! Rewriting entity references held in persisted config entries
//!
//! Locations store their humidity source by entity id. Mirrors are repointed
//! live, but anything wired from config at setup time only picks up a rename
//! after the entry is rewritten and reloaded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pa_core::constants::{
    CONF_HUMIDITY_ENTITY_ID, CONF_HUMIDITY_ENTITY_UNIQUE_ID, CONF_IRRIGATION_ZONES, CONF_LOCATIONS,
    CONF_MONITORING_DEVICE_ID,
};
use pa_core::{ConfigDocument, ConfigEntryStore, EntityReference};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::error::MonitorResult;
use crate::resolver::ReferenceResolver;

/// What a migration pass did to one entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub entry_id: String,
    /// Dotted paths of the rewritten reference fields
    pub rewritten: Vec<String>,
    /// The renamed entity belongs to a monitoring device the entry links
    pub device_scoped: bool,
    pub reloaded: bool,
}

/// Repoint one location-shaped mapping; returns true if it changed
fn rewrite_location(
    location: &mut Map<String, Value>,
    old_entity_id: &str,
    new_entity_id: &str,
    stable_id: Option<&str>,
) -> bool {
    let Some(current) = location.get(CONF_HUMIDITY_ENTITY_ID).and_then(Value::as_str) else {
        return false;
    };
    let stored = EntityReference::new(
        current,
        location
            .get(CONF_HUMIDITY_ENTITY_UNIQUE_ID)
            .and_then(Value::as_str)
            .map(str::to_string),
    );

    // An identity match whose name is already current has been migrated
    let by_name = stored.entity_id == old_entity_id;
    if !by_name && (stored.entity_id == new_entity_id || !stored.matches(old_entity_id, stable_id)) {
        return false;
    }

    location.insert(
        CONF_HUMIDITY_ENTITY_ID.to_string(),
        Value::String(new_entity_id.to_string()),
    );
    if let Some(uid) = stable_id {
        location.insert(
            CONF_HUMIDITY_ENTITY_UNIQUE_ID.to_string(),
            Value::String(uid.to_string()),
        );
    }
    true
}

/// Rewrite every humidity reference to the renamed entity
///
/// Handles both a main entry (`options.irrigation_zones.*.locations.*`) and a
/// location subentry (`data`). Returns the paths that changed.
pub fn rewrite_references(
    document: &mut ConfigDocument,
    old_entity_id: &str,
    new_entity_id: &str,
    stable_id: Option<&str>,
) -> Vec<String> {
    let mut rewritten = Vec::new();

    if let Some(zones) = document
        .options
        .get_mut(CONF_IRRIGATION_ZONES)
        .and_then(Value::as_object_mut)
    {
        for (zone_id, zone) in zones.iter_mut() {
            let Some(locations) = zone
                .get_mut(CONF_LOCATIONS)
                .and_then(Value::as_object_mut)
            else {
                continue;
            };
            for (location_id, location) in locations.iter_mut() {
                let Some(location) = location.as_object_mut() else {
                    continue;
                };
                if rewrite_location(location, old_entity_id, new_entity_id, stable_id) {
                    info!(
                        zone_id = %zone_id,
                        location_id = %location_id,
                        old_entity_id,
                        new_entity_id,
                        "Updated humidity_entity_id"
                    );
                    rewritten.push(format!(
                        "options.{CONF_IRRIGATION_ZONES}.{zone_id}.{CONF_LOCATIONS}.{location_id}.{CONF_HUMIDITY_ENTITY_ID}"
                    ));
                }
            }
        }
    } else if rewrite_location(&mut document.data, old_entity_id, new_entity_id, stable_id) {
        info!(old_entity_id, new_entity_id, "Updated subentry humidity_entity_id");
        rewritten.push(format!("data.{CONF_HUMIDITY_ENTITY_ID}"));
    }

    rewritten
}

/// Does the document link `device_id` as a monitoring device anywhere?
pub fn references_device(document: &ConfigDocument, device_id: &str) -> bool {
    let links = |location: &Value| {
        location.get(CONF_MONITORING_DEVICE_ID).and_then(Value::as_str) == Some(device_id)
    };

    match document.options.get(CONF_IRRIGATION_ZONES).and_then(Value::as_object) {
        Some(zones) => zones
            .values()
            .filter_map(|zone| zone.get(CONF_LOCATIONS).and_then(Value::as_object))
            .flat_map(|locations| locations.values())
            .any(links),
        None => {
            document.data.get(CONF_MONITORING_DEVICE_ID).and_then(Value::as_str) == Some(device_id)
        }
    }
}

pub struct ConfigReferenceMigrator {
    resolver: ReferenceResolver,
    store: Arc<dyn ConfigEntryStore>,
    domain: String,
    /// Last rename reloaded per (entry, renamed entity)
    ///
    /// Keyed by the entity's stable id so a replay of that rename is skipped
    /// while a later rename of the same entity is not.
    last_reload: Mutex<HashMap<(String, String), (String, String)>>,
}

impl ConfigReferenceMigrator {
    pub fn new(resolver: ReferenceResolver, store: Arc<dyn ConfigEntryStore>, domain: impl Into<String>) -> Self {
        Self {
            resolver,
            store,
            domain: domain.into(),
            last_reload: Mutex::new(HashMap::new()),
        }
    }

    fn with_reloads<R>(
        &self,
        f: impl FnOnce(&mut HashMap<(String, String), (String, String)>) -> R,
    ) -> R {
        match self.last_reload.lock() {
            Ok(mut reloads) => f(&mut reloads),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Was this exact rename the last one reloaded for the entity?
    fn already_reloaded(
        &self,
        entry_id: &str,
        entity: &str,
        old_entity_id: &str,
        new_entity_id: &str,
    ) -> bool {
        self.with_reloads(|reloads| {
            reloads
                .get(&(entry_id.to_string(), entity.to_string()))
                .is_some_and(|(old, new)| old == old_entity_id && new == new_entity_id)
        })
    }

    fn record_reload(&self, entry_id: &str, entity: &str, old_entity_id: &str, new_entity_id: &str) {
        self.with_reloads(|reloads| {
            reloads.insert(
                (entry_id.to_string(), entity.to_string()),
                (old_entity_id.to_string(), new_entity_id.to_string()),
            );
        });
    }

    fn forget_entry(&self, entry_id: &str) {
        self.with_reloads(|reloads| reloads.retain(|(entry, _), _| entry != entry_id));
    }

    /// Migrate one entry
    ///
    /// `stable_id` and `device_id` describe the renamed entity as the
    /// registry knows it now.
    pub async fn migrate_entry(
        &self,
        entry_id: &str,
        old_entity_id: &str,
        new_entity_id: &str,
        stable_id: Option<&str>,
        device_id: Option<&str>,
    ) -> MonitorResult<MigrationReport> {
        let mut report = MigrationReport {
            entry_id: entry_id.to_string(),
            ..Default::default()
        };
        let Some(mut document) = self.store.read(entry_id) else {
            debug!(entry_id, "Config entry vanished before migration");
            self.forget_entry(entry_id);
            return Ok(report);
        };
        let entity = stable_id.unwrap_or(new_entity_id);

        report.rewritten = rewrite_references(&mut document, old_entity_id, new_entity_id, stable_id);
        report.device_scoped = device_id.is_some_and(|d| references_device(&document, d));

        let needs_reload = if !report.rewritten.is_empty() {
            self.store.write(entry_id, document).await?;
            true
        } else if report.device_scoped
            && !self.already_reloaded(entry_id, entity, old_entity_id, new_entity_id)
        {
            info!(
                entry_id,
                old_entity_id, new_entity_id, "Renamed entity belongs to a monitoring device"
            );
            true
        } else {
            false
        };

        if !needs_reload {
            debug!(
                entry_id,
                old_entity_id, new_entity_id, "No configuration updates needed"
            );
            return Ok(report);
        }

        info!(entry_id, "Reloading config entry to apply entity id changes");
        self.store.reload(entry_id).await?;
        // The rewrite reload also covers any device-scoped rebinding
        self.record_reload(entry_id, entity, old_entity_id, new_entity_id);
        report.reloaded = true;
        Ok(report)
    }

    /// Migrate every entry of our domain; failures are logged per entry
    pub async fn migrate_all(&self, old_entity_id: &str, new_entity_id: &str) -> Vec<MigrationReport> {
        let stable_id = self.resolver.capture_id(new_entity_id);
        let device_id = self.resolver.device_of(new_entity_id);

        let mut reports = Vec::new();
        for entry_id in self.store.entry_ids(&self.domain) {
            match self
                .migrate_entry(
                    &entry_id,
                    old_entity_id,
                    new_entity_id,
                    stable_id.as_deref(),
                    device_id.as_deref(),
                )
                .await
            {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(
                        entry_id = %entry_id,
                        old_entity_id,
                        new_entity_id,
                        error = %e,
                        "Error updating config entry for source entity change"
                    );
                }
            }
        }
        reports
    }
}
