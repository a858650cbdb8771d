//! Location-level aggregated sensors

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use pa_aggregation::{
    evaluate_rule, rule_applies, AggregateValue, AggregationRule, Conversion, LocationLinks,
    PlantSlot, RuleOutput,
};
use pa_core::constants::{
    ATTR_CONTRIBUTING_SLOT_IDS, ATTR_DEVICE_CLASS, ATTR_FRIENDLY_NAME, ATTR_ICON,
    ATTR_LAST_UPDATE, ATTR_SOURCE_PLANT_DEVICE_IDS, ATTR_UNIT_OF_MEASUREMENT,
};
use pa_core::{EntityId, STATE_UNAVAILABLE};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::SensorContext;
use crate::error::{SensorError, SensorResult};

/// A plant device assigned to a location slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAssignment {
    pub slot_id: String,
    pub plant_device_id: Option<String>,
}

impl SlotAssignment {
    pub fn new(slot_id: impl Into<String>, plant_device_id: Option<String>) -> Self {
        Self {
            slot_id: slot_id.into(),
            plant_device_id,
        }
    }
}

/// Plant-platform entities on the assigned devices
#[derive(Debug, Default)]
struct PlantEntities {
    by_device: HashMap<String, Vec<String>>,
    entity_ids: HashSet<String>,
}

struct AggregatedState {
    entity_id: RwLock<EntityId>,
    unique_id: String,
    name: String,
    rule: &'static AggregationRule,
    plant_platform: String,
    conversion: Conversion,
    slots: RwLock<Vec<SlotAssignment>>,
    links: RwLock<LocationLinks>,
    last_output: RwLock<Option<RuleOutput>>,
    /// Built on first use, dropped when slots change or a new plant entity shows up
    plants: RwLock<Option<PlantEntities>>,
    ctx: SensorContext,
}

impl AggregatedState {
    fn slots(&self) -> Vec<SlotAssignment> {
        self.slots.read().map(|s| s.clone()).unwrap_or_default()
    }

    fn links(&self) -> LocationLinks {
        self.links.read().map(|l| *l).unwrap_or_default()
    }

    fn assigned_devices(&self) -> HashSet<String> {
        self.slots()
            .into_iter()
            .filter_map(|slot| slot.plant_device_id)
            .collect()
    }

    /// Our entity id, following renames of our own registry entry
    fn entity_id(&self) -> EntityId {
        let known = match self.entity_id.read() {
            Ok(id) => id.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let Some(renamed) = self.ctx.renamed_to(&self.unique_id, &known) else {
            return known;
        };
        debug!(old = %known, new = %renamed, "Aggregated sensor renamed");
        match self.entity_id.write() {
            Ok(mut id) => *id = renamed.clone(),
            Err(poisoned) => *poisoned.into_inner() = renamed.clone(),
        }
        renamed
    }

    fn build_plants(&self) -> PlantEntities {
        let mut plants = PlantEntities::default();
        for device in self.assigned_devices() {
            let entity_ids: Vec<String> = self
                .ctx
                .resolver
                .device_entries(&device)
                .into_iter()
                .filter(|e| e.platform == self.plant_platform)
                .map(|e| e.entity_id)
                .collect();
            plants.entity_ids.extend(entity_ids.iter().cloned());
            plants.by_device.insert(device, entity_ids);
        }
        plants
    }

    fn with_plants<R>(&self, f: impl FnOnce(&PlantEntities) -> R) -> R {
        if let Ok(cached) = self.plants.read() {
            if let Some(plants) = cached.as_ref() {
                return f(plants);
            }
        }
        let plants = self.build_plants();
        let result = f(&plants);
        if let Ok(mut cached) = self.plants.write() {
            *cached = Some(plants);
        }
        result
    }

    fn invalidate_plants(&self) {
        if let Ok(mut cached) = self.plants.write() {
            *cached = None;
        }
    }

    /// Is `entity_id` a plant entity on one of our slots' devices?
    fn is_input(&self, entity_id: &str) -> bool {
        if self.with_plants(|p| p.entity_ids.contains(entity_id)) {
            return true;
        }
        // Not cached: a plant entity created or renamed since the last build
        let Some(entry) = self.ctx.resolver.entry(entity_id) else {
            return false;
        };
        let is_plant = entry.platform == self.plant_platform
            && entry
                .device_id
                .as_ref()
                .is_some_and(|d| self.assigned_devices().contains(d));
        if is_plant {
            self.invalidate_plants();
        }
        is_plant
    }

    /// Read the bounds every assigned plant currently declares
    fn plant_slots(&self) -> Vec<PlantSlot> {
        let assignments = self.slots();
        if assignments.is_empty() {
            return Vec::new();
        }
        let by_device = self.with_plants(|p| p.by_device.clone());

        assignments
            .into_iter()
            .map(|assignment| {
                let mut slot = PlantSlot::new(assignment.slot_id.clone());
                slot.plant_device_id = assignment.plant_device_id.clone();
                let Some(device) = &assignment.plant_device_id else {
                    return slot;
                };
                for entity_id in by_device.get(device).into_iter().flatten() {
                    if let Some(state) = self.ctx.state_of(entity_id) {
                        slot.merge(&PlantSlot::from_attributes(
                            assignment.slot_id.clone(),
                            Some(device.clone()),
                            &state.attributes,
                        ));
                    }
                }
                slot
            })
            .collect()
    }

    fn base_attributes(&self) -> HashMap<String, Value> {
        let mut attributes = HashMap::new();
        attributes.insert(ATTR_FRIENDLY_NAME.to_string(), json!(self.name));
        attributes.insert(ATTR_ICON.to_string(), json!(self.rule.icon));
        attributes.insert(ATTR_UNIT_OF_MEASUREMENT.to_string(), json!(self.rule.unit));
        if let Some(dc) = self.rule.device_class {
            attributes.insert(ATTR_DEVICE_CLASS.to_string(), json!(dc));
        }
        attributes
    }

    fn recompute(&self) -> Option<RuleOutput> {
        if !rule_applies(self.rule, self.links()) {
            let entity_id = self.entity_id();
            debug!(sensor = %entity_id, rule = self.rule.key, "Rule prerequisites not linked");
            self.set_last(None);
            self.ctx
                .publish(&entity_id, STATE_UNAVAILABLE, self.base_attributes());
            return None;
        }

        let output = evaluate_rule(self.rule, &self.plant_slots(), self.conversion);
        let mut attributes = self.base_attributes();
        attributes.insert(
            ATTR_SOURCE_PLANT_DEVICE_IDS.to_string(),
            json!(output.source_plant_device_ids),
        );
        attributes.insert(
            ATTR_CONTRIBUTING_SLOT_IDS.to_string(),
            json!(output.contributing_slot_ids),
        );
        attributes.insert(
            ATTR_LAST_UPDATE.to_string(),
            json!(output.last_update.to_rfc3339()),
        );

        let state = match output.value {
            AggregateValue::Available(value) => value.to_string(),
            AggregateValue::Unavailable => STATE_UNAVAILABLE.to_string(),
        };
        self.ctx.publish(&self.entity_id(), state, attributes);
        self.set_last(Some(output.clone()));
        Some(output)
    }

    fn set_last(&self, output: Option<RuleOutput>) {
        if let Ok(mut last) = self.last_output.write() {
            *last = output;
        }
    }
}

/// Publishes one aggregation rule's value for a location
///
/// Recomputes when a plant entity on an assigned device changes state, and
/// when slots or links are replaced.
pub struct AggregatedLocationSensor {
    state: Arc<AggregatedState>,
    tracker: Mutex<Option<JoinHandle<()>>>,
}

impl AggregatedLocationSensor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rule: &'static AggregationRule,
        entity_id: &str,
        unique_id: impl Into<String>,
        location_name: &str,
        plant_platform: impl Into<String>,
        conversion: Conversion,
        slots: Vec<SlotAssignment>,
        links: LocationLinks,
        ctx: SensorContext,
    ) -> SensorResult<Self> {
        let entity_id: EntityId = entity_id
            .parse()
            .map_err(|source| SensorError::InvalidEntityId {
                name: entity_id.to_string(),
                source,
            })?;
        Ok(Self {
            state: Arc::new(AggregatedState {
                entity_id: RwLock::new(entity_id),
                unique_id: unique_id.into(),
                name: format!("{} {}", location_name, rule.name),
                rule,
                plant_platform: plant_platform.into(),
                conversion,
                slots: RwLock::new(slots),
                links: RwLock::new(links),
                last_output: RwLock::new(None),
                plants: RwLock::new(None),
                ctx,
            }),
            tracker: Mutex::new(None),
        })
    }

    pub fn rule(&self) -> &'static AggregationRule {
        self.state.rule
    }

    /// Current entity id; follows registry renames of the sensor itself
    pub fn entity_id(&self) -> EntityId {
        self.state.entity_id()
    }

    pub fn unique_id(&self) -> &str {
        &self.state.unique_id
    }

    /// The most recent evaluation, if the rule applied
    pub fn output(&self) -> Option<RuleOutput> {
        self.state.last_output.read().ok().and_then(|o| o.clone())
    }

    /// Publish once and start following plant state changes
    pub fn start(&self) {
        let mut changes = self.state.ctx.state_changes();
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => {
                        if state.is_input(&event.data.entity_id.to_string()) {
                            state.recompute();
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(sensor = %state.entity_id(), skipped, "Missed state changes; recomputing");
                        state.recompute();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let previous = match self.tracker.lock() {
            Ok(mut t) => t.replace(handle),
            Err(poisoned) => poisoned.into_inner().replace(handle),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
        self.state.recompute();
    }

    pub fn stop(&self) {
        let handle = match self.tracker.lock() {
            Ok(mut t) => t.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Evaluate and publish now
    pub fn refresh(&self) -> Option<RuleOutput> {
        self.state.recompute()
    }

    pub fn set_slots(&self, slots: Vec<SlotAssignment>) -> Option<RuleOutput> {
        if let Ok(mut current) = self.state.slots.write() {
            *current = slots;
        }
        self.state.invalidate_plants();
        self.state.recompute()
    }

    pub fn set_links(&self, links: LocationLinks) -> Option<RuleOutput> {
        if let Ok(mut current) = self.state.links.write() {
            *current = links;
        }
        self.state.recompute()
    }
}

impl Drop for AggregatedLocationSensor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for AggregatedLocationSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatedLocationSensor")
            .field("entity_id", &self.state.entity_id())
            .field("rule", &self.state.rule.key)
            .finish()
    }
}
