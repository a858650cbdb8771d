//! Sensors that republish another entity

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use pa_core::constants::{
    ATTR_DEVICE_CLASS, ATTR_FRIENDLY_NAME, ATTR_ICON, ATTR_SOURCE_ENTITY, ATTR_SOURCE_UNIQUE_ID,
    ATTR_UNIT_OF_MEASUREMENT, SUFFIX_HUMIDITY_LINKED, SUFFIX_ILLUMINANCE_MIRROR,
    SUFFIX_SOIL_CONDUCTIVITY_MIRROR, SUFFIX_SOIL_CONDUCTIVITY_STATUS, SUFFIX_SOIL_MOISTURE_MIRROR,
    SUFFIX_TEMPERATURE_MIRROR,
};
use pa_core::{EntityId, EntityReference, STATE_UNAVAILABLE};
use pa_entity_monitor::{MonitorError, MonitorResult, SourceUpdatable};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::context::SensorContext;
use crate::error::{SensorError, SensorResult};

pub const ATTR_CURRENT_VALUE: &str = "current_value";
pub const ATTR_MINIMUM_THRESHOLD: &str = "minimum_threshold";
pub const ATTR_MAXIMUM_THRESHOLD: &str = "maximum_threshold";

/// What a mirror republishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorKind {
    Humidity,
    Temperature,
    Illuminance,
    SoilMoisture,
    SoilConductivity,
    /// Soil conductivity classified against the location's aggregated bounds
    ConductivityStatus,
}

impl MirrorKind {
    /// Kinds mirrored from a monitoring device, in detection order
    pub const DEVICE_KINDS: [MirrorKind; 4] = [
        MirrorKind::Temperature,
        MirrorKind::Illuminance,
        MirrorKind::SoilMoisture,
        MirrorKind::SoilConductivity,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            MirrorKind::Humidity => SUFFIX_HUMIDITY_LINKED,
            MirrorKind::Temperature => SUFFIX_TEMPERATURE_MIRROR,
            MirrorKind::Illuminance => SUFFIX_ILLUMINANCE_MIRROR,
            MirrorKind::SoilMoisture => SUFFIX_SOIL_MOISTURE_MIRROR,
            MirrorKind::SoilConductivity => SUFFIX_SOIL_CONDUCTIVITY_MIRROR,
            MirrorKind::ConductivityStatus => SUFFIX_SOIL_CONDUCTIVITY_STATUS,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MirrorKind::Humidity => "Humidity",
            MirrorKind::Temperature => "Temperature",
            MirrorKind::Illuminance => "Illuminance",
            MirrorKind::SoilMoisture => "Soil Moisture",
            MirrorKind::SoilConductivity => "Soil Conductivity",
            MirrorKind::ConductivityStatus => "Soil Conductivity Status",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            MirrorKind::Humidity | MirrorKind::SoilMoisture => "mdi:water-percent",
            MirrorKind::Temperature => "mdi:thermometer",
            MirrorKind::Illuminance => "mdi:brightness-6",
            MirrorKind::SoilConductivity => "mdi:flash",
            MirrorKind::ConductivityStatus => "mdi:flash-alert",
        }
    }

    pub fn device_class(&self) -> Option<&'static str> {
        match self {
            MirrorKind::Humidity => Some("humidity"),
            MirrorKind::Temperature => Some("temperature"),
            MirrorKind::Illuminance => Some("illuminance"),
            MirrorKind::SoilMoisture => Some("moisture"),
            MirrorKind::SoilConductivity => Some("conductivity"),
            MirrorKind::ConductivityStatus => None,
        }
    }

    /// A fixed unit; the others take the source's unit
    pub fn unit(&self) -> Option<&'static str> {
        match self {
            MirrorKind::Humidity => Some("%"),
            _ => None,
        }
    }

    /// Classify a monitoring device sensor by device class, falling back to
    /// its entity id
    pub fn detect(entity_id: &str, device_class: Option<&str>) -> Option<MirrorKind> {
        if let Some(kind) = device_class.and_then(|dc| {
            Self::DEVICE_KINDS
                .into_iter()
                .find(|k| k.device_class() == Some(dc))
        }) {
            return Some(kind);
        }

        let lower = entity_id.to_ascii_lowercase();
        [
            ("temperature", MirrorKind::Temperature),
            ("illuminance", MirrorKind::Illuminance),
            ("light", MirrorKind::Illuminance),
            ("moisture", MirrorKind::SoilMoisture),
            ("conductivity", MirrorKind::SoilConductivity),
        ]
        .into_iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, kind)| kind)
    }
}

/// Unique ids of the aggregated sensors a conductivity status compares against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConductivityThresholds {
    pub min_unique_id: String,
    pub max_unique_id: String,
}

struct MirrorState {
    entity_id: RwLock<EntityId>,
    unique_id: String,
    name: String,
    kind: MirrorKind,
    source: RwLock<EntityReference>,
    thresholds: Option<ConductivityThresholds>,
    ctx: SensorContext,
}

impl MirrorState {
    fn source(&self) -> EntityReference {
        match self.source.read() {
            Ok(source) => source.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
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
        info!(old = %known, new = %renamed, "Mirror entity renamed");
        match self.entity_id.write() {
            Ok(mut id) => *id = renamed.clone(),
            Err(poisoned) => *poisoned.into_inner() = renamed.clone(),
        }
        renamed
    }

    fn set_source(&self, reference: EntityReference) {
        match self.source.write() {
            Ok(mut source) => *source = reference,
            Err(poisoned) => *poisoned.into_inner() = reference,
        }
    }

    fn threshold(&self, unique_id: &str) -> Option<f64> {
        let name = self.ctx.resolver.resolve_name(unique_id)?;
        self.ctx.state_of(&name)?.numeric()
    }

    /// Does a change to `entity_id` affect what we publish?
    fn is_input(&self, watched_source: &str, entity_id: &str) -> bool {
        if entity_id == watched_source {
            return true;
        }
        match &self.thresholds {
            Some(t) => self
                .ctx
                .resolver
                .capture_id(entity_id)
                .is_some_and(|uid| uid == t.min_unique_id || uid == t.max_unique_id),
            None => false,
        }
    }

    fn base_attributes(&self, source: &EntityReference) -> HashMap<String, Value> {
        let mut attributes = HashMap::new();
        attributes.insert(ATTR_SOURCE_ENTITY.to_string(), json!(source.entity_id));
        if let Some(uid) = &source.unique_id {
            attributes.insert(ATTR_SOURCE_UNIQUE_ID.to_string(), json!(uid));
        }
        attributes.insert(ATTR_FRIENDLY_NAME.to_string(), json!(self.name));
        attributes.insert(ATTR_ICON.to_string(), json!(self.kind.icon()));
        if let Some(dc) = self.kind.device_class() {
            attributes.insert(ATTR_DEVICE_CLASS.to_string(), json!(dc));
        }
        attributes
    }

    fn publish(&self) {
        let source = self.source();
        let (state, attributes) = match self.kind {
            MirrorKind::ConductivityStatus => self.conductivity_status(&source),
            _ => self.mirrored(&source),
        };
        self.ctx.publish(&self.entity_id(), state, attributes);
    }

    fn mirrored(&self, source: &EntityReference) -> (String, HashMap<String, Value>) {
        let Some(source_state) = self.ctx.state_of(&source.entity_id) else {
            return (STATE_UNAVAILABLE.to_string(), self.base_attributes(source));
        };

        let mut attributes = source_state.attributes.clone();
        attributes.extend(self.base_attributes(source));
        if let Some(unit) = self.kind.unit() {
            attributes.insert(ATTR_UNIT_OF_MEASUREMENT.to_string(), json!(unit));
        }
        (source_state.state, attributes)
    }

    fn conductivity_status(&self, source: &EntityReference) -> (String, HashMap<String, Value>) {
        let mut attributes = self.base_attributes(source);
        let current = self
            .ctx
            .state_of(&source.entity_id)
            .and_then(|s| s.numeric());
        let (min, max) = match &self.thresholds {
            Some(t) => (self.threshold(&t.min_unique_id), self.threshold(&t.max_unique_id)),
            None => (None, None),
        };
        attributes.insert(ATTR_CURRENT_VALUE.to_string(), json!(current));
        attributes.insert(ATTR_MINIMUM_THRESHOLD.to_string(), json!(min));
        attributes.insert(ATTR_MAXIMUM_THRESHOLD.to_string(), json!(max));

        let status = match (current, min, max) {
            (Some(value), Some(min), Some(max)) => {
                if value < min {
                    "low"
                } else if value > max {
                    "high"
                } else {
                    "normal"
                }
            }
            _ => STATE_UNAVAILABLE,
        };
        (status.to_string(), attributes)
    }
}

/// A sensor republishing one source entity under Plant Assistant's namespace
///
/// The source is followed by entity id; when the monitor reports a rename
/// the mirror drops its subscription, follows the new id and republishes.
pub struct MirrorSensor {
    state: Arc<MirrorState>,
    tracker: Mutex<Option<JoinHandle<()>>>,
}

impl MirrorSensor {
    /// Build a mirror and capture the source's unique id
    ///
    /// Nothing is published or tracked until [`MirrorSensor::start`].
    pub fn new(
        kind: MirrorKind,
        entity_id: &str,
        unique_id: impl Into<String>,
        name: impl Into<String>,
        source_entity_id: &str,
        ctx: SensorContext,
    ) -> SensorResult<Self> {
        let entity_id: EntityId = entity_id
            .parse()
            .map_err(|source| SensorError::InvalidEntityId {
                name: entity_id.to_string(),
                source,
            })?;
        if source_entity_id.is_empty() {
            return Err(SensorError::EmptySource);
        }
        let source = ctx.resolver.capture(source_entity_id);

        Ok(Self {
            state: Arc::new(MirrorState {
                entity_id: RwLock::new(entity_id),
                unique_id: unique_id.into(),
                name: name.into(),
                kind,
                source: RwLock::new(source),
                thresholds: None,
                ctx,
            }),
            tracker: Mutex::new(None),
        })
    }

    /// Compare against aggregated bounds; only meaningful for
    /// [`MirrorKind::ConductivityStatus`]
    pub fn with_thresholds(mut self, thresholds: ConductivityThresholds) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.thresholds = Some(thresholds);
        }
        self
    }

    pub fn kind(&self) -> MirrorKind {
        self.state.kind
    }

    pub fn unique_id(&self) -> &str {
        &self.state.unique_id
    }

    /// Current entity id; follows registry renames of the mirror itself
    pub fn current_entity_id(&self) -> EntityId {
        self.state.entity_id()
    }

    /// Publish the current value and start following the source
    pub fn start(&self) {
        self.retrack();
        self.state.publish();
    }

    /// Stop following the source
    pub fn stop(&self) {
        let handle = match self.tracker.lock() {
            Ok(mut t) => t.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracker
            .lock()
            .map(|t| t.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Replace the state-change subscription with one for the current source
    fn retrack(&self) {
        let watched = self.state.source().entity_id;
        // Subscribe before the old task goes away so no change is missed
        let mut changes = self.state.ctx.state_changes();
        let state = Arc::clone(&self.state);

        let handle = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => {
                        let changed = event.data.entity_id.to_string();
                        if state.is_input(&watched, &changed) {
                            state.publish();
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(mirror = %state.entity_id(), skipped, "Missed state changes; republishing");
                        state.publish();
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
    }
}

impl Drop for MirrorSensor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl SourceUpdatable for MirrorSensor {
    fn entity_id(&self) -> String {
        self.state.entity_id().to_string()
    }

    fn unique_id(&self) -> Option<String> {
        Some(self.state.unique_id.clone())
    }

    fn source(&self) -> EntityReference {
        self.state.source()
    }

    async fn update_source(&self, new_entity_id: &str) -> MonitorResult<()> {
        if new_entity_id.is_empty() {
            return Err(MonitorError::update(self.entity_id(), "empty source entity id"));
        }

        let mut reference = self.state.source();
        let previous = reference.entity_id.clone();
        reference.repoint(new_entity_id, self.state.ctx.resolver.capture_id(new_entity_id));
        self.state.set_source(reference);

        self.retrack();
        self.state.publish();

        info!(
            mirror = %self.state.entity_id(),
            old_source = %previous,
            new_source = new_entity_id,
            "Updated mirror source entity"
        );
        Ok(())
    }
}

impl std::fmt::Debug for MirrorSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorSensor")
            .field("entity_id", &self.state.entity_id())
            .field("kind", &self.state.kind)
            .field("source", &self.state.source())
            .finish()
    }
}
