//! Plant Assistant lifecycle: setup, per-entry reload, unload

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::FutureExt;
use pa_aggregation::{rule_applies, validate_rules, RULES};
use pa_core::constants::{entity_unique_id, ATTR_DEVICE_CLASS, DOMAIN};
use pa_core::events::ENTITY_REGISTRY_UPDATED;
use pa_core::slugify;
use pa_entity_monitor::{
    ConfigReferenceMigrator, EntityMonitor, MirrorHandles, MirrorReferenceIndex, ReferenceResolver,
    ReferenceUpdater, RenameReport, SourceUpdatable,
};
use pa_host::{
    ConfigEntries, ConfigEntry, ConfigEntryState, EntityRegistry, EventBus, ReloadHandler,
    StateStore, Storage,
};
use pa_sensors::{
    AggregatedLocationSensor, ConductivityThresholds, MirrorKind, MirrorSensor, SensorContext,
};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{entry_locations, EntryLocation};
use crate::error::IntegrationResult;
use crate::settings::Settings;

/// The host collaborators Plant Assistant runs against
#[derive(Clone)]
pub struct HostServices {
    pub bus: Arc<EventBus>,
    pub states: Arc<StateStore>,
    pub registry: Arc<EntityRegistry>,
    pub config_entries: Arc<ConfigEntries>,
}

impl HostServices {
    /// A host that keeps config entries in memory only
    pub fn in_memory(settings: &Settings) -> Self {
        Self::build(settings, ConfigEntries::new())
    }

    /// A host persisting config entries under `<config_dir>/.storage`
    pub async fn with_storage(settings: &Settings, config_dir: impl AsRef<Path>) -> IntegrationResult<Self> {
        let storage = Arc::new(Storage::new(config_dir));
        let host = Self::build(settings, ConfigEntries::with_storage(storage));
        host.config_entries.load().await?;
        Ok(host)
    }

    fn build(settings: &Settings, config_entries: ConfigEntries) -> Self {
        let bus = Arc::new(EventBus::with_capacity(settings.event_buffer));
        Self {
            states: Arc::new(StateStore::new(bus.clone())),
            registry: Arc::new(EntityRegistry::with_event_bus(bus.clone())),
            config_entries: Arc::new(config_entries),
            bus,
        }
    }
}

/// The live entities of one config entry
#[derive(Default)]
struct LoadedEntry {
    mirrors: Vec<Arc<MirrorSensor>>,
    aggregated: Vec<AggregatedLocationSensor>,
}

impl LoadedEntry {
    fn start(&self) {
        // Aggregates first so status mirrors find their thresholds
        for sensor in &self.aggregated {
            sensor.start();
        }
        for mirror in &self.mirrors {
            mirror.start();
        }
    }

    fn stop(&self) {
        for sensor in &self.aggregated {
            sensor.stop();
        }
        for mirror in &self.mirrors {
            mirror.stop();
        }
    }

    fn entity_ids(&self) -> Vec<String> {
        self.mirrors
            .iter()
            .map(|m| m.entity_id().to_string())
            .chain(self.aggregated.iter().map(|a| a.entity_id().to_string()))
            .collect()
    }
}

/// One running Plant Assistant integration
///
/// Owns the entity monitor and every entity it publishes. Config entries of
/// the domain are set up on [`PlantAssistant::setup`] and rebuilt whenever
/// the host reloads them.
pub struct PlantAssistant {
    host: HostServices,
    settings: Settings,
    ctx: SensorContext,
    handles: Arc<MirrorHandles>,
    monitor: EntityMonitor,
    loaded: DashMap<String, LoadedEntry>,
}

impl PlantAssistant {
    /// Start the monitor, register the reload handler and set up every entry
    ///
    /// An entry that fails to set up is marked as such and skipped.
    pub async fn setup(host: HostServices, settings: Settings) -> IntegrationResult<Arc<Self>> {
        settings.validate()?;
        validate_rules(&RULES)?;

        let resolver = ReferenceResolver::new(host.registry.clone());
        let handles = Arc::new(MirrorHandles::new());
        let monitor = EntityMonitor::new(
            resolver.clone(),
            MirrorReferenceIndex::new(resolver.clone(), host.states.clone()),
            ReferenceUpdater::new(handles.clone(), resolver.clone()),
            ConfigReferenceMigrator::new(resolver.clone(), host.config_entries.clone(), DOMAIN),
        );
        monitor.start(host.bus.subscribe(ENTITY_REGISTRY_UPDATED));

        let assistant = Arc::new(Self {
            ctx: SensorContext::new(host.states.clone(), host.bus.clone(), resolver),
            host,
            settings,
            handles,
            monitor,
            loaded: DashMap::new(),
        });

        assistant
            .host
            .config_entries
            .register_reload_handler(DOMAIN, reload_handler(Arc::downgrade(&assistant)));

        for entry in assistant.host.config_entries.get_by_domain(DOMAIN) {
            let state = match assistant.setup_entry(&entry) {
                Ok(()) => ConfigEntryState::Loaded,
                Err(e) => {
                    error!(entry_id = %entry.entry_id, error = %e, "Failed to set up config entry");
                    ConfigEntryState::SetupError
                }
            };
            assistant.host.config_entries.set_state(&entry.entry_id, state);
        }

        info!(entries = assistant.loaded.len(), "Plant Assistant set up");
        Ok(assistant)
    }

    /// Build (or rebuild) the entities of one entry
    #[instrument(skip(self, entry), fields(entry_id = %entry.entry_id))]
    pub fn setup_entry(&self, entry: &ConfigEntry) -> IntegrationResult<()> {
        let locations = entry_locations(&entry.entry_id, &entry.document())?;

        let mut loaded = LoadedEntry::default();
        for location in &locations {
            self.build_location(&entry.entry_id, location, &mut loaded)?;
        }

        self.unload_entry(&entry.entry_id);
        for mirror in &loaded.mirrors {
            self.handles
                .register(&entry.entry_id, Arc::clone(mirror) as Arc<dyn SourceUpdatable>);
        }
        loaded.start();

        info!(
            locations = locations.len(),
            mirrors = loaded.mirrors.len(),
            aggregated = loaded.aggregated.len(),
            "Config entry set up"
        );
        self.loaded.insert(entry.entry_id.clone(), loaded);
        Ok(())
    }

    fn build_location(
        &self,
        entry_id: &str,
        location: &EntryLocation,
        loaded: &mut LoadedEntry,
    ) -> IntegrationResult<()> {
        let name = &location.config.name;
        let mut conductivity_source = None;

        if let Some(reference) = location.config.humidity_reference() {
            // Follow the stable id if the stored name went stale
            let source = self
                .ctx
                .resolver
                .resolve(&reference)
                .unwrap_or(reference.entity_id);
            loaded
                .mirrors
                .push(Arc::new(self.mirror(entry_id, name, MirrorKind::Humidity, &source)?));
        }

        if let Some(device_id) = &location.config.monitoring_device_id {
            for (kind, source) in self.device_sensors(device_id) {
                if kind == MirrorKind::SoilConductivity {
                    conductivity_source = Some(source.clone());
                }
                loaded
                    .mirrors
                    .push(Arc::new(self.mirror(entry_id, name, kind, &source)?));
            }
        }

        let links = location.config.links();
        for rule in RULES.iter().filter(|rule| rule_applies(rule, links)) {
            let (unique_id, entity_id) = self.register_entity(entry_id, name, rule.suffix);
            loaded.aggregated.push(AggregatedLocationSensor::new(
                rule,
                &entity_id,
                unique_id,
                name,
                self.settings.plant_platform.clone(),
                self.settings.conversion(),
                location.config.slot_assignments(),
                links,
                self.ctx.clone(),
            )?);
        }

        if let Some(source) = conductivity_source {
            let thresholds = ConductivityThresholds {
                min_unique_id: entity_unique_id(entry_id, name, "min_soil_conductivity"),
                max_unique_id: entity_unique_id(entry_id, name, "max_soil_conductivity"),
            };
            let status = self
                .mirror(entry_id, name, MirrorKind::ConductivityStatus, &source)?
                .with_thresholds(thresholds);
            loaded.mirrors.push(Arc::new(status));
        }

        debug!(entry_id, location = %name, "Built location entities");
        Ok(())
    }

    fn mirror(
        &self,
        entry_id: &str,
        location_name: &str,
        kind: MirrorKind,
        source: &str,
    ) -> IntegrationResult<MirrorSensor> {
        let (unique_id, entity_id) = self.register_entity(entry_id, location_name, kind.suffix());
        Ok(MirrorSensor::new(
            kind,
            &entity_id,
            unique_id,
            format!("{} {}", location_name, kind.name()),
            source,
            self.ctx.clone(),
        )?)
    }

    /// Register one of our entities and return its unique id and current entity id
    ///
    /// An entity registered earlier keeps whatever id it has now, including
    /// one the user chose.
    fn register_entity(&self, entry_id: &str, location_name: &str, suffix: &str) -> (String, String) {
        let unique_id = entity_unique_id(entry_id, location_name, suffix);
        let base = format!("sensor.{}_{}", slugify(location_name), suffix);
        let mut candidate = base.clone();
        let mut attempt = 1;
        loop {
            let entry = self.host.registry.get_or_create(
                DOMAIN,
                &candidate,
                Some(&unique_id),
                Some(entry_id),
                None,
            );
            if entry.unique_id.as_deref() == Some(unique_id.as_str()) {
                return (unique_id, entry.entity_id.clone());
            }
            attempt += 1;
            candidate = format!("{base}_{attempt}");
        }
    }

    /// Sensors of a monitoring device worth mirroring, one per kind
    fn device_sensors(&self, device_id: &str) -> Vec<(MirrorKind, String)> {
        let mut seen = HashSet::new();
        let sensors: Vec<_> = self
            .host
            .registry
            .get_by_device_id(device_id)
            .into_iter()
            .filter(|e| e.domain() == "sensor" && e.platform != DOMAIN)
            .filter_map(|e| {
                let device_class = self
                    .host
                    .states
                    .get(&e.entity_id)
                    .and_then(|s| s.attribute_str(ATTR_DEVICE_CLASS).map(str::to_string));
                let kind = MirrorKind::detect(&e.entity_id, device_class.as_deref())?;
                seen.insert(kind).then(|| (kind, e.entity_id.clone()))
            })
            .collect();

        if sensors.is_empty() {
            warn!(device_id, "Monitoring device has no recognised sensors");
        }
        sensors
    }

    /// Stop and forget an entry's entities; false if it was not loaded
    pub fn unload_entry(&self, entry_id: &str) -> bool {
        let Some((_, loaded)) = self.loaded.remove(entry_id) else {
            return false;
        };
        loaded.stop();
        self.handles.remove_entry(entry_id);
        debug!(entry_id, "Config entry unloaded");
        true
    }

    /// Stop listening for renames, finish outstanding ones, unload everything
    pub async fn shutdown(&self) -> Vec<RenameReport> {
        let reports = self.monitor.shutdown().await;
        let entry_ids: Vec<String> = self.loaded.iter().map(|e| e.key().clone()).collect();
        for entry_id in entry_ids {
            self.unload_entry(&entry_id);
        }
        info!("Plant Assistant shut down");
        reports
    }

    pub fn monitor(&self) -> &EntityMonitor {
        &self.monitor
    }

    pub fn handles(&self) -> &Arc<MirrorHandles> {
        &self.handles
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_loaded(&self, entry_id: &str) -> bool {
        self.loaded.contains_key(entry_id)
    }

    /// Entity ids an entry currently publishes, mirrors first
    pub fn entity_ids(&self, entry_id: &str) -> Vec<String> {
        self.loaded
            .get(entry_id)
            .map(|loaded| loaded.entity_ids())
            .unwrap_or_default()
    }
}

fn reload_handler(assistant: Weak<PlantAssistant>) -> ReloadHandler {
    Arc::new(move |entry: ConfigEntry| {
        let assistant = assistant.clone();
        async move {
            let assistant = assistant
                .upgrade()
                .ok_or_else(|| "Plant Assistant is not running".to_string())?;
            assistant.setup_entry(&entry).map_err(|e| e.to_string())
        }
        .boxed()
    })
}
