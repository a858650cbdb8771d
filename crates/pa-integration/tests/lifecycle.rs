//! Setup, reload, unload and shutdown of the integration

mod common;

use common::*;
use pa_core::constants::{ATTR_CONTRIBUTING_SLOT_IDS, ATTR_SOURCE_PLANT_DEVICE_IDS, DOMAIN};
use pa_core::{ConfigDocument, STATE_UNAVAILABLE};
use pa_host::{ConfigEntry, ConfigEntryState};
use pa_integration::{HostServices, PlantAssistant, Settings};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

fn garden_options(slots: Value) -> Value {
    json!({
        "irrigation_zones": {
            "zone_1": {
                "name": "Front",
                "locations": {
                    "loc_1": {
                        "name": "Patio",
                        "monitoring_device_id": "dev-probe",
                        "plant_slots": slots
                    }
                }
            }
        }
    })
}

fn probe(host: &TestHost) {
    host.source_sensor(
        "sensor.probe_conductivity",
        "uid-ec",
        Some("dev-probe"),
        "900",
        json!({"device_class": "conductivity", "unit_of_measurement": "µS/cm"}),
    );
    host.source_sensor(
        "sensor.probe_moisture",
        "uid-moisture",
        Some("dev-probe"),
        "35",
        json!({"unit_of_measurement": "%"}),
    );
}

fn plants(host: &TestHost) {
    host.plant(
        "sensor.fern",
        "dev-fern",
        json!({"minimum_temperature": 10, "maximum_soil_ec": 1200, "minimum_soil_ec": 350}),
    );
    host.plant(
        "sensor.ivy",
        "dev-ivy",
        json!({"minimum_temperature": 15, "maximum_soil_ec": 1500, "minimum_soil_ec": "400"}),
    );
    host.plant("sensor.palm", "dev-palm", json!({"minimum_temperature": 12}));
}

#[tokio::test]
async fn test_setup_publishes_location_entities() {
    let host = TestHost::new();
    probe(&host);
    plants(&host);
    host.add_entry(
        "main",
        json!({"name": "Garden"}),
        garden_options(json!({
            "slot_1": {"plant_device_id": "dev-fern"},
            "slot_2": {"plant_device_id": "dev-ivy"},
            "slot_3": {"plant_device_id": "dev-palm"},
            "slot_4": {}
        })),
    )
    .await;

    let assistant = assert_ok!(PlantAssistant::setup(host.services.clone(), Settings::default()).await);
    assert!(assistant.is_loaded("main"));
    assert_eq!(host.entry_state("main"), ConfigEntryState::Loaded);
    assert!(assistant.monitor().is_running());

    // Mirrors from the monitoring device, detected by class and by name
    host.assert_state("sensor.patio_soil_conductivity_mirror", "900");
    host.assert_state("sensor.patio_soil_moisture_mirror", "35");
    assert_eq!(assistant.handles().len(), 3);

    let min_temperature = host.state("sensor.patio_min_temperature").unwrap();
    assert_eq!(min_temperature.numeric(), Some(15.0));
    assert_eq!(
        min_temperature.attribute::<Vec<String>>(ATTR_CONTRIBUTING_SLOT_IDS),
        Some(vec!["slot_1".to_string(), "slot_2".to_string(), "slot_3".to_string()])
    );
    assert_eq!(
        min_temperature.attribute::<Vec<String>>(ATTR_SOURCE_PLANT_DEVICE_IDS),
        Some(vec!["dev-fern".to_string(), "dev-ivy".to_string(), "dev-palm".to_string()])
    );
    assert_eq!(
        host.state("sensor.patio_max_soil_conductivity").unwrap().numeric(),
        Some(1200.0)
    );
    // Humidity rules need a linked humidity entity
    assert!(host.state("sensor.patio_max_humidity").is_none());

    // 900 sits inside [400, 1200]
    host.assert_state("sensor.patio_soil_conductivity_status", "normal");
    host.set_state("sensor.probe_conductivity", "1300", json!({"device_class": "conductivity"}));
    eventually("conductivity status to turn high", || {
        host.services
            .states
            .get_state("sensor.patio_soil_conductivity_status")
            .as_deref()
            == Some("high")
    })
    .await;

    // Plant changes flow into the aggregates
    host.plant("sensor.palm", "dev-palm", json!({"minimum_temperature": 18}));
    eventually("aggregate to follow plant bounds", || {
        host.state("sensor.patio_min_temperature")
            .and_then(|s| s.numeric())
            == Some(18.0)
    })
    .await;

    assistant.shutdown().await;
    assert!(!assistant.is_loaded("main"));
    assert!(assistant.handles().is_empty());
    assert!(!assistant.monitor().is_running());
}

#[tokio::test]
async fn test_location_without_links_publishes_nothing() {
    let host = TestHost::new();
    host.add_entry("sub_bed", json!({"name": "Bed", "plant_slots": {}}), json!({}))
        .await;
    let assistant = PlantAssistant::setup(host.services.clone(), Settings::default())
        .await
        .unwrap();

    // Every rule needs a monitoring device or a humidity entity
    assert!(assistant.is_loaded("sub_bed"));
    assert!(assistant.entity_ids("sub_bed").is_empty());
}

#[tokio::test]
async fn test_empty_location_is_unavailable_not_zero() {
    let host = TestHost::new();
    probe(&host);
    host.add_entry("main", json!({"name": "Garden"}), garden_options(json!({})))
        .await;
    let _assistant = PlantAssistant::setup(host.services.clone(), Settings::default())
        .await
        .unwrap();

    for entity_id in [
        "sensor.patio_min_temperature",
        "sensor.patio_max_soil_moisture",
        "sensor.patio_min_dli",
    ] {
        host.assert_state(entity_id, STATE_UNAVAILABLE);
    }
    host.assert_state("sensor.patio_soil_conductivity_status", STATE_UNAVAILABLE);
}

#[tokio::test]
async fn test_reload_rebuilds_from_updated_document() {
    let host = TestHost::new();
    probe(&host);
    plants(&host);
    host.add_entry(
        "main",
        json!({"name": "Garden"}),
        garden_options(json!({"slot_1": {"plant_device_id": "dev-fern"}})),
    )
    .await;
    let assistant = PlantAssistant::setup(host.services.clone(), Settings::default())
        .await
        .unwrap();
    assert_eq!(host.state("sensor.patio_min_temperature").unwrap().numeric(), Some(10.0));
    let entities = assistant.entity_ids("main");

    let mut document = host.entry("main").document();
    document.options = garden_options(json!({
        "slot_1": {"plant_device_id": "dev-fern"},
        "slot_2": {"plant_device_id": "dev-ivy"}
    }))
    .as_object()
    .cloned()
    .unwrap();
    host.services
        .config_entries
        .update_document("main", document)
        .await
        .unwrap();
    assert_ok!(host.services.config_entries.reload("main").await);

    assert_eq!(host.state("sensor.patio_min_temperature").unwrap().numeric(), Some(15.0));
    // Same unique ids, same entity ids
    assert_eq!(assistant.entity_ids("main"), entities);
    assert_eq!(host.reload_count("main"), 1);
}

#[tokio::test]
async fn test_renamed_own_entity_keeps_its_name() {
    let host = TestHost::new();
    probe(&host);
    host.add_entry("main", json!({"name": "Garden"}), garden_options(json!({})))
        .await;
    let assistant = PlantAssistant::setup(host.services.clone(), Settings::default())
        .await
        .unwrap();

    host.services
        .registry
        .rename("sensor.patio_min_temperature", "sensor.patio_coldest")
        .unwrap();
    assert_ok!(host.services.config_entries.reload("main").await);

    let ids = assistant.entity_ids("main");
    assert!(ids.contains(&"sensor.patio_coldest".to_string()));
    assert!(!ids.contains(&"sensor.patio_min_temperature".to_string()));
    host.assert_state("sensor.patio_coldest", STATE_UNAVAILABLE);
}

#[tokio::test]
async fn test_invalid_entry_is_marked_and_skipped() {
    let host = TestHost::new();
    let slots: serde_json::Map<String, Value> = (0..=pa_core::constants::MAX_PLANT_SLOTS)
        .map(|i| (format!("slot_{i}"), json!({})))
        .collect();
    host.add_entry(
        "crowded",
        json!({"name": "Crowded", "humidity_entity_id": "sensor.rh", "plant_slots": slots}),
        json!({}),
    )
    .await;
    host.add_entry(
        "fine",
        json!({"name": "Fine", "humidity_entity_id": "sensor.rh"}),
        json!({}),
    )
    .await;

    let assistant = PlantAssistant::setup(host.services.clone(), Settings::default())
        .await
        .unwrap();

    assert_eq!(host.entry_state("crowded"), ConfigEntryState::SetupError);
    assert!(!assistant.is_loaded("crowded"));
    assert_eq!(host.entry_state("fine"), ConfigEntryState::Loaded);

    // A reload reports the same failure through the host
    assert_err!(host.services.config_entries.reload("crowded").await);
    assert_eq!(host.entry_state("crowded"), ConfigEntryState::SetupError);
}

#[tokio::test]
async fn test_unload_entry_stops_its_entities() {
    let host = TestHost::new();
    host.source_sensor("sensor.probe_rh", "uid-rh", None, "50", json!({}));
    host.add_entry(
        "sub_patio",
        json!({"name": "Patio", "humidity_entity_id": "sensor.probe_rh"}),
        json!({}),
    )
    .await;
    let assistant = PlantAssistant::setup(host.services.clone(), Settings::default())
        .await
        .unwrap();

    assert!(assistant.unload_entry("sub_patio"));
    assert!(!assistant.unload_entry("sub_patio"));
    assert!(assistant.handles().is_empty());

    host.set_state("sensor.probe_rh", "70", json!({}));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    host.assert_state("sensor.patio_humidity_linked", "50");
}

#[tokio::test]
async fn test_entries_persist_across_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::default();

    {
        let host = HostServices::with_storage(&settings, dir.path()).await.unwrap();
        host.config_entries
            .add(
                ConfigEntry::new(
                    DOMAIN,
                    "Patio",
                    ConfigDocument::from_values(
                        json!({"name": "Patio", "humidity_entity_id": "sensor.probe_rh"}),
                        json!({}),
                    ),
                )
                .with_entry_id("sub_patio"),
            )
            .await
            .unwrap();
    }

    let host = HostServices::with_storage(&settings, dir.path()).await.unwrap();
    host.registry
        .get_or_create("ble_monitor", "sensor.probe_rh", Some("uid-rh"), None, None);
    let assistant = PlantAssistant::setup(host.clone(), settings).await.unwrap();

    assert!(assistant.is_loaded("sub_patio"));
    assert_eq!(
        assistant.entity_ids("sub_patio")[0],
        "sensor.patio_humidity_linked"
    );
    assistant.shutdown().await;
}

#[tokio::test]
async fn test_monitor_start_is_idempotent() {
    let host = TestHost::new();
    let assistant = PlantAssistant::setup(host.services.clone(), Settings::default())
        .await
        .unwrap();
    assert!(assistant.monitor().is_running());

    // A second subscription attempt keeps the first
    assert!(assistant
        .monitor()
        .start(host.services.bus.subscribe(pa_core::events::ENTITY_REGISTRY_UPDATED)));

    let reports = assistant.shutdown().await;
    assert!(reports.is_empty());
}
