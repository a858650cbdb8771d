//! The aggregation rule table

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dli::{ICON_DLI, UNIT_DLI};

/// A bound a plant declares for one metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundAttribute {
    MinimumLight,
    MaximumLight,
    MinimumTemperature,
    MaximumTemperature,
    MinimumHumidity,
    MaximumHumidity,
    MinimumMoisture,
    MaximumMoisture,
    MinimumSoilEc,
    MaximumSoilEc,
}

impl BoundAttribute {
    pub const ALL: [BoundAttribute; 10] = [
        BoundAttribute::MinimumLight,
        BoundAttribute::MaximumLight,
        BoundAttribute::MinimumTemperature,
        BoundAttribute::MaximumTemperature,
        BoundAttribute::MinimumHumidity,
        BoundAttribute::MaximumHumidity,
        BoundAttribute::MinimumMoisture,
        BoundAttribute::MaximumMoisture,
        BoundAttribute::MinimumSoilEc,
        BoundAttribute::MaximumSoilEc,
    ];

    /// Name of the state attribute the plant database publishes
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundAttribute::MinimumLight => "minimum_light",
            BoundAttribute::MaximumLight => "maximum_light",
            BoundAttribute::MinimumTemperature => "minimum_temperature",
            BoundAttribute::MaximumTemperature => "maximum_temperature",
            BoundAttribute::MinimumHumidity => "minimum_humidity",
            BoundAttribute::MaximumHumidity => "maximum_humidity",
            BoundAttribute::MinimumMoisture => "minimum_moisture",
            BoundAttribute::MaximumMoisture => "maximum_moisture",
            BoundAttribute::MinimumSoilEc => "minimum_soil_ec",
            BoundAttribute::MaximumSoilEc => "maximum_soil_ec",
        }
    }

    pub fn is_light(&self) -> bool {
        matches!(self, BoundAttribute::MinimumLight | BoundAttribute::MaximumLight)
    }
}

impl fmt::Display for BoundAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Highest of the declared minimums
    MaxOfMins,
    /// Lowest of the declared maximums
    MinOfMaximums,
}

/// One location-level sensor derived from plant bounds
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationRule {
    pub key: &'static str,
    pub plant_attr_min: BoundAttribute,
    pub plant_attr_max: BoundAttribute,
    pub reduction: Reduction,
    /// Unique id suffix of the output sensor
    pub suffix: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub device_class: Option<&'static str>,
    pub unit: &'static str,
    pub requires_monitoring: bool,
    pub requires_humidity: bool,
    pub convert_illuminance_to_dli: bool,
}

impl AggregationRule {
    /// The bound this rule reduces
    pub fn source_attribute(&self) -> BoundAttribute {
        match self.reduction {
            Reduction::MaxOfMins => self.plant_attr_min,
            Reduction::MinOfMaximums => self.plant_attr_max,
        }
    }
}

const fn rule(
    key: &'static str,
    bounds: (BoundAttribute, BoundAttribute),
    reduction: Reduction,
    suffix: &'static str,
    name: &'static str,
    icon: &'static str,
    device_class: Option<&'static str>,
    unit: &'static str,
) -> AggregationRule {
    AggregationRule {
        key,
        plant_attr_min: bounds.0,
        plant_attr_max: bounds.1,
        reduction,
        suffix,
        name,
        icon,
        device_class,
        unit,
        requires_monitoring: true,
        requires_humidity: false,
        convert_illuminance_to_dli: false,
    }
}

const LIGHT: (BoundAttribute, BoundAttribute) = (BoundAttribute::MinimumLight, BoundAttribute::MaximumLight);
const TEMPERATURE: (BoundAttribute, BoundAttribute) =
    (BoundAttribute::MinimumTemperature, BoundAttribute::MaximumTemperature);
const HUMIDITY: (BoundAttribute, BoundAttribute) =
    (BoundAttribute::MinimumHumidity, BoundAttribute::MaximumHumidity);
const MOISTURE: (BoundAttribute, BoundAttribute) =
    (BoundAttribute::MinimumMoisture, BoundAttribute::MaximumMoisture);
const SOIL_EC: (BoundAttribute, BoundAttribute) = (BoundAttribute::MinimumSoilEc, BoundAttribute::MaximumSoilEc);

const fn humidity_rule(rule: AggregationRule) -> AggregationRule {
    AggregationRule {
        requires_monitoring: false,
        requires_humidity: true,
        ..rule
    }
}

const fn dli_rule(rule: AggregationRule) -> AggregationRule {
    AggregationRule {
        convert_illuminance_to_dli: true,
        ..rule
    }
}

use Reduction::{MaxOfMins, MinOfMaximums};

/// Every location-level aggregated sensor
#[rustfmt::skip]
pub static RULES: [AggregationRule; 14] = [
    rule("min_light", LIGHT, MaxOfMins, "min_light_intensity", "Minimum Light Intensity", "mdi:brightness-7", Some("illuminance"), "lx"),
    rule("max_light", LIGHT, MinOfMaximums, "max_light_intensity", "Maximum Light Intensity", "mdi:brightness-5", Some("illuminance"), "lx"),
    rule("min_temperature", TEMPERATURE, MaxOfMins, "min_temperature", "Minimum Temperature", "mdi:thermometer-low", Some("temperature"), "°C"),
    rule("max_temperature", TEMPERATURE, MinOfMaximums, "max_temperature", "Maximum Temperature", "mdi:thermometer-high", Some("temperature"), "°C"),
    rule("min_illuminance", LIGHT, MaxOfMins, "min_illuminance", "Minimum Illuminance", "mdi:brightness-7", Some("illuminance"), "lx"),
    rule("max_illuminance", LIGHT, MinOfMaximums, "max_illuminance", "Maximum Illuminance", "mdi:brightness-5", Some("illuminance"), "lx"),
    rule("min_soil_moisture", MOISTURE, MaxOfMins, "min_soil_moisture", "Minimum Soil Moisture", "mdi:water-percent", Some("moisture"), "%"),
    rule("max_soil_moisture", MOISTURE, MinOfMaximums, "max_soil_moisture", "Maximum Soil Moisture", "mdi:water-percent", Some("moisture"), "%"),
    rule("min_soil_conductivity", SOIL_EC, MaxOfMins, "min_soil_conductivity", "Minimum Soil Conductivity", "mdi:flash-triangle", Some("conductivity"), "µS/cm"),
    rule("max_soil_conductivity", SOIL_EC, MinOfMaximums, "max_soil_conductivity", "Maximum Soil Conductivity", "mdi:flash-triangle-outline", Some("conductivity"), "µS/cm"),
    humidity_rule(rule("min_humidity", HUMIDITY, MaxOfMins, "min_humidity", "Minimum Humidity", "mdi:water-minus", Some("humidity"), "%")),
    humidity_rule(rule("max_humidity", HUMIDITY, MinOfMaximums, "max_humidity", "Maximum Humidity", "mdi:water-plus", Some("humidity"), "%")),
    dli_rule(rule("min_dli", LIGHT, MaxOfMins, "min_dli", "Minimum Daily Light Integral", ICON_DLI, None, UNIT_DLI)),
    dli_rule(rule("max_dli", LIGHT, MinOfMaximums, "max_dli", "Maximum Daily Light Integral", ICON_DLI, None, UNIT_DLI)),
];

/// Look a rule up by key
pub fn find_rule(key: &str) -> Option<&'static AggregationRule> {
    RULES.iter().find(|r| r.key == key)
}

/// Authoring mistakes in a rule table
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleTableError {
    #[error("duplicate rule suffix `{suffix}` (rules `{first}` and `{second}`)")]
    DuplicateSuffix {
        suffix: String,
        first: String,
        second: String,
    },

    #[error("rule `{0}` has an empty suffix")]
    EmptySuffix(String),

    #[error("rule `{key}` converts {attribute} to DLI but it is not a light bound")]
    DliOnNonLight { key: String, attribute: BoundAttribute },
}

/// Check a rule table for authoring mistakes
pub fn validate_rules(rules: &[AggregationRule]) -> Result<(), RuleTableError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for (i, rule) in rules.iter().enumerate() {
        if rule.suffix.trim().is_empty() {
            return Err(RuleTableError::EmptySuffix(rule.key.to_string()));
        }
        if !seen.insert(rule.suffix) {
            let first = rules[..i]
                .iter()
                .find(|r| r.suffix == rule.suffix)
                .map(|r| r.key)
                .unwrap_or_default();
            return Err(RuleTableError::DuplicateSuffix {
                suffix: rule.suffix.to_string(),
                first: first.to_string(),
                second: rule.key.to_string(),
            });
        }
        if rule.convert_illuminance_to_dli && !rule.source_attribute().is_light() {
            return Err(RuleTableError::DliOnNonLight {
                key: rule.key.to_string(),
                attribute: rule.source_attribute(),
            });
        }
    }
    Ok(())
}
