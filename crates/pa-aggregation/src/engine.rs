//! Evaluating the rule table for one location

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::dli::{lux_to_dli, DEFAULT_DLI_HOURS, LUX_TO_PPFD};
use crate::numeric::{coerce, coerce_lenient};
use crate::rules::{AggregationRule, BoundAttribute, Reduction};

/// Bounds declared by the plant assigned to one slot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlantSlot {
    pub slot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plant_device_id: Option<String>,
    #[serde(default)]
    pub bounds: BTreeMap<BoundAttribute, f64>,
}

impl PlantSlot {
    pub fn new(slot_id: impl Into<String>) -> Self {
        Self {
            slot_id: slot_id.into(),
            ..Default::default()
        }
    }

    pub fn with_device(mut self, plant_device_id: impl Into<String>) -> Self {
        self.plant_device_id = Some(plant_device_id.into());
        self
    }

    pub fn with_bound(mut self, attribute: BoundAttribute, value: f64) -> Self {
        if value.is_finite() {
            self.bounds.insert(attribute, value);
        }
        self
    }

    /// Read bounds from a plant sensor's state attributes
    ///
    /// Light bounds accept strings with units; values that do not coerce to
    /// a finite number are left out.
    pub fn from_attributes(
        slot_id: impl Into<String>,
        plant_device_id: Option<String>,
        attributes: &HashMap<String, Value>,
    ) -> Self {
        let bounds = BoundAttribute::ALL
            .iter()
            .filter_map(|attr| {
                let raw = attributes.get(attr.as_str())?;
                let value = if attr.is_light() {
                    coerce_lenient(raw)
                } else {
                    coerce(raw)
                };
                value.map(|v| (*attr, v))
            })
            .collect();
        Self {
            slot_id: slot_id.into(),
            plant_device_id,
            bounds,
        }
    }

    pub fn bound(&self, attribute: BoundAttribute) -> Option<f64> {
        self.bounds.get(&attribute).copied()
    }

    /// Merge another reading of the same plant, keeping existing values
    pub fn merge(&mut self, other: &PlantSlot) {
        for (attr, value) in &other.bounds {
            self.bounds.entry(*attr).or_insert(*value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

/// Links a location has that rules may require
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocationLinks {
    pub monitoring_device: bool,
    pub humidity_entity: bool,
}

/// Illuminance to DLI conversion parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub lux_to_ppfd: f64,
    pub dli_hours: f64,
}

impl Default for Conversion {
    fn default() -> Self {
        Self {
            lux_to_ppfd: LUX_TO_PPFD,
            dli_hours: DEFAULT_DLI_HOURS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateValue {
    Available(f64),
    /// No slot declares the bound this rule reduces
    Unavailable,
}

impl AggregateValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            AggregateValue::Available(v) => Some(*v),
            AggregateValue::Unavailable => None,
        }
    }
}

/// The output of one rule for one location
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutput {
    pub rule: &'static AggregationRule,
    pub value: AggregateValue,
    pub contributing_slot_ids: Vec<String>,
    pub source_plant_device_ids: Vec<String>,
    pub last_update: DateTime<Utc>,
}

/// Are the location's links enough for this rule to be meaningful?
pub fn rule_applies(rule: &AggregationRule, links: LocationLinks) -> bool {
    (!rule.requires_monitoring || links.monitoring_device)
        && (!rule.requires_humidity || links.humidity_entity)
}

/// The value a slot contributes to a rule, after any conversion
fn slot_value(rule: &AggregationRule, slot: &PlantSlot, conversion: Conversion) -> Option<f64> {
    let raw = slot.bound(rule.source_attribute())?;
    if !rule.convert_illuminance_to_dli {
        return Some(raw);
    }
    // A negative light bound is meaningless as a dose
    if raw < 0.0 {
        return None;
    }
    lux_to_dli(raw, conversion.lux_to_ppfd, conversion.dli_hours)
}

/// Reduce the slots' bounds for one rule
///
/// Conversion happens per slot, before the reduction.
pub fn evaluate_rule(
    rule: &'static AggregationRule,
    slots: &[PlantSlot],
    conversion: Conversion,
) -> RuleOutput {
    let mut contributing_slot_ids = Vec::new();
    let mut source_plant_device_ids = Vec::new();
    let mut reduced: Option<f64> = None;

    for slot in slots {
        let Some(value) = slot_value(rule, slot, conversion) else {
            continue;
        };
        trace!(rule = rule.key, slot = %slot.slot_id, value, "Slot contributes");
        contributing_slot_ids.push(slot.slot_id.clone());
        if let Some(device) = &slot.plant_device_id {
            if !source_plant_device_ids.contains(device) {
                source_plant_device_ids.push(device.clone());
            }
        }
        reduced = Some(match (reduced, rule.reduction) {
            (None, _) => value,
            (Some(acc), Reduction::MaxOfMins) => acc.max(value),
            (Some(acc), Reduction::MinOfMaximums) => acc.min(value),
        });
    }

    RuleOutput {
        rule,
        value: reduced.map_or(AggregateValue::Unavailable, AggregateValue::Available),
        contributing_slot_ids,
        source_plant_device_ids,
        last_update: Utc::now(),
    }
}

/// Evaluate every applicable rule for a location
///
/// Rules whose prerequisites are not linked produce no output at all; rules
/// with no declaring slot produce [`AggregateValue::Unavailable`].
pub fn evaluate_location(
    slots: &[PlantSlot],
    links: LocationLinks,
    rules: &'static [AggregationRule],
    conversion: Conversion,
) -> Vec<RuleOutput> {
    let outputs: Vec<RuleOutput> = rules
        .iter()
        .filter(|rule| rule_applies(rule, links))
        .map(|rule| evaluate_rule(rule, slots, conversion))
        .collect();
    debug!(
        slots = slots.len(),
        rules = outputs.len(),
        available = outputs.iter().filter(|o| o.value.value().is_some()).count(),
        "Evaluated location aggregates"
    );
    outputs
}
