//! Aggregation engine for Plant Assistant
//!
//! Plants sharing a location each declare tolerated minimum and maximum
//! values for light, temperature, humidity, soil moisture and soil
//! conductivity. The engine reduces those bounds to one value per rule:
//! the tightest floor (max of the minimums) and the lowest ceiling (min of
//! the maximums). Light bounds can also be expressed as Daily Light Integral.

pub mod dli;
pub mod engine;
pub mod numeric;
pub mod rules;

pub use engine::{
    evaluate_location, evaluate_rule, rule_applies, AggregateValue, Conversion, LocationLinks,
    PlantSlot, RuleOutput,
};
pub use rules::{validate_rules, AggregationRule, BoundAttribute, Reduction, RuleTableError, RULES};
