//! Live sensor objects published by Plant Assistant
//!
//! - [`MirrorSensor`] republishes one source entity (optionally transformed)
//!   and follows it across renames through [`SourceUpdatable`]
//! - [`AggregatedLocationSensor`] publishes one aggregation rule's value for
//!   a location
//!
//! [`SourceUpdatable`]: pa_entity_monitor::SourceUpdatable

mod aggregated;
mod context;
mod error;
mod mirror;

pub use aggregated::{AggregatedLocationSensor, SlotAssignment};
pub use context::SensorContext;
pub use error::{SensorError, SensorResult};
pub use mirror::{ConductivityThresholds, MirrorKind, MirrorSensor, ATTR_CURRENT_VALUE, ATTR_MAXIMUM_THRESHOLD, ATTR_MINIMUM_THRESHOLD};
