//! Error types for the integration lifecycle

use std::path::PathBuf;

use pa_aggregation::RuleTableError;
use pa_core::HostError;
use pa_host::ConfigEntriesError;
use pa_sensors::SensorError;
use thiserror::Error;

pub type IntegrationResult<T> = Result<T, IntegrationError>;

#[derive(Debug, Error)]
pub enum IntegrationError {
    /// Failed to read the settings file
    #[error("failed to read settings file {path}: {source}")]
    SettingsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the settings file
    #[error("failed to parse settings in {path}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid setting '{key}': {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    /// A config entry document does not match the options model
    #[error("invalid config entry {entry_id}: {source}")]
    InvalidEntry {
        entry_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("location '{location}' has {count} plant slots, at most {max} are allowed")]
    TooManySlots {
        location: String,
        count: usize,
        max: usize,
    },

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    ConfigEntries(#[from] ConfigEntriesError),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    RuleTable(#[from] RuleTableError),
}
