//! Runtime tunables loaded from YAML

use std::path::Path;

use pa_aggregation::dli::{DEFAULT_DLI_HOURS, LUX_TO_PPFD};
use pa_aggregation::Conversion;
use pa_core::constants::PLANT_PLATFORM;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IntegrationError, IntegrationResult};

/// Broadcast capacity of the host event bus
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Lux to PPFD conversion factor
    pub lux_to_ppfd: f64,
    /// Photoperiod used for DLI conversion, in hours
    pub dli_hours: f64,
    /// Platform whose sensors carry plant bounds
    pub plant_platform: String,
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lux_to_ppfd: LUX_TO_PPFD,
            dli_hours: DEFAULT_DLI_HOURS,
            plant_platform: PLANT_PLATFORM.to_string(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> IntegrationResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|source| IntegrationError::SettingsRead {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml(&content, path)
    }

    pub fn from_yaml(content: &str, path: &Path) -> IntegrationResult<Self> {
        // An empty document is a valid, all-default settings file
        let settings: Settings = if content.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(content).map_err(|source| IntegrationError::Settings {
                path: path.to_path_buf(),
                source,
            })?
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> IntegrationResult<()> {
        if !(self.lux_to_ppfd.is_finite() && self.lux_to_ppfd > 0.0) {
            return Err(IntegrationError::InvalidSetting {
                key: "lux_to_ppfd",
                reason: format!("must be a positive number, got {}", self.lux_to_ppfd),
            });
        }
        if !(self.dli_hours > 0.0 && self.dli_hours <= 24.0) {
            return Err(IntegrationError::InvalidSetting {
                key: "dli_hours",
                reason: format!("must be within (0, 24], got {}", self.dli_hours),
            });
        }
        if self.plant_platform.is_empty() {
            return Err(IntegrationError::InvalidSetting {
                key: "plant_platform",
                reason: "must not be empty".to_string(),
            });
        }
        if self.event_buffer == 0 {
            return Err(IntegrationError::InvalidSetting {
                key: "event_buffer",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn conversion(&self) -> Conversion {
        Conversion {
            lux_to_ppfd: self.lux_to_ppfd,
            dli_hours: self.dli_hours,
        }
    }
}
