//! Plant Assistant integration
//!
//! Wires the rename monitor, the mirror and aggregated sensors and the typed
//! config model to a host:
//!
//! ```ignore
//! let settings = Settings::load(config_dir.join("plant_assistant.yaml"))?;
//! let host = HostServices::with_storage(&settings, &config_dir).await?;
//! let assistant = PlantAssistant::setup(host, settings).await?;
//! // ...
//! assistant.shutdown().await;
//! ```

mod assistant;
pub mod config;
mod error;
pub mod settings;

pub use assistant::{HostServices, PlantAssistant};
pub use config::{
    entry_locations, EntryLocation, IrrigationZoneConfig, LocationConfig, PlantAssistantOptions,
    PlantSlotConfig,
};
pub use error::{IntegrationError, IntegrationResult};
pub use settings::Settings;
