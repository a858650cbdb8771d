//! In-process host model for Plant Assistant
//!
//! The plugin never owns its event loop, registries or storage; the host
//! does. This crate is a small, faithful model of the parts of that host the
//! plugin talks to:
//! - [`EventBus`] - typed pub/sub over tokio broadcast channels
//! - [`StateStore`] - published entity states, fires `state_changed`
//! - [`EntityRegistry`] - entity ids, unique ids and devices, fires
//!   `entity_registry_updated` on create/rename/remove
//! - [`ConfigEntries`] - persisted config entries with reload handlers
//!
//! Each type implements the matching collaborator trait from `pa_core::host`.

pub mod bus;
pub mod config_entries;
pub mod entity_registry;
pub mod states;
pub mod storage;

pub use bus::{EventBus, TypedEventReceiver};
pub use config_entries::{
    ConfigEntries, ConfigEntriesError, ConfigEntriesResult, ConfigEntry, ConfigEntryState,
    ReloadHandler,
};
pub use entity_registry::{EntityEntry, EntityRegistry, EntityRegistryError};
pub use states::StateStore;
pub use storage::{Storage, StorageError, StorageFile, StorageResult};
