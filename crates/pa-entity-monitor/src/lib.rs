//! Rename-resilient reference tracking
//!
//! Entities in the host are addressed by an entity id the user may change at
//! any time. This crate keeps everything Plant Assistant derived from such an
//! id pointing at the right entity after a rename:
//!
//! - [`ReferenceResolver`] maps unique ids to current entity ids and back
//! - [`MirrorReferenceIndex`] finds the mirror entities that depend on a name
//! - [`ReferenceUpdater`] repoints live mirror objects through [`SourceUpdatable`]
//! - [`ConfigReferenceMigrator`] rewrites persisted config entries and reloads them
//! - [`EntityMonitor`] listens for registry renames and drives the above

mod error;
mod index;
mod listener;
mod migrator;
mod resolver;
mod updater;

pub use error::{MonitorError, MonitorResult};
pub use index::MirrorReferenceIndex;
pub use listener::{classify, EntityMonitor, Rename, RenameReport};
pub use migrator::{references_device, rewrite_references, ConfigReferenceMigrator, MigrationReport};
pub use resolver::ReferenceResolver;
pub use updater::{MirrorHandles, ReferenceUpdater, SourceUpdatable, UpdateOutcome};
