//! Listening for registry renames

use std::sync::{Arc, Mutex};

use pa_core::events::{EntityRegistryUpdatedData, RegistryAction};
use pa_core::Event;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};

use crate::index::MirrorReferenceIndex;
use crate::migrator::{ConfigReferenceMigrator, MigrationReport};
use crate::resolver::ReferenceResolver;
use crate::updater::{ReferenceUpdater, UpdateOutcome};

/// An entity id change announced by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub old_entity_id: String,
    pub new_entity_id: String,
}

/// Pick renames out of registry events
///
/// A rename is an `update` carrying a non-empty old and new entity id that
/// differ. Creates, removals and other updates yield `None`.
pub fn classify(data: &EntityRegistryUpdatedData) -> Option<Rename> {
    if data.action != RegistryAction::Update {
        return None;
    }
    let old = data.old_entity_id.as_deref().filter(|s| !s.is_empty())?;
    let new = data.entity_id.as_str();
    if new.is_empty() || old == new {
        return None;
    }
    Some(Rename {
        old_entity_id: old.to_string(),
        new_entity_id: new.to_string(),
    })
}

/// Everything one rename led to
#[derive(Debug, Clone, Default)]
pub struct RenameReport {
    pub old_entity_id: String,
    pub new_entity_id: String,
    /// Unique id of the renamed entity, if the registry knows one
    pub stable_id: Option<String>,
    pub dependents: Vec<(String, UpdateOutcome)>,
    pub migrations: Vec<MigrationReport>,
}

impl RenameReport {
    pub fn updated(&self) -> impl Iterator<Item = &str> {
        self.dependents
            .iter()
            .filter(|(_, outcome)| outcome.is_updated())
            .map(|(id, _)| id.as_str())
    }
}

struct MonitorInner {
    resolver: ReferenceResolver,
    index: MirrorReferenceIndex,
    updater: ReferenceUpdater,
    migrator: ConfigReferenceMigrator,
    /// Rename handling tasks still in flight
    tasks: Mutex<JoinSet<RenameReport>>,
}

impl MonitorInner {
    fn dispatch(self: &Arc<Self>, event: &Event) {
        let Some(data) = event.parse::<EntityRegistryUpdatedData>() else {
            trace!(event_type = %event.event_type, "Ignoring malformed registry event");
            return;
        };
        debug!(
            action = ?data.action,
            entity_id = %data.entity_id,
            old_entity_id = ?data.old_entity_id,
            "Entity registry event"
        );

        let Some(rename) = classify(&data) else {
            return;
        };
        info!(
            old_entity_id = %rename.old_entity_id,
            new_entity_id = %rename.new_entity_id,
            "Entity renamed, checking for references to update"
        );

        let inner = Arc::clone(self);
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Reap whatever already finished so the set stays small
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            inner
                .handle_rename(&rename.old_entity_id, &rename.new_entity_id)
                .await
        });
    }

    async fn handle_rename(&self, old_entity_id: &str, new_entity_id: &str) -> RenameReport {
        // The registry has already applied the rename, so the identity is
        // found under the new name
        let stable_id = self.resolver.capture_id(new_entity_id);
        let dependents = self
            .index
            .find_dependents(old_entity_id, stable_id.as_deref());

        if dependents.is_empty() {
            debug!(old_entity_id, "No mirror entities found for renamed entity");
        } else {
            info!(
                count = dependents.len(),
                old_entity_id, new_entity_id, "Found mirror entities to update"
            );
        }

        let (dependents, migrations) = tokio::join!(
            self.updater
                .update_all(&dependents, old_entity_id, new_entity_id),
            self.migrator.migrate_all(old_entity_id, new_entity_id),
        );

        for (mirror, outcome) in &dependents {
            if outcome.is_updated() {
                info!(mirror = %mirror, new_entity_id, "Updated mirror source");
            }
        }

        RenameReport {
            old_entity_id: old_entity_id.to_string(),
            new_entity_id: new_entity_id.to_string(),
            stable_id,
            dependents,
            migrations,
        }
    }
}

/// Keeps mirrors and config entries pointing at renamed entities
///
/// Owned by the integration: constructed at setup, started once with the
/// registry event stream, shut down at unload.
pub struct EntityMonitor {
    inner: Arc<MonitorInner>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl EntityMonitor {
    pub fn new(
        resolver: ReferenceResolver,
        index: MirrorReferenceIndex,
        updater: ReferenceUpdater,
        migrator: ConfigReferenceMigrator,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                resolver,
                index,
                updater,
                migrator,
                tasks: Mutex::new(JoinSet::new()),
            }),
            subscription: Mutex::new(None),
        }
    }

    /// Start consuming registry events
    ///
    /// Returns false without subscribing when no registry is available.
    /// Starting an already running monitor keeps the existing subscription.
    pub fn start(&self, mut events: broadcast::Receiver<Event>) -> bool {
        if !self.inner.resolver.is_available() {
            debug!("Entity registry not available, skipping entity monitor setup");
            return false;
        }

        let mut subscription = match self.subscription.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if subscription.is_some() {
            debug!("Entity monitor already started");
            return true;
        }

        let inner = Arc::clone(&self.inner);
        *subscription = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => inner.dispatch(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Entity monitor fell behind; registry events were dropped");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Registry event stream closed");
                        break;
                    }
                }
            }
        }));

        debug!("Entity monitor setup complete");
        true
    }

    pub fn is_running(&self) -> bool {
        self.subscription
            .lock()
            .map(|s| s.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Handle a single event as the subscription would
    pub fn dispatch(&self, event: &Event) {
        self.inner.dispatch(event);
    }

    /// Handle a rename directly, bypassing the event stream
    pub async fn handle_rename(&self, old_entity_id: &str, new_entity_id: &str) -> RenameReport {
        self.inner.handle_rename(old_entity_id, new_entity_id).await
    }

    pub fn in_flight(&self) -> usize {
        self.inner.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Stop consuming events; safe to call more than once
    pub fn unsubscribe(&self) {
        let handle = match self.subscription.lock() {
            Ok(mut s) => s.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
            debug!("Entity monitor unsubscribed");
        }
    }

    /// Await every rename task started so far
    pub async fn drain(&self) -> Vec<RenameReport> {
        let mut reports = Vec::new();
        loop {
            let mut tasks = match self.inner.tasks.lock() {
                Ok(mut t) => std::mem::take(&mut *t),
                Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
            };
            if tasks.is_empty() {
                return reports;
            }
            while let Some(result) = tasks.join_next().await {
                match result {
                    Ok(report) => reports.push(report),
                    Err(e) => error!(error = %e, "Rename handling task failed"),
                }
            }
        }
    }

    /// Unsubscribe, then wait for outstanding rename handling
    pub async fn shutdown(&self) -> Vec<RenameReport> {
        self.unsubscribe();
        let reports = self.drain().await;
        debug!(completed = reports.len(), "Entity monitor unloaded");
        reports
    }
}

impl Drop for EntityMonitor {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
