//! Repointing live mirror objects

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use pa_core::EntityReference;
use tracing::{error, info, warn};

use crate::error::MonitorResult;
use crate::resolver::ReferenceResolver;

/// A live entity whose value is derived from one source entity
#[async_trait]
pub trait SourceUpdatable: Send + Sync {
    /// Entity id this object publishes under
    fn entity_id(&self) -> String;

    /// Registry unique id, which survives renames of the object itself
    fn unique_id(&self) -> Option<String> {
        None
    }

    /// The source it currently follows
    fn source(&self) -> EntityReference;

    /// Follow `new_entity_id` from now on and republish immediately
    async fn update_source(&self, new_entity_id: &str) -> MonitorResult<()>;
}

/// Live mirror objects grouped by the config entry that created them
///
/// Written by platform setup and unload, read by the updater.
#[derive(Default)]
pub struct MirrorHandles {
    by_entry: DashMap<String, Vec<Arc<dyn SourceUpdatable>>>,
}

impl MirrorHandles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry_id: &str, handle: Arc<dyn SourceUpdatable>) {
        self.by_entry
            .entry(entry_id.to_string())
            .or_default()
            .push(handle);
    }

    /// Drop every handle an entry registered
    pub fn remove_entry(&self, entry_id: &str) -> Vec<Arc<dyn SourceUpdatable>> {
        self.by_entry
            .remove(entry_id)
            .map(|(_, handles)| handles)
            .unwrap_or_default()
    }

    pub fn find(&self, entity_id: &str) -> Option<Arc<dyn SourceUpdatable>> {
        self.find_by(|h| h.entity_id() == entity_id)
    }

    pub fn find_by_unique_id(&self, unique_id: &str) -> Option<Arc<dyn SourceUpdatable>> {
        self.find_by(|h| h.unique_id().as_deref() == Some(unique_id))
    }

    fn find_by(
        &self,
        pred: impl Fn(&Arc<dyn SourceUpdatable>) -> bool,
    ) -> Option<Arc<dyn SourceUpdatable>> {
        self.by_entry
            .iter()
            .find_map(|handles| handles.iter().find(|h| pred(h)).cloned())
    }

    pub fn len(&self) -> usize {
        self.by_entry.iter().map(|h| h.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of repointing one dependent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// The index reported a mirror with no live object behind it
    NotFound,
    Failed(String),
}

impl UpdateOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, UpdateOutcome::Updated)
    }
}

pub struct ReferenceUpdater {
    handles: Arc<MirrorHandles>,
    resolver: ReferenceResolver,
}

impl ReferenceUpdater {
    pub fn new(handles: Arc<MirrorHandles>, resolver: ReferenceResolver) -> Self {
        Self { handles, resolver }
    }

    pub fn handles(&self) -> &Arc<MirrorHandles> {
        &self.handles
    }

    /// Live object behind a mirror the registry currently names `mirror_entity_id`
    ///
    /// Matched by unique id first, so a mirror the user renamed is still found.
    fn lookup(&self, mirror_entity_id: &str) -> Option<Arc<dyn SourceUpdatable>> {
        self.resolver
            .capture_id(mirror_entity_id)
            .and_then(|uid| self.handles.find_by_unique_id(&uid))
            .or_else(|| self.handles.find(mirror_entity_id))
    }

    /// Repoint one mirror from `old_entity_id` to `new_entity_id`
    ///
    /// Errors and panics raised by the mirror are reported as `Failed`.
    pub async fn update_dependent(
        &self,
        mirror_entity_id: &str,
        old_entity_id: &str,
        new_entity_id: &str,
    ) -> UpdateOutcome {
        let Some(mirror) = self.lookup(mirror_entity_id) else {
            warn!(mirror = mirror_entity_id, "Could not find mirror sensor object");
            return UpdateOutcome::NotFound;
        };

        info!(
            mirror = mirror_entity_id,
            old_entity_id, new_entity_id, "Updating mirror source"
        );

        match AssertUnwindSafe(mirror.update_source(new_entity_id))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => UpdateOutcome::Updated,
            Ok(Err(e)) => {
                error!(mirror = mirror_entity_id, old_entity_id, new_entity_id, error = %e, "Mirror update failed");
                UpdateOutcome::Failed(e.to_string())
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                error!(mirror = mirror_entity_id, old_entity_id, new_entity_id, %reason, "Mirror update panicked");
                UpdateOutcome::Failed(reason)
            }
        }
    }

    /// Repoint every dependent concurrently; one failure never stops the others
    pub async fn update_all(
        &self,
        dependents: &BTreeSet<String>,
        old_entity_id: &str,
        new_entity_id: &str,
    ) -> Vec<(String, UpdateOutcome)> {
        let updates = dependents.iter().map(|mirror| async move {
            let outcome = self
                .update_dependent(mirror, old_entity_id, new_entity_id)
                .await;
            (mirror.clone(), outcome)
        });
        join_all(updates).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use std::sync::Mutex;

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
    }

    struct FakeMirror {
        entity_id: String,
        unique_id: Option<String>,
        source: Mutex<String>,
        behaviour: Behaviour,
    }

    impl FakeMirror {
        fn new(entity_id: &str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                entity_id: entity_id.to_string(),
                unique_id: None,
                source: Mutex::new("sensor.old".to_string()),
                behaviour,
            })
        }

        fn with_unique_id(entity_id: &str, unique_id: &str) -> Arc<Self> {
            Arc::new(Self {
                entity_id: entity_id.to_string(),
                unique_id: Some(unique_id.to_string()),
                source: Mutex::new("sensor.old".to_string()),
                behaviour: Behaviour::Succeed,
            })
        }

        fn current(&self) -> String {
            self.source.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SourceUpdatable for FakeMirror {
        fn entity_id(&self) -> String {
            self.entity_id.clone()
        }

        fn unique_id(&self) -> Option<String> {
            self.unique_id.clone()
        }

        fn source(&self) -> EntityReference {
            EntityReference::by_name(self.current())
        }

        async fn update_source(&self, new_entity_id: &str) -> MonitorResult<()> {
            match self.behaviour {
                Behaviour::Succeed => {
                    *self.source.lock().unwrap() = new_entity_id.to_string();
                    Ok(())
                }
                Behaviour::Fail => Err(MonitorError::update(&self.entity_id, "source rejected")),
                Behaviour::Panic => panic!("mirror exploded"),
            }
        }
    }

    #[test]
    fn test_handles_register_find_remove() {
        let handles = MirrorHandles::new();
        handles.register("e1", FakeMirror::new("sensor.a", Behaviour::Succeed));
        handles.register("e2", FakeMirror::new("sensor.b", Behaviour::Succeed));

        assert_eq!(handles.len(), 2);
        assert!(handles.find("sensor.b").is_some());

        assert_eq!(handles.remove_entry("e2").len(), 1);
        assert!(handles.find("sensor.b").is_none());
        assert!(handles.remove_entry("e2").is_empty());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let updater =
            ReferenceUpdater::new(Arc::new(MirrorHandles::new()), ReferenceResolver::unavailable());
        let outcome = updater
            .update_dependent("sensor.ghost", "sensor.old", "sensor.new")
            .await;
        assert_eq!(outcome, UpdateOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_renamed_mirror_found_by_unique_id() {
        let registry = Arc::new(pa_host::EntityRegistry::new());
        registry.get_or_create(
            "plant_assistant",
            "sensor.patio_humidity",
            Some("pa_e1_patio_humidity_linked"),
            Some("e1"),
            None,
        );
        let handles = Arc::new(MirrorHandles::new());
        // The object still carries the id it was built with
        let mirror = FakeMirror::with_unique_id("sensor.patio_humidity", "pa_e1_patio_humidity_linked");
        handles.register("e1", mirror.clone());

        registry
            .rename("sensor.patio_humidity", "sensor.terrace_humidity")
            .unwrap();
        let updater = ReferenceUpdater::new(handles, ReferenceResolver::new(registry));
        let outcome = updater
            .update_dependent("sensor.terrace_humidity", "sensor.old", "sensor.new")
            .await;

        assert_eq!(outcome, UpdateOutcome::Updated);
        assert_eq!(mirror.current(), "sensor.new");
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let handles = Arc::new(MirrorHandles::new());
        let first = FakeMirror::new("sensor.first", Behaviour::Succeed);
        let broken = FakeMirror::new("sensor.broken", Behaviour::Fail);
        let third = FakeMirror::new("sensor.third", Behaviour::Succeed);
        handles.register("e1", first.clone());
        handles.register("e1", broken);
        handles.register("e1", third.clone());

        let updater = ReferenceUpdater::new(handles, ReferenceResolver::unavailable());
        let dependents: BTreeSet<String> = ["sensor.first", "sensor.broken", "sensor.third"]
            .into_iter()
            .map(String::from)
            .collect();

        let outcomes = updater.update_all(&dependents, "sensor.old", "sensor.new").await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes
            .iter()
            .any(|(id, o)| id == "sensor.broken" && matches!(o, UpdateOutcome::Failed(_))));
        assert_eq!(first.current(), "sensor.new");
        assert_eq!(third.current(), "sensor.new");
    }

    #[tokio::test]
    async fn test_panicking_mirror_is_contained() {
        let handles = Arc::new(MirrorHandles::new());
        handles.register("e1", FakeMirror::new("sensor.bad", Behaviour::Panic));
        let good = FakeMirror::new("sensor.good", Behaviour::Succeed);
        handles.register("e1", good.clone());

        let updater = ReferenceUpdater::new(handles, ReferenceResolver::unavailable());
        let dependents: BTreeSet<String> =
            ["sensor.bad", "sensor.good"].into_iter().map(String::from).collect();
        let outcomes = updater.update_all(&dependents, "sensor.old", "sensor.new").await;

        assert_eq!(
            outcomes[0],
            ("sensor.bad".to_string(), UpdateOutcome::Failed("mirror exploded".to_string()))
        );
        assert_eq!(good.current(), "sensor.new");
    }
}
