//! Lookups between entity ids and unique ids

use std::sync::Arc;

use pa_core::{EntityLookup, EntityReference, RegistryEntry};

/// Read-only resolution of references against the host registry
///
/// A resolver without a registry (early boot, bare test harnesses) answers
/// every lookup with `None`; callers treat that as a normal condition.
#[derive(Clone)]
pub struct ReferenceResolver {
    registry: Option<Arc<dyn EntityLookup>>,
}

impl ReferenceResolver {
    pub fn new(registry: Arc<dyn EntityLookup>) -> Self {
        Self {
            registry: Some(registry),
        }
    }

    /// A resolver with no registry behind it
    pub fn unavailable() -> Self {
        Self { registry: None }
    }

    pub fn is_available(&self) -> bool {
        self.registry.is_some()
    }

    /// Current entity id of the entity carrying `stable_id`
    pub fn resolve_name(&self, stable_id: &str) -> Option<String> {
        self.registry
            .as_ref()?
            .find_by_unique_id(stable_id)
            .map(|e| e.entity_id)
    }

    /// Registry entry currently named `entity_id`
    pub fn entry(&self, entity_id: &str) -> Option<RegistryEntry> {
        self.registry.as_ref()?.get_by_name(entity_id)
    }

    /// Unique id of the entity currently named `entity_id`
    pub fn capture_id(&self, entity_id: &str) -> Option<String> {
        self.registry
            .as_ref()?
            .get_by_name(entity_id)
            .and_then(|e| e.unique_id)
    }

    /// Build a reference to `entity_id`, capturing its unique id if known
    pub fn capture(&self, entity_id: &str) -> EntityReference {
        EntityReference::new(entity_id, self.capture_id(entity_id))
    }

    /// Current entity id a reference points at
    ///
    /// The unique id wins when it resolves; otherwise the stored name is used
    /// as long as it is still live.
    pub fn resolve(&self, reference: &EntityReference) -> Option<String> {
        if let Some(name) = reference.unique_id.as_deref().and_then(|uid| self.resolve_name(uid)) {
            return Some(name);
        }
        let registry = self.registry.as_ref()?;
        registry
            .get_by_name(&reference.entity_id)
            .map(|e| e.entity_id)
    }

    /// Device owning the entity currently named `entity_id`
    pub fn device_of(&self, entity_id: &str) -> Option<String> {
        self.registry
            .as_ref()?
            .get_by_name(entity_id)
            .and_then(|e| e.device_id)
    }

    /// Entries owned by `device_id`; empty when unavailable
    pub fn device_entries(&self, device_id: &str) -> Vec<RegistryEntry> {
        self.registry
            .as_ref()
            .map(|r| r.list_by_device(device_id))
            .unwrap_or_default()
    }

    /// Snapshot of the registry; empty when unavailable
    pub fn entries(&self) -> Vec<RegistryEntry> {
        self.registry
            .as_ref()
            .map(|r| r.list_all())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ReferenceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceResolver")
            .field("available", &self.is_available())
            .finish()
    }
}
