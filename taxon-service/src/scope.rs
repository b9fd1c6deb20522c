//! Request scopes: explicit handles for one unit of work.
//!
//! A [`RequestScope`] owns the attribute overlays of a unit of work. It is
//! passed explicitly to whatever code serves the request; its lifecycle is
//! driven by [`RequestScope::on_transaction_boundary`], and dropping it
//! unregisters it from invalidation fan-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use taxon_core::{
    AttributeFamily, AttributeSet, EntityId, EntityRef, EntityType, TaxonResult, TransactionPhase,
};
use taxon_storage::{AttributeOverlay, AttributeSource};

/// The overlays owned by one request scope.
#[derive(Debug)]
pub struct ScopeOverlays {
    names: AttributeOverlay,
    metadata: AttributeOverlay,
}

impl ScopeOverlays {
    fn new(source: Arc<dyn AttributeSource>) -> Self {
        Self {
            names: AttributeOverlay::new(AttributeFamily::LocalizedName, Arc::clone(&source)),
            metadata: AttributeOverlay::new(AttributeFamily::Metadata, source),
        }
    }

    pub fn family(&self, family: AttributeFamily) -> &AttributeOverlay {
        match family {
            AttributeFamily::LocalizedName => &self.names,
            AttributeFamily::Metadata => &self.metadata,
        }
    }

    fn reset(&self) {
        self.names.reset();
        self.metadata.reset();
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Live request scopes, so attribute invalidations reach every unit of work
/// in flight. Holds weak references only.
#[derive(Debug, Default)]
pub(crate) struct OverlayRegistry {
    scopes: DashMap<u64, Weak<ScopeOverlays>>,
    next_id: AtomicU64,
}

impl OverlayRegistry {
    fn register(&self, overlays: &Arc<ScopeOverlays>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.scopes.insert(id, Arc::downgrade(overlays));
        id
    }

    fn unregister(&self, id: u64) {
        self.scopes.remove(&id);
    }

    /// Overlays of every live scope. Dead entries are pruned on the way.
    pub(crate) fn live(&self) -> Vec<Arc<ScopeOverlays>> {
        let mut live = Vec::with_capacity(self.scopes.len());
        self.scopes.retain(|_, weak| match weak.upgrade() {
            Some(overlays) => {
                live.push(overlays);
                true
            }
            None => false,
        });
        live
    }

    pub(crate) fn len(&self) -> usize {
        self.scopes.len()
    }
}

// ============================================================================
// REQUEST SCOPE
// ============================================================================

/// Handle for one unit of work.
#[derive(Debug)]
pub struct RequestScope {
    id: u64,
    overlays: Arc<ScopeOverlays>,
    registry: Arc<OverlayRegistry>,
}

impl RequestScope {
    pub(crate) fn open(registry: Arc<OverlayRegistry>, source: Arc<dyn AttributeSource>) -> Self {
        let overlays = Arc::new(ScopeOverlays::new(source));
        let id = registry.register(&overlays);
        tracing::trace!(request_scope = id, "Request scope opened");
        Self {
            id,
            overlays,
            registry,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Localized-name overlay.
    pub fn names(&self) -> &AttributeOverlay {
        &self.overlays.names
    }

    /// Metadata overlay.
    pub fn metadata(&self) -> &AttributeOverlay {
        &self.overlays.metadata
    }

    /// Lifecycle hook of the unit of work. Overlays are cleared at
    /// `Begin` and `End`.
    pub fn on_transaction_boundary(&self, phase: TransactionPhase) {
        if phase.resets_overlay() {
            self.overlays.reset();
            tracing::trace!(request_scope = self.id, phase = ?phase, "Overlays reset");
        }
    }

    /// Localized name of `entity` in `locale`.
    pub async fn localized_name(&self, entity: EntityRef, locale: &str) -> TaxonResult<Option<String>> {
        let set = self.overlays.names.get(entity).await?;
        Ok(set.localized_name(locale).map(str::to_string))
    }

    /// Metadata value of `entity` under `key`.
    pub async fn metadata_value(&self, entity: EntityRef, key: &str) -> TaxonResult<Option<String>> {
        let set = self.overlays.metadata.get(entity).await?;
        Ok(set.get(key).map(str::to_string))
    }

    /// All attributes of `family` for `entity`.
    pub async fn attributes(
        &self,
        family: AttributeFamily,
        entity: EntityRef,
    ) -> TaxonResult<Arc<AttributeSet>> {
        self.overlays.family(family).get(entity).await
    }

    /// Bulk-load attributes of `family` for many entities in one fetch.
    pub async fn preload(
        &self,
        family: AttributeFamily,
        entity_type: EntityType,
        ids: &[EntityId],
    ) -> TaxonResult<usize> {
        self.overlays.family(family).preload(entity_type, ids).await
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
        tracing::trace!(request_scope = self.id, "Request scope closed");
    }
}
