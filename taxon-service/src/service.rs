//! Category service façade.
//!
//! Wires the shared cache store, the per-scope path tree cache and its
//! updater, and the live request scopes together. All invalidation traffic
//! enters through [`CategoryService::on_invalidation_event`].

use std::sync::Arc;

use taxon_core::{
    AttributeFamily, CategoryId, EntityTag, EventOrigin, InvalidationEvent, ScopeId, TaxonConfig,
    TaxonResult,
};
use taxon_storage::{
    AttributeSource, CacheStats, CacheStore, CategorySource, PathNode, PathTree, PathTreeCache,
    PathTreeUpdater, UpdateOutcome,
};

use crate::listener::InvalidationBus;
use crate::scope::{OverlayRegistry, RequestScope};

/// What handling one invalidation event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The event was published by this instance and already applied.
    Ignored,
    /// Category change applied to each listed scope.
    Trees(Vec<(ScopeId, UpdateOutcome)>),
    /// Category change for an identifier no cached tree holds, with no
    /// owning scope on the event.
    Untracked,
    /// Attribute invalidation fanned out to this many live request scopes.
    Overlays { scopes: usize },
}

pub struct CategoryService {
    config: TaxonConfig,
    store: Arc<CacheStore>,
    trees: Arc<PathTreeCache>,
    updater: PathTreeUpdater,
    categories: Arc<dyn CategorySource>,
    attributes: Arc<dyn AttributeSource>,
    registry: Arc<OverlayRegistry>,
    bus: Option<InvalidationBus>,
}

impl std::fmt::Debug for CategoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryService")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("live_scopes", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl CategoryService {
    /// Create a service over the given collaborators. The store may be
    /// shared with other caches of the process.
    pub fn new(
        config: TaxonConfig,
        store: Arc<CacheStore>,
        categories: Arc<dyn CategorySource>,
        attributes: Arc<dyn AttributeSource>,
    ) -> TaxonResult<Self> {
        config.validate()?;
        let trees = Arc::new(PathTreeCache::new(
            Arc::clone(&store),
            Arc::clone(&categories),
            &config,
        ));
        let updater = PathTreeUpdater::new(Arc::clone(&trees), config.stale_insert_policy);
        Ok(Self {
            config,
            store,
            trees,
            updater,
            categories,
            attributes,
            registry: Arc::new(OverlayRegistry::default()),
            bus: None,
        })
    }

    /// Publish local changes to other instances through `bus`.
    pub fn with_bus(mut self, bus: InvalidationBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &TaxonConfig {
        &self.config
    }

    pub fn trees(&self) -> &Arc<PathTreeCache> {
        &self.trees
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    /// Node at `path` in `scope_id`; `None` if no such category.
    pub async fn resolve_path(&self, scope_id: ScopeId, path: &str) -> TaxonResult<Option<PathNode>> {
        self.trees.resolve_path(scope_id, path).await
    }

    /// Node with identifier `category_id` in `scope_id`.
    pub async fn resolve_identifier(
        &self,
        scope_id: ScopeId,
        category_id: CategoryId,
    ) -> TaxonResult<Option<PathNode>> {
        self.trees.resolve_identifier(scope_id, category_id).await
    }

    /// Current tree snapshot of `scope_id`.
    pub async fn tree(&self, scope_id: ScopeId) -> TaxonResult<Arc<PathTree>> {
        self.trees.get(scope_id).await
    }

    /// Root-first chain of nodes ending at `category_id`. Empty if absent.
    pub async fn breadcrumb(
        &self,
        scope_id: ScopeId,
        category_id: CategoryId,
    ) -> TaxonResult<Vec<PathNode>> {
        let tree = self.trees.get(scope_id).await?;
        Ok(tree.ancestors(category_id).into_iter().cloned().collect())
    }

    /// Drop the cached tree of `scope_id`.
    pub fn evict_scope(&self, scope_id: ScopeId) -> bool {
        self.trees.evict(scope_id)
    }

    // ------------------------------------------------------------------------
    // Request scopes
    // ------------------------------------------------------------------------

    /// Open a handle for one unit of work.
    pub fn begin_scope(&self) -> RequestScope {
        RequestScope::open(Arc::clone(&self.registry), Arc::clone(&self.attributes))
    }

    /// Number of request scopes currently registered.
    pub fn live_scopes(&self) -> usize {
        self.registry.len()
    }

    // ------------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------------

    /// Apply one invalidation event.
    ///
    /// Category events re-read the record and update or remove it in every
    /// affected cached tree. Attribute events evict the entity from the
    /// matching overlay of every live request scope. Cache hints evict the
    /// named caches from the store.
    pub async fn on_invalidation_event(&self, event: &InvalidationEvent) -> TaxonResult<DispatchOutcome> {
        if event.origin == EventOrigin::OriginatedHere {
            tracing::trace!(entity_id = %event.entity_id, "Own event echoed back, ignored");
            return Ok(DispatchOutcome::Ignored);
        }

        if let Some(hint) = &event.hint {
            for cache_name in &hint.evict_caches {
                let evicted = self.store.evict_all(cache_name);
                tracing::debug!(cache_name = %cache_name, evicted, "Evicted by cache hint");
            }
        }

        match event.entity_tag {
            EntityTag::Category => self.apply_category_event(event).await,
            EntityTag::LocalizedName => Ok(self.invalidate_overlays(AttributeFamily::LocalizedName, event)),
            EntityTag::Metadata => Ok(self.invalidate_overlays(AttributeFamily::Metadata, event)),
        }
    }

    /// Apply a change made by this instance and publish it to the others.
    pub async fn notify_local_change(&self, event: InvalidationEvent) -> TaxonResult<DispatchOutcome> {
        let local = InvalidationEvent {
            origin: EventOrigin::Local,
            ..event
        };
        let outcome = self.on_invalidation_event(&local).await?;
        if let Some(bus) = &self.bus {
            bus.publish(&local.for_remote())?;
        }
        Ok(outcome)
    }

    /// Drop everything that may have missed invalidations.
    pub fn invalidate_everything(&self) {
        let trees = self.trees.evict_all();
        let scopes = self.registry.live();
        for overlays in &scopes {
            overlays.family(AttributeFamily::LocalizedName).reset();
            overlays.family(AttributeFamily::Metadata).reset();
        }
        tracing::warn!(trees, scopes = scopes.len(), "All cached category data invalidated");
    }

    async fn apply_category_event(&self, event: &InvalidationEvent) -> TaxonResult<DispatchOutcome> {
        let category_id = CategoryId::from(event.entity_id);
        let scopes = match event.scope_id {
            Some(scope_id) => vec![scope_id],
            None => self.scopes_holding(category_id)?,
        };
        if scopes.is_empty() {
            tracing::debug!(category_id = %category_id, "Category event for untracked identifier");
            return Ok(DispatchOutcome::Untracked);
        }

        let mut applied = Vec::with_capacity(scopes.len());
        for scope_id in scopes {
            if self.trees.cached(scope_id)?.is_none() {
                // Nothing to maintain, but a build in flight must not store
                // what it read before this change.
                self.trees.evict(scope_id);
                applied.push((scope_id, UpdateOutcome::NoCachedTree));
                continue;
            }
            let outcome = match self.categories.fetch_category(scope_id, category_id).await? {
                Some(record) => self.updater.apply_insert_or_update(scope_id, &record).await?,
                None => self.updater.apply_remove(scope_id, category_id).await?,
            };
            tracing::debug!(
                scope_id = %scope_id,
                category_id = %category_id,
                outcome = ?outcome,
                "Category event applied"
            );
            applied.push((scope_id, outcome));
        }
        Ok(DispatchOutcome::Trees(applied))
    }

    fn scopes_holding(&self, category_id: CategoryId) -> TaxonResult<Vec<ScopeId>> {
        let mut scopes = Vec::new();
        for scope_id in self.trees.cached_scopes() {
            if let Some(handle) = self.trees.cached(scope_id)? {
                if handle.snapshot().contains(category_id) {
                    scopes.push(scope_id);
                }
            }
        }
        Ok(scopes)
    }

    fn invalidate_overlays(&self, family: AttributeFamily, event: &InvalidationEvent) -> DispatchOutcome {
        let scopes = self.registry.live();
        for overlays in &scopes {
            overlays.family(family).invalidate(event.entity_id);
        }
        tracing::trace!(
            family = ?family,
            entity_id = %event.entity_id,
            scopes = scopes.len(),
            "Attribute invalidation fanned out"
        );
        DispatchOutcome::Overlays {
            scopes: scopes.len(),
        }
    }
}
