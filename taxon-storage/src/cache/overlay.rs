//! Per-unit-of-work attribute overlay.
//!
//! An overlay caches one attribute family (localized names or metadata) for
//! the duration of a unit of work. It is owned by a request scope, reset at
//! transaction boundaries and never shared across scopes.
//!
//! Lifecycle: empty → populated (lazy `get` or bulk `preload`) → empty
//! (`reset`). Loads that race with an `invalidate` or `reset` are discarded
//! rather than stored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use taxon_core::{AttributeFamily, AttributeSet, EntityId, EntityRef, EntityType, TaxonResult};

use crate::source::AttributeSource;

pub struct AttributeOverlay {
    family: AttributeFamily,
    source: Arc<dyn AttributeSource>,
    entries: DashMap<EntityId, Arc<AttributeSet>>,
    generation: AtomicU64,
    fetches: AtomicU64,
}

impl std::fmt::Debug for AttributeOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeOverlay")
            .field("family", &self.family)
            .field("entries", &self.entries.len())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl AttributeOverlay {
    pub fn new(family: AttributeFamily, source: Arc<dyn AttributeSource>) -> Self {
        Self {
            family,
            source,
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn family(&self) -> AttributeFamily {
        self.family
    }

    /// Attributes of `entity`, loading them on first access.
    ///
    /// A fetch error is returned to this caller only; nothing is cached.
    pub async fn get(&self, entity: EntityRef) -> TaxonResult<Arc<AttributeSet>> {
        if let Some(set) = self.entries.get(&entity.id) {
            return Ok(Arc::clone(set.value()));
        }

        let generation = self.generation.load(Ordering::SeqCst);
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let records = self
            .source
            .fetch_attribute_records(self.family, entity.entity_type, &[entity.id])
            .await?;
        let set = Arc::new(AttributeSet::new(records));

        if self.generation.load(Ordering::SeqCst) == generation {
            self.entries.insert(entity.id, Arc::clone(&set));
            self.withdraw_if_overtaken(generation, &[(entity.id, Arc::clone(&set))]);
        }
        Ok(set)
    }

    /// Load many entities with a single fetch. Entities already loaded are
    /// skipped; entities without attributes receive the empty marker.
    /// Returns the number of entities loaded.
    pub async fn preload(&self, entity_type: EntityType, ids: &[EntityId]) -> TaxonResult<usize> {
        let mut pending: Vec<EntityId> = ids
            .iter()
            .copied()
            .filter(|id| !self.entries.contains_key(id))
            .collect();
        pending.sort_unstable();
        pending.dedup();
        if pending.is_empty() {
            return Ok(0);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let records = self
            .source
            .fetch_attribute_records(self.family, entity_type, &pending)
            .await?;

        let mut grouped: HashMap<EntityId, Vec<_>> =
            pending.iter().map(|id| (*id, Vec::new())).collect();
        for record in records {
            if let Some(bucket) = grouped.get_mut(&record.entity_id) {
                bucket.push(record);
            }
        }

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(family = ?self.family, "Overlay reset during preload, result discarded");
            return Ok(0);
        }
        let loaded = grouped.len();
        let mut stored = Vec::with_capacity(loaded);
        for (id, records) in grouped {
            let set = Arc::new(AttributeSet::new(records));
            if let Entry::Vacant(slot) = self.entries.entry(id) {
                slot.insert(Arc::clone(&set));
                stored.push((id, set));
            }
        }
        if self.withdraw_if_overtaken(generation, &stored) {
            tracing::debug!(family = ?self.family, "Overlay reset during preload, result discarded");
            return Ok(0);
        }
        tracing::trace!(family = ?self.family, loaded, "Overlay preloaded");
        Ok(loaded)
    }

    /// Remove entries this load just stored if an `invalidate` or `reset`
    /// ran since `generation` was read. Returns true if they were removed.
    ///
    /// Invalidation bumps the generation before removing, so a load either
    /// sees the bump here or stored its entry before that removal ran.
    fn withdraw_if_overtaken(&self, generation: u64, stored: &[(EntityId, Arc<AttributeSet>)]) -> bool {
        if self.generation.load(Ordering::SeqCst) == generation {
            return false;
        }
        for (id, set) in stored {
            self.entries.remove_if(id, |_, current| Arc::ptr_eq(current, set));
        }
        true
    }

    /// Drop one entity so its next access reloads it.
    pub fn invalidate(&self, id: EntityId) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(&id).is_some()
    }

    /// Drop everything.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    pub fn is_loaded(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of fetches issued to the source since creation.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}
