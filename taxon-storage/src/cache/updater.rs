//! Incremental maintenance of cached path trees.
//!
//! Updates never trigger a build: a scope without a cached tree is left
//! alone. Every mutation runs inside the scope's exclusive section on a
//! clone of the current snapshot, which is then published atomically.

use std::sync::Arc;

use taxon_core::{CategoryId, CategoryRecord, ScopeId, StaleInsertPolicy, TaxonResult, TreeError};

use super::path_cache::PathTreeCache;

/// What an incremental update did to the cached tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No tree was cached for the scope; nothing to maintain.
    NoCachedTree,
    /// A new leaf was attached.
    Inserted,
    /// The node's segment changed; its subtree was re-materialized.
    Updated,
    /// The node moved under a new parent.
    Moved,
    /// The node and `count - 1` descendants were detached.
    Removed { count: usize },
    /// The tree already reflected the change.
    Unchanged,
    /// The parent is not in the tree; the change was skipped and the
    /// subtree stays stale until the next rebuild.
    Stale { missing_parent: CategoryId },
    /// The change could not be applied incrementally; the scope was evicted.
    ScopeEvicted,
}

/// Applies category changes to cached trees.
#[derive(Debug)]
pub struct PathTreeUpdater {
    cache: Arc<PathTreeCache>,
    stale_insert_policy: StaleInsertPolicy,
}

impl PathTreeUpdater {
    pub fn new(cache: Arc<PathTreeCache>, stale_insert_policy: StaleInsertPolicy) -> Self {
        Self {
            cache,
            stale_insert_policy,
        }
    }

    pub fn cache(&self) -> &Arc<PathTreeCache> {
        &self.cache
    }

    /// Reflect a created or modified category record in the cached tree of
    /// `scope_id`. Inactive records are removed.
    pub async fn apply_insert_or_update(
        &self,
        scope_id: ScopeId,
        record: &CategoryRecord,
    ) -> TaxonResult<UpdateOutcome> {
        if record.scope_id != scope_id {
            return Err(TreeError::ScopeMismatch {
                id: record.category_id.into(),
                expected: scope_id,
                found: record.scope_id,
            }
            .into());
        }
        if !record.is_active && !record.is_root() {
            return self.apply_remove(scope_id, record.category_id).await;
        }

        let Some(handle) = self.cache.cached(scope_id)? else {
            // Invalidates a build that may have read the old record.
            self.cache.evict(scope_id);
            return Ok(UpdateOutcome::NoCachedTree);
        };

        let _guard = handle.lock().await;
        let current = handle.snapshot();
        let id = record.category_id;

        let Some(parent_id) = record.parent_id else {
            if current.root_id() == id {
                return Ok(UpdateOutcome::Unchanged);
            }
            tracing::warn!(
                scope_id = %scope_id,
                category_id = %id,
                "Root record changed, evicting scope"
            );
            self.cache.evict(scope_id);
            return Ok(UpdateOutcome::ScopeEvicted);
        };

        if let Some(existing) = current.get(id) {
            if existing.is_root() {
                // The root gained a parent.
                self.cache.evict(scope_id);
                return Ok(UpdateOutcome::ScopeEvicted);
            }
            let segment_changed = existing.segment() != record.segment;
            if existing.parent_id() != Some(parent_id) {
                if !current.contains(parent_id) || current.is_within(parent_id, id) {
                    tracing::warn!(
                        scope_id = %scope_id,
                        category_id = %id,
                        new_parent = %parent_id,
                        "Reparent target unusable, evicting scope"
                    );
                    self.cache.evict(scope_id);
                    return Ok(UpdateOutcome::ScopeEvicted);
                }
                let mut next = (*current).clone();
                next.reparent(id, parent_id);
                if segment_changed {
                    next.rename(id, &record.segment);
                }
                handle.publish(next);
                tracing::debug!(scope_id = %scope_id, category_id = %id, "Category moved");
                return Ok(UpdateOutcome::Moved);
            }
            if !segment_changed {
                return Ok(UpdateOutcome::Unchanged);
            }
            let mut next = (*current).clone();
            next.rename(id, &record.segment);
            handle.publish(next);
            tracing::debug!(scope_id = %scope_id, category_id = %id, "Category renamed");
            return Ok(UpdateOutcome::Updated);
        }

        if !current.contains(parent_id) {
            return Ok(self.stale_insert(scope_id, id, parent_id));
        }
        let mut next = (*current).clone();
        next.insert_leaf(record);
        handle.publish(next);
        tracing::debug!(scope_id = %scope_id, category_id = %id, "Category inserted");
        Ok(UpdateOutcome::Inserted)
    }

    /// Detach `category_id` and its subtree from the cached tree of
    /// `scope_id`. Removing the root evicts the scope.
    pub async fn apply_remove(
        &self,
        scope_id: ScopeId,
        category_id: CategoryId,
    ) -> TaxonResult<UpdateOutcome> {
        let Some(handle) = self.cache.cached(scope_id)? else {
            self.cache.evict(scope_id);
            return Ok(UpdateOutcome::NoCachedTree);
        };

        let _guard = handle.lock().await;
        let current = handle.snapshot();
        if current.root_id() == category_id {
            tracing::warn!(scope_id = %scope_id, "Root category removed, evicting scope");
            self.cache.evict(scope_id);
            return Ok(UpdateOutcome::ScopeEvicted);
        }
        if !current.contains(category_id) {
            return Ok(UpdateOutcome::Unchanged);
        }

        let mut next = (*current).clone();
        let removed = next.detach(category_id);
        handle.publish(next);
        tracing::debug!(
            scope_id = %scope_id,
            category_id = %category_id,
            removed = removed.len(),
            "Category subtree removed"
        );
        Ok(UpdateOutcome::Removed {
            count: removed.len(),
        })
    }

    fn stale_insert(
        &self,
        scope_id: ScopeId,
        category_id: CategoryId,
        missing_parent: CategoryId,
    ) -> UpdateOutcome {
        match self.stale_insert_policy {
            StaleInsertPolicy::Skip => {
                tracing::warn!(
                    scope_id = %scope_id,
                    category_id = %category_id,
                    missing_parent = %missing_parent,
                    "Stale incremental update, parent not in tree"
                );
                UpdateOutcome::Stale { missing_parent }
            }
            StaleInsertPolicy::EvictScope => {
                tracing::warn!(
                    scope_id = %scope_id,
                    category_id = %category_id,
                    missing_parent = %missing_parent,
                    "Stale incremental update, evicting scope"
                );
                self.cache.evict(scope_id);
                UpdateOutcome::ScopeEvicted
            }
        }
    }
}
