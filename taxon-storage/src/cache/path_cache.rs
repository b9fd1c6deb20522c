//! Per-scope path tree cache.
//!
//! Trees are stored in the shared [`CacheStore`] under the configured cache
//! name, keyed by scope. Each entry is a [`ScopeTree`]: a wait-free snapshot
//! handle plus the exclusive section that serializes incremental updates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use taxon_core::{CategoryId, ScopeId, TaxonConfig, TaxonResult};
use tokio::sync::{Mutex, MutexGuard};

use super::builder::build_tree;
use super::store::CacheStore;
use super::tree::{PathNode, PathTree};
use crate::source::CategorySource;

// ============================================================================
// SCOPE TREE
// ============================================================================

/// Published tree of one scope.
///
/// Readers call [`snapshot`](Self::snapshot) and never block. Writers take
/// the scope lock, mutate a clone of the current snapshot and publish it in
/// one atomic swap.
#[derive(Debug)]
pub struct ScopeTree {
    scope_id: ScopeId,
    snapshot: ArcSwap<PathTree>,
    mutation: Mutex<()>,
}

impl ScopeTree {
    pub fn new(tree: PathTree) -> Self {
        Self {
            scope_id: tree.scope_id(),
            snapshot: ArcSwap::from_pointee(tree),
            mutation: Mutex::new(()),
        }
    }

    pub fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    /// Current consistent snapshot.
    pub fn snapshot(&self) -> Arc<PathTree> {
        self.snapshot.load_full()
    }

    /// Enter the exclusive mutation section of this scope.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock().await
    }

    /// Replace the published snapshot. Callers hold the mutation lock.
    pub(crate) fn publish(&self, tree: PathTree) {
        self.snapshot.store(Arc::new(tree));
    }
}

// ============================================================================
// PATH TREE CACHE
// ============================================================================

/// Lazily built, shared category trees, one per scope.
pub struct PathTreeCache {
    store: Arc<CacheStore>,
    source: Arc<dyn CategorySource>,
    cache_name: String,
    build_timeout: Duration,
}

impl std::fmt::Debug for PathTreeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathTreeCache")
            .field("cache_name", &self.cache_name)
            .field("build_timeout", &self.build_timeout)
            .finish_non_exhaustive()
    }
}

impl PathTreeCache {
    pub fn new(store: Arc<CacheStore>, source: Arc<dyn CategorySource>, config: &TaxonConfig) -> Self {
        Self {
            store,
            source,
            cache_name: config.tree_cache_name.clone(),
            build_timeout: config.build_timeout(),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// The cached tree handle of `scope_id`, building it on a miss.
    ///
    /// Concurrent misses for the same scope share one build. A build that
    /// fails or exceeds the configured deadline is not cached.
    pub async fn get_scope_tree(&self, scope_id: ScopeId) -> TaxonResult<Arc<ScopeTree>> {
        let source = Arc::clone(&self.source);
        self.store
            .get_or_build_within(&self.cache_name, scope_id, self.build_timeout, || async move {
                let started = Instant::now();
                let records = source.fetch_active_categories(scope_id).await?;
                let record_count = records.len();
                let tree = build_tree(scope_id, records)?;
                tracing::info!(
                    scope_id = %scope_id,
                    records = record_count,
                    nodes = tree.len(),
                    orphans = tree.report().orphans.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Category tree built"
                );
                Ok(ScopeTree::new(tree))
            })
            .await
    }

    /// Current snapshot of the tree of `scope_id`, building it on a miss.
    pub async fn get(&self, scope_id: ScopeId) -> TaxonResult<Arc<PathTree>> {
        Ok(self.get_scope_tree(scope_id).await?.snapshot())
    }

    /// The cached tree handle of `scope_id`, without building.
    pub fn cached(&self, scope_id: ScopeId) -> TaxonResult<Option<Arc<ScopeTree>>> {
        self.store.get(&self.cache_name, scope_id)
    }

    /// Scopes whose tree is currently cached.
    pub fn cached_scopes(&self) -> Vec<ScopeId> {
        self.store
            .values::<ScopeTree>(&self.cache_name)
            .iter()
            .map(|tree| tree.scope_id())
            .collect()
    }

    /// Drop the tree of `scope_id`. The next `get` rebuilds from the source.
    pub fn evict(&self, scope_id: ScopeId) -> bool {
        let evicted = self.store.evict(&self.cache_name, scope_id);
        if evicted {
            tracing::info!(scope_id = %scope_id, "Category tree evicted");
        }
        evicted
    }

    /// Drop every cached tree.
    pub fn evict_all(&self) -> usize {
        self.store.evict_all(&self.cache_name)
    }

    /// Node at `path` in `scope_id`. Paths are normalized before lookup.
    pub async fn resolve_path(&self, scope_id: ScopeId, path: &str) -> TaxonResult<Option<PathNode>> {
        let tree = self.get(scope_id).await?;
        Ok(tree.resolve_path(path).cloned())
    }

    /// Node with identifier `category_id` in `scope_id`.
    pub async fn resolve_identifier(
        &self,
        scope_id: ScopeId,
        category_id: CategoryId,
    ) -> TaxonResult<Option<PathNode>> {
        let tree = self.get(scope_id).await?;
        Ok(tree.get(category_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockStorage;
    use taxon_core::{CacheError, CategoryRecord, EntityIdType, TaxonError, TreeError};

    fn populated(scope: ScopeId) -> (Arc<MockStorage>, CategoryId, CategoryId) {
        let root = CategoryId::now_v7();
        let a1 = CategoryId::now_v7();
        let a2 = CategoryId::now_v7();
        let storage = MockStorage::with_categories([
            CategoryRecord::root(scope, root),
            CategoryRecord::child(scope, a1, root, "a1"),
            CategoryRecord::child(scope, a2, a1, "a2"),
        ])
        .unwrap();
        (Arc::new(storage), a1, a2)
    }

    fn cache_over(storage: Arc<MockStorage>, config: &TaxonConfig) -> PathTreeCache {
        PathTreeCache::new(Arc::new(CacheStore::new()), storage, config)
    }

    #[tokio::test]
    async fn test_builds_once_and_resolves() {
        let scope = ScopeId::now_v7();
        let (storage, a1, a2) = populated(scope);
        let cache = cache_over(Arc::clone(&storage), &TaxonConfig::default());

        let node = cache.resolve_path(scope, "/a1/a2").await.unwrap().unwrap();
        assert_eq!(node.id(), a2);
        let node = cache.resolve_identifier(scope, a1).await.unwrap().unwrap();
        assert_eq!(node.full_path(), "/a1");
        assert!(cache.resolve_path(scope, "/missing").await.unwrap().is_none());

        assert_eq!(storage.category_fetch_count(), 1);
        assert_eq!(cache.cached_scopes(), vec![scope]);
    }

    #[tokio::test]
    async fn test_evict_rebuilds_from_current_data() {
        let scope = ScopeId::now_v7();
        let (storage, a1, _) = populated(scope);
        let cache = cache_over(Arc::clone(&storage), &TaxonConfig::default());

        assert!(cache.resolve_identifier(scope, a1).await.unwrap().is_some());
        storage.delete_category(a1).unwrap();
        // Still served from the cached tree.
        assert!(cache.resolve_identifier(scope, a1).await.unwrap().is_some());

        assert!(cache.evict(scope));
        assert!(cache.resolve_identifier(scope, a1).await.unwrap().is_none());
        assert_eq!(storage.category_fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_root_is_not_cached() {
        let scope = ScopeId::now_v7();
        let storage = Arc::new(MockStorage::new());
        let cache = cache_over(Arc::clone(&storage), &TaxonConfig::default());

        let err = cache.resolve_path(scope, "/").await.unwrap_err();
        assert_eq!(err, TaxonError::Tree(TreeError::IncompleteTree { scope_id: scope }));
        assert!(err.is_tree_unavailable());
        assert!(cache.cached(scope).unwrap().is_none());

        let root = CategoryId::now_v7();
        storage.insert_category(CategoryRecord::root(scope, root)).unwrap();
        let node = cache.resolve_path(scope, "").await.unwrap().unwrap();
        assert_eq!(node.id(), root);
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let scope = ScopeId::now_v7();
        let (storage, _, _) = populated(scope);
        storage
            .set_fetch_delay(Some(Duration::from_millis(200)))
            .unwrap();
        let config = TaxonConfig::default().with_build_timeout(Duration::from_millis(10));
        let cache = cache_over(Arc::clone(&storage), &config);

        let err = cache.get(scope).await.unwrap_err();
        assert!(matches!(err, TaxonError::Cache(CacheError::BuildTimeout { .. })));
        assert!(cache.cached(scope).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let scope_a = ScopeId::now_v7();
        let scope_b = ScopeId::now_v7();
        let (storage, a1, _) = populated(scope_a);
        let root_b = CategoryId::now_v7();
        storage.insert_category(CategoryRecord::root(scope_b, root_b)).unwrap();
        storage
            .insert_category(CategoryRecord::child(scope_b, CategoryId::now_v7(), root_b, "b1"))
            .unwrap();
        let cache = cache_over(Arc::clone(&storage), &TaxonConfig::default());

        assert!(cache.resolve_path(scope_a, "/a1").await.unwrap().is_some());
        assert!(cache.resolve_path(scope_b, "/a1").await.unwrap().is_none());
        assert!(cache.resolve_identifier(scope_b, a1).await.unwrap().is_none());

        cache.evict(scope_a);
        assert!(cache.cached(scope_b).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_publish_replaces_snapshot() {
        let scope = ScopeId::now_v7();
        let (storage, _, _) = populated(scope);
        let cache = cache_over(storage, &TaxonConfig::default());

        let handle = cache.get_scope_tree(scope).await.unwrap();
        let before = handle.snapshot();
        {
            let _guard = handle.lock().await;
            let mut next = (*before).clone();
            let a1 = before.resolve_path("/a1").unwrap().id();
            assert!(next.rename(a1, "renamed"));
            handle.publish(next);
        }
        assert!(before.resolve_path("/a1").is_some());
        assert!(handle.snapshot().resolve_path("/renamed/a2").is_some());
    }
}
