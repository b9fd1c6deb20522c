//! TAXON Test Utilities
//!
//! Centralized test infrastructure for the TAXON workspace:
//! - Counting and gated collaborators
//! - Proptest generators for identifiers, records, trees and events
//! - Test fixtures for common category trees
//! - Custom assertions for TAXON-specific validation

// Re-export mock storage from its source crate
pub use taxon_storage::{AttributeSource, CategorySource, MockStorage};

// Re-export core types for convenience
pub use taxon_core::{
    AttributeFamily, AttributeRecord, CacheError, CacheHint, CategoryId, CategoryRecord,
    EntityId, EntityIdType, EntityRef, EntityTag, EntityType, EventOrigin, InvalidationEvent,
    ScopeId, StaleInsertPolicy, StorageError, TaxonConfig, TaxonError, TaxonResult, TreeError,
};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

// ============================================================================
// COUNTING COLLABORATORS
// ============================================================================

/// Wraps a collaborator and counts every call made through it.
///
/// A gated source holds each fetch until a permit is released with
/// [`release`](Self::release), which lets a test park a build mid-flight.
#[derive(Debug)]
pub struct CountingSource<S> {
    inner: S,
    category_fetches: AtomicUsize,
    record_fetches: AtomicUsize,
    attribute_fetches: AtomicUsize,
    attribute_batches: Mutex<Vec<usize>>,
    gate: Option<Arc<Semaphore>>,
}

impl<S> CountingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            category_fetches: AtomicUsize::new(0),
            record_fetches: AtomicUsize::new(0),
            attribute_fetches: AtomicUsize::new(0),
            attribute_batches: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// A source whose bulk fetches wait for a released permit.
    pub fn gated(inner: S) -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new(inner)
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Let `n` held fetches proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Calls to `fetch_active_categories`.
    pub fn category_fetches(&self) -> usize {
        self.category_fetches.load(Ordering::SeqCst)
    }

    /// Calls to `fetch_category`.
    pub fn record_fetches(&self) -> usize {
        self.record_fetches.load(Ordering::SeqCst)
    }

    /// Calls to `fetch_attribute_records`.
    pub fn attribute_fetches(&self) -> usize {
        self.attribute_fetches.load(Ordering::SeqCst)
    }

    /// Number of ids requested by each attribute fetch, in call order.
    pub fn attribute_batches(&self) -> Vec<usize> {
        self.attribute_batches
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

#[async_trait]
impl<S: CategorySource> CategorySource for CountingSource<S> {
    async fn fetch_active_categories(&self, scope_id: ScopeId) -> TaxonResult<Vec<CategoryRecord>> {
        self.category_fetches.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        self.inner.fetch_active_categories(scope_id).await
    }

    async fn fetch_category(
        &self,
        scope_id: ScopeId,
        category_id: CategoryId,
    ) -> TaxonResult<Option<CategoryRecord>> {
        self.record_fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_category(scope_id, category_id).await
    }
}

#[async_trait]
impl<S: AttributeSource> AttributeSource for CountingSource<S> {
    async fn fetch_attribute_records(
        &self,
        family: AttributeFamily,
        entity_type: EntityType,
        entity_ids: &[EntityId],
    ) -> TaxonResult<Vec<AttributeRecord>> {
        self.attribute_fetches.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut batches) = self.attribute_batches.lock() {
            batches.push(entity_ids.len());
        }
        self.pass_gate().await;
        self.inner
            .fetch_attribute_records(family, entity_type, entity_ids)
            .await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating TAXON entity types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    // === Identity Type Generators ===

    /// Generate a random UUID (for generic ID generation).
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a random CategoryId.
    pub fn arb_category_id() -> impl Strategy<Value = CategoryId> {
        arb_uuid().prop_map(CategoryId::new)
    }

    /// Generate a random ScopeId.
    pub fn arb_scope_id() -> impl Strategy<Value = ScopeId> {
        arb_uuid().prop_map(ScopeId::new)
    }

    /// Generate a path segment.
    pub fn arb_segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,11}"
    }

    // === Enum Generators ===

    /// Generate an EntityType variant.
    pub fn arb_entity_type() -> impl Strategy<Value = EntityType> {
        prop_oneof![
            Just(EntityType::Category),
            Just(EntityType::Item),
            Just(EntityType::Unit),
        ]
    }

    /// Generate an EntityTag variant.
    pub fn arb_entity_tag() -> impl Strategy<Value = EntityTag> {
        prop_oneof![
            Just(EntityTag::Category),
            Just(EntityTag::LocalizedName),
            Just(EntityTag::Metadata),
        ]
    }

    /// Generate an EventOrigin variant.
    pub fn arb_event_origin() -> impl Strategy<Value = EventOrigin> {
        prop_oneof![
            Just(EventOrigin::Local),
            Just(EventOrigin::OriginatedElsewhere),
            Just(EventOrigin::OriginatedHere),
        ]
    }

    // === Composite Generators ===

    /// Generate an InvalidationEvent, with or without scope and hint.
    pub fn arb_invalidation_event() -> impl Strategy<Value = InvalidationEvent> {
        (
            arb_entity_tag(),
            arb_uuid(),
            arb_event_origin(),
            proptest::option::of(arb_scope_id()),
            proptest::option::of(prop::collection::vec("[a-z_]{1,16}", 1..3)),
        )
            .prop_map(|(tag, id, origin, scope, hint)| {
                let mut event = InvalidationEvent::new(tag, id, origin);
                if let Some(scope) = scope {
                    event = event.with_scope(scope);
                }
                if let Some(names) = hint {
                    event = event.with_hint(CacheHint {
                        evict_caches: names,
                    });
                }
                event
            })
    }

    /// Generate a well-formed category tree of 1 to `max_nodes` nodes.
    ///
    /// Every non-root node picks an earlier node as parent, so the result is
    /// acyclic and fully connected. Sibling segments are unique.
    pub fn arb_category_tree(max_nodes: usize) -> impl Strategy<Value = CategoryTree> {
        (1..max_nodes.max(2))
            .prop_flat_map(|n| {
                let parents: Vec<_> = (1..n).map(|i| 0..i).collect();
                let segments = prop::collection::vec(arb_segment(), n - 1);
                (parents, segments)
            })
            .prop_map(|(parents, segments)| {
                let scope = ScopeId::now_v7();
                let ids: Vec<CategoryId> =
                    (0..=parents.len()).map(|_| CategoryId::now_v7()).collect();
                let mut records = vec![CategoryRecord::root(scope, ids[0])];
                for (i, (parent, segment)) in parents.iter().zip(segments).enumerate() {
                    records.push(CategoryRecord::child(
                        scope,
                        ids[i + 1],
                        ids[*parent],
                        format!("{segment}-{}", i + 1),
                    ));
                }
                CategoryTree::new(scope, records)
            })
    }

    /// Generate a tree together with a shuffled copy of its records.
    pub fn arb_shuffled_tree(
        max_nodes: usize,
    ) -> impl Strategy<Value = (CategoryTree, Vec<CategoryRecord>)> {
        arb_category_tree(max_nodes).prop_flat_map(|tree| {
            let records = tree.records.clone();
            (Just(tree), Just(records).prop_shuffle())
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// A scope's category records with expected full paths.
#[derive(Debug, Clone)]
pub struct CategoryTree {
    pub scope_id: ScopeId,
    pub root_id: CategoryId,
    pub records: Vec<CategoryRecord>,
    paths: BTreeMap<String, CategoryId>,
}

impl CategoryTree {
    /// Compute expected paths for a connected, acyclic record set.
    pub fn new(scope_id: ScopeId, records: Vec<CategoryRecord>) -> Self {
        let by_id: BTreeMap<CategoryId, &CategoryRecord> =
            records.iter().map(|r| (r.category_id, r)).collect();
        let root_id = records
            .iter()
            .find(|r| r.is_root())
            .map(|r| r.category_id)
            .unwrap_or_else(CategoryId::nil);

        let mut paths = BTreeMap::new();
        for record in &records {
            let mut segments = Vec::new();
            let mut current = Some(record);
            while let Some(r) = current {
                if r.is_root() {
                    break;
                }
                segments.push(r.segment.as_str());
                current = r.parent_id.and_then(|p| by_id.get(&p).copied());
            }
            segments.reverse();
            paths.insert(format!("/{}", segments.join("/")), record.category_id);
        }
        Self {
            scope_id,
            root_id,
            records,
            paths,
        }
    }

    /// Expected `(full path, id)` pairs, sorted by path.
    pub fn expected_paths(&self) -> impl Iterator<Item = (&str, CategoryId)> {
        self.paths.iter().map(|(p, id)| (p.as_str(), *id))
    }

    /// Identifier expected at `path`.
    pub fn id_at(&self, path: &str) -> CategoryId {
        self.paths
            .get(path)
            .copied()
            .unwrap_or_else(|| panic!("fixture has no category at {path}"))
    }

    pub fn record(&self, id: CategoryId) -> &CategoryRecord {
        self.records
            .iter()
            .find(|r| r.category_id == id)
            .unwrap_or_else(|| panic!("fixture has no category {id}"))
    }

    /// Mock storage holding this tree.
    pub fn storage(&self) -> Arc<MockStorage> {
        Arc::new(
            MockStorage::with_categories(self.records.clone())
                .unwrap_or_else(|e| panic!("populate mock storage: {e}")),
        )
    }
}

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// Build a tree from full paths. Intermediate categories are created
    /// implicitly, in path order, so `/a1/a2` also creates `/a1`.
    pub fn tree_from_paths(scope_id: ScopeId, paths: &[&str]) -> CategoryTree {
        let root_id = CategoryId::now_v7();
        let mut records = vec![CategoryRecord::root(scope_id, root_id)];
        let mut known: BTreeMap<String, CategoryId> = BTreeMap::new();
        known.insert(String::new(), root_id);

        for path in paths {
            let mut prefix = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                let parent_prefix = prefix.clone();
                prefix = format!("{prefix}/{segment}");
                if known.contains_key(&prefix) {
                    continue;
                }
                let id = CategoryId::now_v7();
                let parent = known[&parent_prefix];
                records.push(CategoryRecord::child(scope_id, id, parent, segment));
                known.insert(prefix.clone(), id);
            }
        }
        CategoryTree::new(scope_id, records)
    }

    /// The root → a1 → a2 chain plus a sibling b1.
    pub fn small_tree() -> CategoryTree {
        tree_from_paths(ScopeId::now_v7(), &["/a1/a2", "/b1"])
    }

    /// A config with a short build deadline for tests.
    pub fn test_config() -> TaxonConfig {
        TaxonConfig::default().with_build_timeout(Duration::from_millis(500))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for TAXON-specific validation.

    use super::*;

    /// Assert that a TaxonResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &TaxonResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a TaxonResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &TaxonResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that a TaxonResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &TaxonResult<T>) {
        match result {
            Err(TaxonError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that the tree of `scope_id` was reported unavailable.
    #[track_caller]
    pub fn assert_tree_unavailable<T: std::fmt::Debug>(result: &TaxonResult<T>, scope_id: ScopeId) {
        match result {
            Err(TaxonError::Tree(TreeError::IncompleteTree { scope_id: s })) => {
                assert_eq!(*s, scope_id, "Wrong scope in IncompleteTree error");
            }
            other => panic!("Expected IncompleteTree for {scope_id}, got: {:?}", other),
        }
    }

    /// Assert that a TaxonResult is a build timeout.
    #[track_caller]
    pub fn assert_build_timeout<T: std::fmt::Debug>(result: &TaxonResult<T>) {
        match result {
            Err(TaxonError::Cache(CacheError::BuildTimeout { .. })) => {}
            other => panic!("Expected BuildTimeout, got: {:?}", other),
        }
    }

    /// Assert that a TaxonResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &TaxonResult<T>) {
        match result {
            Err(TaxonError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a config validates.
    #[track_caller]
    pub fn assert_config_valid(config: &TaxonConfig) {
        if let Err(e) = config.validate() {
            panic!("Expected valid config, got: {e}");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tree_from_paths_creates_intermediates() {
        let scope = ScopeId::now_v7();
        let tree = fixtures::tree_from_paths(scope, &["/a1/a2/a3", "/a1/b2"]);
        assert_eq!(tree.records.len(), 5);
        let a1 = tree.id_at("/a1");
        assert_eq!(tree.record(tree.id_at("/a1/b2")).parent_id, Some(a1));
        assert_eq!(tree.id_at("/"), tree.root_id);
    }

    #[test]
    fn test_test_config_is_valid() {
        assertions::assert_config_valid(&fixtures::test_config());
    }

    #[tokio::test]
    async fn test_counting_source_counts() {
        let tree = fixtures::small_tree();
        let source = CountingSource::new(tree.storage());
        source.fetch_active_categories(tree.scope_id).await.unwrap();
        source
            .fetch_category(tree.scope_id, tree.id_at("/a1"))
            .await
            .unwrap();
        source
            .fetch_attribute_records(
                AttributeFamily::Metadata,
                EntityType::Category,
                &[tree.id_at("/a1").into(), tree.id_at("/b1").into()],
            )
            .await
            .unwrap();
        assert_eq!(source.category_fetches(), 1);
        assert_eq!(source.record_fetches(), 1);
        assert_eq!(source.attribute_batches(), vec![2]);
    }

    #[tokio::test]
    async fn test_gated_source_holds_until_released() {
        let tree = fixtures::small_tree();
        let source = Arc::new(CountingSource::gated(tree.storage()));
        let pending = {
            let source = Arc::clone(&source);
            let scope = tree.scope_id;
            tokio::spawn(async move { source.fetch_active_categories(scope).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());
        source.release(1);
        assert_eq!(pending.await.unwrap().unwrap().len(), 4);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_generated_trees_are_connected(tree in generators::arb_category_tree(32)) {
            prop_assert_eq!(tree.expected_paths().count(), tree.records.len());
            prop_assert_eq!(tree.records.iter().filter(|r| r.is_root()).count(), 1);
        }

        #[test]
        fn prop_events_roundtrip_json(event in generators::arb_invalidation_event()) {
            let json = event.to_json().unwrap();
            prop_assert_eq!(InvalidationEvent::from_json(&json).unwrap(), event);
        }
    }
}
