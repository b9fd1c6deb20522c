//! TAXON Storage - Collaborator Traits, Caches and Mock Implementation
//!
//! Defines the narrow contracts through which the caches reach persistence,
//! the cache layer itself (see [`cache`]) and an in-memory implementation of
//! every contract for tests and local runs.

pub mod cache;
pub mod source;

pub use cache::{
    build_tree, join_path, normalize_path, AttributeOverlay, BuildReport, CacheKey, CacheStats,
    CacheStore, EntryInfo, PathNode, PathTree, PathTreeCache, PathTreeUpdater, ScopeTree,
    UpdateOutcome, ROOT_PATH,
};
pub use source::{AttributeSource, CategorySource, CategoryWriter};

use ::async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use taxon_core::{
    AttributeFamily, AttributeRecord, CategoryId, CategoryRecord, EntityId, EntityType, ScopeId,
    StorageError, TaxonError, TaxonResult,
};

// ============================================================================
// MOCK STORAGE
// ============================================================================

/// In-memory storage implementing every collaborator contract.
///
/// Fetches can be slowed down or made to fail to exercise timeout and error
/// paths, and every fetch is counted.
#[derive(Debug, Default)]
pub struct MockStorage {
    categories: Arc<RwLock<HashMap<CategoryId, CategoryRecord>>>,
    attributes: Arc<RwLock<HashMap<(AttributeFamily, EntityId), Vec<AttributeRecord>>>>,
    category_fetches: AtomicU64,
    attribute_fetches: AtomicU64,
    fetch_delay: RwLock<Option<Duration>>,
    failing_entities: RwLock<HashSet<EntityId>>,
    fail_category_fetches: RwLock<bool>,
}

impl MockStorage {
    /// Create a new mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage pre-populated with category records.
    pub fn with_categories(records: impl IntoIterator<Item = CategoryRecord>) -> TaxonResult<Self> {
        let storage = Self::new();
        for record in records {
            storage.insert_category(record)?;
        }
        Ok(storage)
    }

    /// Insert or replace a category record without going through the writer trait.
    pub fn insert_category(&self, record: CategoryRecord) -> TaxonResult<()> {
        let mut categories = self.categories.write().map_err(|_| StorageError::LockPoisoned)?;
        categories.insert(record.category_id, record);
        Ok(())
    }

    /// Hard-delete a category record.
    pub fn delete_category(&self, category_id: CategoryId) -> TaxonResult<bool> {
        let mut categories = self.categories.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(categories.remove(&category_id).is_some())
    }

    /// Add an attribute record of `family`.
    pub fn put_attribute(&self, family: AttributeFamily, record: AttributeRecord) -> TaxonResult<()> {
        let mut attributes = self.attributes.write().map_err(|_| StorageError::LockPoisoned)?;
        let records = attributes.entry((family, record.entity_id)).or_default();
        records.retain(|r| r.namespace != record.namespace);
        records.push(record);
        Ok(())
    }

    /// Remove every attribute of `family` for one entity.
    pub fn clear_attributes(&self, family: AttributeFamily, entity_id: EntityId) -> TaxonResult<()> {
        let mut attributes = self.attributes.write().map_err(|_| StorageError::LockPoisoned)?;
        attributes.remove(&(family, entity_id));
        Ok(())
    }

    /// Delay every fetch by `delay`.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) -> TaxonResult<()> {
        *self.fetch_delay.write().map_err(|_| StorageError::LockPoisoned)? = delay;
        Ok(())
    }

    /// Make attribute fetches fail whenever they include `entity_id`.
    pub fn fail_attributes_for(&self, entity_id: EntityId) -> TaxonResult<()> {
        self.failing_entities
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(entity_id);
        Ok(())
    }

    /// Make category fetches fail (or succeed again).
    pub fn set_category_fetch_failure(&self, failing: bool) -> TaxonResult<()> {
        *self
            .fail_category_fetches
            .write()
            .map_err(|_| StorageError::LockPoisoned)? = failing;
        Ok(())
    }

    /// Number of `fetch_active_categories` calls served.
    pub fn category_fetch_count(&self) -> u64 {
        self.category_fetches.load(Ordering::SeqCst)
    }

    /// Number of `fetch_attribute_records` calls served.
    pub fn attribute_fetch_count(&self) -> u64 {
        self.attribute_fetches.load(Ordering::SeqCst)
    }

    /// Get count of stored categories.
    pub fn category_count(&self) -> usize {
        self.categories.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Clear all stored data.
    pub fn clear(&self) -> TaxonResult<()> {
        self.categories
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        self.attributes
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        Ok(())
    }

    async fn delay(&self) -> TaxonResult<()> {
        let delay = *self.fetch_delay.read().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl CategorySource for MockStorage {
    async fn fetch_active_categories(&self, scope_id: ScopeId) -> TaxonResult<Vec<CategoryRecord>> {
        self.category_fetches.fetch_add(1, Ordering::SeqCst);
        self.delay().await?;
        if *self
            .fail_category_fetches
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
        {
            return Err(TaxonError::Storage(StorageError::FetchFailed {
                operation: "fetch_active_categories".to_string(),
                reason: "injected failure".to_string(),
            }));
        }
        let categories = self.categories.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(categories
            .values()
            .filter(|r| r.scope_id == scope_id && (r.is_active || r.is_root()))
            .cloned()
            .collect())
    }

    async fn fetch_category(
        &self,
        scope_id: ScopeId,
        category_id: CategoryId,
    ) -> TaxonResult<Option<CategoryRecord>> {
        let categories = self.categories.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(categories
            .get(&category_id)
            .filter(|r| r.scope_id == scope_id)
            .cloned())
    }
}

#[async_trait]
impl AttributeSource for MockStorage {
    async fn fetch_attribute_records(
        &self,
        family: AttributeFamily,
        _entity_type: EntityType,
        entity_ids: &[EntityId],
    ) -> TaxonResult<Vec<AttributeRecord>> {
        self.attribute_fetches.fetch_add(1, Ordering::SeqCst);
        self.delay().await?;
        {
            let failing = self
                .failing_entities
                .read()
                .map_err(|_| StorageError::LockPoisoned)?;
            if let Some(id) = entity_ids.iter().find(|id| failing.contains(id)) {
                return Err(TaxonError::Storage(StorageError::FetchFailed {
                    operation: "fetch_attribute_records".to_string(),
                    reason: format!("injected failure for {id}"),
                }));
            }
        }
        let attributes = self.attributes.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entity_ids
            .iter()
            .filter_map(|id| attributes.get(&(family, *id)))
            .flatten()
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CategoryWriter for MockStorage {
    async fn persist_category(&self, record: &CategoryRecord) -> TaxonResult<()> {
        self.insert_category(record.clone())
    }

    async fn trash_category(&self, scope_id: ScopeId, category_id: CategoryId) -> TaxonResult<()> {
        let mut categories = self.categories.write().map_err(|_| StorageError::LockPoisoned)?;
        match categories.get_mut(&category_id) {
            Some(record) if record.scope_id == scope_id => {
                record.is_active = false;
                Ok(())
            }
            _ => Err(TaxonError::Storage(StorageError::NotFound {
                entity_type: EntityType::Category,
                id: category_id.into(),
            })),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
