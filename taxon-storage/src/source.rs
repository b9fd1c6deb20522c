//! Collaborator contracts consumed by the caches.
//!
//! The persistence layer lives outside this workspace. The caches only reach
//! it through these narrow async traits; [`MockStorage`](crate::MockStorage)
//! implements all of them in memory.

use std::sync::Arc;

use ::async_trait::async_trait;
use taxon_core::{
    AttributeFamily, AttributeRecord, CategoryId, CategoryRecord, EntityId, EntityType, ScopeId,
    TaxonResult,
};

/// Read access to category records.
#[async_trait]
pub trait CategorySource: Send + Sync {
    /// All active category records of a scope plus its root.
    /// Trashed records are excluded. Order is unspecified.
    async fn fetch_active_categories(&self, scope_id: ScopeId) -> TaxonResult<Vec<CategoryRecord>>;

    /// One category record, active or not. `None` if it never existed
    /// or was hard-deleted.
    async fn fetch_category(
        &self,
        scope_id: ScopeId,
        category_id: CategoryId,
    ) -> TaxonResult<Option<CategoryRecord>>;
}

/// Bulk read access to per-entity attributes.
#[async_trait]
pub trait AttributeSource: Send + Sync {
    /// Attributes of `family` for every listed entity, in one round trip.
    /// Entities without attributes are simply absent from the result.
    async fn fetch_attribute_records(
        &self,
        family: AttributeFamily,
        entity_type: EntityType,
        entity_ids: &[EntityId],
    ) -> TaxonResult<Vec<AttributeRecord>>;
}

/// Category writes. The caches never call these; they only react to the
/// invalidation events that writes produce.
#[async_trait]
pub trait CategoryWriter: Send + Sync {
    /// Insert or replace a category record.
    async fn persist_category(&self, record: &CategoryRecord) -> TaxonResult<()>;

    /// Mark a category inactive.
    async fn trash_category(&self, scope_id: ScopeId, category_id: CategoryId) -> TaxonResult<()>;
}

#[async_trait]
impl<T: CategorySource + ?Sized> CategorySource for Arc<T> {
    async fn fetch_active_categories(&self, scope_id: ScopeId) -> TaxonResult<Vec<CategoryRecord>> {
        (**self).fetch_active_categories(scope_id).await
    }

    async fn fetch_category(
        &self,
        scope_id: ScopeId,
        category_id: CategoryId,
    ) -> TaxonResult<Option<CategoryRecord>> {
        (**self).fetch_category(scope_id, category_id).await
    }
}

#[async_trait]
impl<T: AttributeSource + ?Sized> AttributeSource for Arc<T> {
    async fn fetch_attribute_records(
        &self,
        family: AttributeFamily,
        entity_type: EntityType,
        entity_ids: &[EntityId],
    ) -> TaxonResult<Vec<AttributeRecord>> {
        (**self)
            .fetch_attribute_records(family, entity_type, entity_ids)
            .await
    }
}
