//! Entity structures

use crate::{CategoryId, EntityId, ScopeId};
use serde::{Deserialize, Serialize};

/// Prefix of attribute namespaces carrying localized names.
pub const LOCALE_NAMESPACE_PREFIX: &str = "locale:";

/// Entity type discriminator for polymorphic references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Category,
    Item,
    Unit,
}

/// Reference to any entity by type and ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, id: EntityId) -> Self {
        Self { entity_type, id }
    }

    pub fn category(id: CategoryId) -> Self {
        Self::new(EntityType::Category, id.into())
    }
}

/// Category - one node of a scope's category hierarchy as stored.
///
/// Exactly one record per scope has no parent (the root). Records whose
/// ancestry does not end at the root are orphans and are never exposed
/// through a path tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub category_id: CategoryId,
    pub scope_id: ScopeId,
    /// Display path segment, unique among siblings.
    pub segment: String,
    pub parent_id: Option<CategoryId>,
    pub is_active: bool,
}

impl CategoryRecord {
    /// Create the root record of a scope.
    pub fn root(scope_id: ScopeId, category_id: CategoryId) -> Self {
        Self {
            category_id,
            scope_id,
            segment: String::new(),
            parent_id: None,
            is_active: true,
        }
    }

    /// Create an active child record.
    pub fn child(
        scope_id: ScopeId,
        category_id: CategoryId,
        parent_id: CategoryId,
        segment: impl Into<String>,
    ) -> Self {
        Self {
            category_id,
            scope_id,
            segment: segment.into(),
            parent_id: Some(parent_id),
            is_active: true,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Return a copy flagged inactive (trashed).
    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Family of per-entity attributes cached by an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeFamily {
    /// Localized display names, namespaced `locale:<tag>`.
    LocalizedName,
    /// Free-form metadata key/value pairs.
    Metadata,
}

/// A single attribute of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub entity_id: EntityId,
    /// `locale:<tag>` for localized names, the metadata key otherwise.
    pub namespace: String,
    pub value: String,
}

impl AttributeRecord {
    pub fn new(entity_id: EntityId, namespace: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            entity_id,
            namespace: namespace.into(),
            value: value.into(),
        }
    }

    /// Localized name record for `locale` (e.g. "en").
    pub fn localized(entity_id: EntityId, locale: &str, value: impl Into<String>) -> Self {
        Self::new(
            entity_id,
            format!("{LOCALE_NAMESPACE_PREFIX}{locale}"),
            value,
        )
    }

    /// The locale tag if this is a localized-name record.
    pub fn locale(&self) -> Option<&str> {
        self.namespace.strip_prefix(LOCALE_NAMESPACE_PREFIX)
    }
}

/// All attributes of one entity for one family.
///
/// An empty set is a real, loaded answer ("this entity has no attributes"),
/// distinct from the entity not having been loaded at all.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttributeSet {
    records: Vec<AttributeRecord>,
}

impl AttributeSet {
    pub fn new(mut records: Vec<AttributeRecord>) -> Self {
        records.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        Self { records }
    }

    /// Loaded-but-empty marker.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[AttributeRecord] {
        &self.records
    }

    /// Value stored under `namespace`, if any.
    pub fn get(&self, namespace: &str) -> Option<&str> {
        self.records
            .iter()
            .find(|r| r.namespace == namespace)
            .map(|r| r.value.as_str())
    }

    /// Localized name for `locale`, if any.
    pub fn localized_name(&self, locale: &str) -> Option<&str> {
        self.records
            .iter()
            .find(|r| r.locale() == Some(locale))
            .map(|r| r.value.as_str())
    }
}
