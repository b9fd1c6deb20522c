//! Invalidation events and transaction lifecycle phases.
//!
//! `InvalidationEvent` is the payload exchanged with the messaging transport
//! that links server instances. Its JSON encoding is the interoperability
//! contract:
//!
//! ```text
//! {"entity_tag":"category","entity_id":"0190…","origin":"originated_elsewhere",
//!  "scope_id":"0190…","hint":{"evict_caches":["item_index"]}}
//! ```
//!
//! `scope_id` and `hint` are optional and omitted when absent.

use crate::{EntityId, EventError, ScopeId, TaxonResult};
use serde::{Deserialize, Serialize};

/// What kind of cached data an invalidation event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityTag {
    /// Structural change to a category (insert, rename, move, trash).
    Category,
    /// Localized names of an entity changed.
    LocalizedName,
    /// Metadata key/value pairs of an entity changed.
    Metadata,
}

/// Where an invalidation event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    /// Only meaningful inside this process; never forwarded.
    Local,
    /// Published by another instance.
    OriginatedElsewhere,
    /// Published by this instance and echoed back by the transport.
    OriginatedHere,
}

/// Extra derived caches to evict alongside the primary target.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheHint {
    /// Cache names to clear entirely.
    #[serde(default)]
    pub evict_caches: Vec<String>,
}

impl CacheHint {
    pub fn evict(cache_name: impl Into<String>) -> Self {
        Self {
            evict_caches: vec![cache_name.into()],
        }
    }
}

/// Notification that cached data about one entity is out of date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub entity_tag: EntityTag,
    pub entity_id: EntityId,
    pub origin: EventOrigin,
    /// Owning scope of the entity, when the publisher knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<ScopeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<CacheHint>,
}

impl InvalidationEvent {
    pub fn new(entity_tag: EntityTag, entity_id: EntityId, origin: EventOrigin) -> Self {
        Self {
            entity_tag,
            entity_id,
            origin,
            scope_id: None,
            hint: None,
        }
    }

    /// Structural change to a category of a known scope.
    pub fn category(scope_id: ScopeId, category_id: impl Into<EntityId>, origin: EventOrigin) -> Self {
        Self::new(EntityTag::Category, category_id.into(), origin).with_scope(scope_id)
    }

    pub fn with_scope(mut self, scope_id: ScopeId) -> Self {
        self.scope_id = Some(scope_id);
        self
    }

    pub fn with_hint(mut self, hint: CacheHint) -> Self {
        self.hint = Some(hint);
        self
    }

    /// The same event as seen by the other instances.
    pub fn for_remote(&self) -> Self {
        Self {
            origin: EventOrigin::OriginatedElsewhere,
            ..self.clone()
        }
    }

    /// Encode to the JSON wire format.
    pub fn to_json(&self) -> TaxonResult<String> {
        serde_json::to_string(self).map_err(|e| {
            EventError::EncodeFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Decode from the JSON wire format.
    pub fn from_json(payload: &str) -> TaxonResult<Self> {
        serde_json::from_str(payload).map_err(|e| {
            EventError::DecodeFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Lifecycle phase of a unit of work (transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionPhase {
    Begin,
    Commit,
    Rollback,
    End,
}

impl TransactionPhase {
    /// Phases at which per-unit-of-work caches are cleared.
    pub fn resets_overlay(&self) -> bool {
        matches!(self, Self::Begin | Self::End)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CategoryId, EntityIdType};
    use uuid::Uuid;

    #[test]
    fn test_wire_format_field_names() {
        let event = InvalidationEvent::new(EntityTag::Metadata, Uuid::nil(), EventOrigin::Local);
        let json = event.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"entity_tag":"metadata","entity_id":"00000000-0000-0000-0000-000000000000","origin":"local"}"#
        );
    }

    #[test]
    fn test_decode_with_optional_fields() {
        let scope = ScopeId::now_v7();
        let payload = format!(
            r#"{{"entity_tag":"category","entity_id":"{}","origin":"originated_elsewhere","scope_id":"{}","hint":{{"evict_caches":["item_index"]}}}}"#,
            Uuid::nil(),
            scope
        );
        let event = InvalidationEvent::from_json(&payload).unwrap();
        assert_eq!(event.entity_tag, EntityTag::Category);
        assert_eq!(event.origin, EventOrigin::OriginatedElsewhere);
        assert_eq!(event.scope_id, Some(scope));
        assert_eq!(event.hint, Some(CacheHint::evict("item_index")));
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let payload = r#"{"entity_tag":"user","entity_id":"00000000-0000-0000-0000-000000000000","origin":"local"}"#;
        let err = InvalidationEvent::from_json(payload).unwrap_err();
        assert!(matches!(
            err,
            crate::TaxonError::Event(EventError::DecodeFailed { .. })
        ));
    }

    #[test]
    fn test_for_remote_flips_origin_only() {
        let scope = ScopeId::now_v7();
        let event = InvalidationEvent::category(scope, CategoryId::now_v7(), EventOrigin::OriginatedHere);
        let remote = event.for_remote();
        assert_eq!(remote.origin, EventOrigin::OriginatedElsewhere);
        assert_eq!(remote.entity_id, event.entity_id);
        assert_eq!(remote.scope_id, Some(scope));
    }

    #[test]
    fn test_overlay_reset_phases() {
        assert!(TransactionPhase::Begin.resets_overlay());
        assert!(TransactionPhase::End.resets_overlay());
        assert!(!TransactionPhase::Commit.resets_overlay());
        assert!(!TransactionPhase::Rollback.resets_overlay());
    }
}
