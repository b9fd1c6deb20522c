//! TAXON Core - Entity Types
//!
//! Pure data structures shared by every TAXON crate: identifiers, category
//! and attribute records, invalidation events, configuration and errors.
//! This crate contains no caching logic.

mod config;
mod entities;
mod error;
mod event;
mod identity;

pub use config::{LogFormat, StaleInsertPolicy, TaxonConfig, DEFAULT_TREE_CACHE_NAME};
pub use entities::{
    AttributeFamily, AttributeRecord, AttributeSet, CategoryRecord, EntityRef, EntityType,
    LOCALE_NAMESPACE_PREFIX,
};
pub use error::{
    CacheError, ConfigError, EventError, StorageError, TaxonError, TaxonResult, TreeError,
};
pub use event::{CacheHint, EntityTag, EventOrigin, InvalidationEvent, TransactionPhase};
pub use identity::{new_entity_id, CategoryId, EntityId, EntityIdType, ScopeId, Timestamp};
