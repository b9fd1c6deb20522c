//! Error types for TAXON operations

use crate::{EntityType, ScopeId};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Collaborator (persistence) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("Fetch failed during {operation}: {reason}")]
    FetchFailed { operation: String, reason: String },

    #[error("Write failed for {entity_type:?} with id {id}: {reason}")]
    WriteFailed {
        entity_type: EntityType,
        id: Uuid,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Path tree synthesis errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("Category tree unavailable for scope {scope_id}: no root record")]
    IncompleteTree { scope_id: ScopeId },

    #[error("Record {id} belongs to scope {found}, expected {expected}")]
    ScopeMismatch {
        id: Uuid,
        expected: ScopeId,
        found: ScopeId,
    },
}

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Build of {cache_name}/{key} timed out after {timeout:?}")]
    BuildTimeout {
        cache_name: String,
        key: String,
        timeout: Duration,
    },

    #[error("Cached value for {cache_name}/{key} has an unexpected type")]
    TypeMismatch { cache_name: String, key: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    ParseFailed { reason: String },

    #[error("Failed to initialize telemetry: {reason}")]
    TelemetryInit { reason: String },
}

/// Invalidation event wire errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Failed to encode invalidation event: {reason}")]
    EncodeFailed { reason: String },

    #[error("Failed to decode invalidation event: {reason}")]
    DecodeFailed { reason: String },
}

/// Master error type for all TAXON errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaxonError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

impl TaxonError {
    /// True when the error means "the tree for this scope cannot be served".
    pub fn is_tree_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Tree(TreeError::IncompleteTree { .. })
                | Self::Cache(CacheError::BuildTimeout { .. })
                | Self::Storage(_)
        )
    }
}

/// Result type alias for TAXON operations.
pub type TaxonResult<T> = Result<T, TaxonError>;

// =============================================================================
// TESTS
// =============================================================================
