//! Configuration types

use crate::{ConfigError, TaxonError, TaxonResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cache name under which path trees are stored.
pub const DEFAULT_TREE_CACHE_NAME: &str = "category_path_tree";

/// What to do when an incremental insert names a parent the cached tree
/// does not contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleInsertPolicy {
    /// Leave the cached tree as is; the subtree appears after the next rebuild.
    #[default]
    Skip,
    /// Evict the scope's tree so the next read rebuilds it.
    EvictScope,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonConfig {
    /// Deadline for one tree build, collaborator fetch included (milliseconds).
    pub build_timeout_ms: u64,
    pub stale_insert_policy: StaleInsertPolicy,
    /// Cache name for path trees inside the shared cache store.
    pub tree_cache_name: String,
    /// Capacity of the in-process invalidation broadcast channel.
    pub listener_capacity: usize,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl Default for TaxonConfig {
    fn default() -> Self {
        Self {
            build_timeout_ms: 5_000,
            stale_insert_policy: StaleInsertPolicy::Skip,
            tree_cache_name: DEFAULT_TREE_CACHE_NAME.to_string(),
            listener_capacity: 1024,
            log_filter: "taxon=info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl TaxonConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create TaxonConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TAXON_BUILD_TIMEOUT_MS`: tree build deadline (default: 5000)
    /// - `TAXON_STALE_INSERT_POLICY`: "skip" or "evict_scope" (default: skip)
    /// - `TAXON_TREE_CACHE_NAME`: cache name for trees (default: category_path_tree)
    /// - `TAXON_LISTENER_CAPACITY`: broadcast channel capacity (default: 1024)
    /// - `TAXON_LOG_FILTER`: fallback log filter (default: taxon=info)
    /// - `TAXON_LOG_FORMAT`: "pretty" or "json" (default: pretty)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            build_timeout_ms: std::env::var("TAXON_BUILD_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.build_timeout_ms),
            stale_insert_policy: match std::env::var("TAXON_STALE_INSERT_POLICY").as_deref() {
                Ok("evict_scope") => StaleInsertPolicy::EvictScope,
                _ => defaults.stale_insert_policy,
            },
            tree_cache_name: std::env::var("TAXON_TREE_CACHE_NAME")
                .unwrap_or(defaults.tree_cache_name),
            listener_capacity: std::env::var("TAXON_LISTENER_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.listener_capacity),
            log_filter: std::env::var("TAXON_LOG_FILTER").unwrap_or(defaults.log_filter),
            log_format: match std::env::var("TAXON_LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => defaults.log_format,
            },
        }
    }

    /// Parse a TOML document. Missing keys take their default value.
    pub fn from_toml_str(source: &str) -> TaxonResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| {
            TaxonError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_millis(self.build_timeout_ms)
    }

    /// Set the tree build deadline.
    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    /// Set the stale insert policy.
    pub fn with_stale_insert_policy(mut self, policy: StaleInsertPolicy) -> Self {
        self.stale_insert_policy = policy;
        self
    }

    /// Set the cache name used for path trees.
    pub fn with_tree_cache_name(mut self, name: impl Into<String>) -> Self {
        self.tree_cache_name = name.into();
        self
    }

    /// Set the invalidation channel capacity.
    pub fn with_listener_capacity(mut self, capacity: usize) -> Self {
        self.listener_capacity = capacity;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - build_timeout_ms > 0
    /// - tree_cache_name is not blank
    /// - listener_capacity > 0
    pub fn validate(&self) -> TaxonResult<()> {
        if self.build_timeout_ms == 0 {
            return Err(TaxonError::Config(ConfigError::InvalidValue {
                field: "build_timeout_ms".to_string(),
                value: self.build_timeout_ms.to_string(),
                reason: "build_timeout_ms must be greater than 0".to_string(),
            }));
        }

        if self.tree_cache_name.trim().is_empty() {
            return Err(TaxonError::Config(ConfigError::InvalidValue {
                field: "tree_cache_name".to_string(),
                value: self.tree_cache_name.clone(),
                reason: "tree_cache_name must not be blank".to_string(),
            }));
        }

        if self.listener_capacity == 0 {
            return Err(TaxonError::Config(ConfigError::InvalidValue {
                field: "listener_capacity".to_string(),
                value: self.listener_capacity.to_string(),
                reason: "listener_capacity must be greater than 0".to_string(),
            }));
        }

        Ok(())
    }
}
