//! Cache layer: the shared keyed store and the caches built on top of it.
//!
//! - [`CacheStore`]: named, keyed, type-erased entries with single-flight
//!   builds and generation-checked eviction.
//! - [`PathTreeCache`] / [`PathTreeUpdater`]: one category path tree per
//!   scope, built lazily and maintained incrementally.
//! - [`AttributeOverlay`]: per-unit-of-work attribute cache.

mod builder;
mod key;
mod overlay;
mod path_cache;
mod stats;
mod store;
mod tree;
mod updater;

pub use builder::build_tree;
pub use key::CacheKey;
pub use overlay::AttributeOverlay;
pub use path_cache::{PathTreeCache, ScopeTree};
pub use stats::CacheStats;
pub use store::{CacheStore, EntryInfo};
pub use tree::{join_path, normalize_path, BuildReport, PathNode, PathTree, ROOT_PATH};
pub use updater::{PathTreeUpdater, UpdateOutcome};
