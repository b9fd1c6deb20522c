//! TAXON Service - Category Lookups and Invalidation Dispatch
//!
//! The entry point for callers: path and identifier lookups over cached
//! category trees, request scopes owning per-unit-of-work attribute
//! overlays, and the invalidation dispatcher fed by the messaging transport.

mod listener;
mod scope;
mod service;
pub mod telemetry;

pub use listener::{InvalidationBus, InvalidationListener, ListenerSummary};
pub use scope::{RequestScope, ScopeOverlays};
pub use service::{CategoryService, DispatchOutcome};
pub use telemetry::init_tracing;
