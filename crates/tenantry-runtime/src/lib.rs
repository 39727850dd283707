//! Tenantry Entity Runtime
//!
//! This crate owns the life of loaded entities:
//! - Lifecycle state machine with transition events
//! - Registry with per-type capacity limits and statistics
//! - Cached resource loading and hierarchical (global/parent/entity) merging
//! - Source adapters, the entity factory and the entity manager façade

pub mod adapter;
pub mod config;
pub mod factory;
pub mod hierarchical;
pub mod lifecycle;
pub mod loader;
pub mod manager;
pub mod registry;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use adapter::{EntityAdapter, LocalAdapter, PackageAdapter};
pub use config::RuntimeConfig;
pub use factory::{EntityFactory, EntitySource, PreparedEntity};
pub use hierarchical::{HierarchicalResourceStrategy, Level, ResourceBag};
pub use lifecycle::{
    EntityLifecycleManager, LifecycleEvent, LifecycleState, Transition, TransitionOutcome,
};
pub use loader::{LoadOptions, ResourceKind, ResourceLoader};
pub use manager::{EntityManager, EntityManagerBuilder, EntityManagerStats, LoadReport};
pub use registry::{EntityRegistry, LoadHistory, RegistryStats, TypeStats};
