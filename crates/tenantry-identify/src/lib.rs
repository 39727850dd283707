//! Tenantry Identification Engine
//!
//! This crate maps inbound requests to entity ids:
//! - Subdomain, path, header and query strategies
//! - Priority-ordered composite with fallback
//! - Identification across every enabled entity type

pub mod composite;
pub mod manager;
pub mod strategy;

// Re-export commonly used types
pub use composite::CompositeStrategy;
pub use manager::{EntityIdentificationManager, IdentifiedEntity};
pub use strategy::{
    HeaderStrategy, IdentificationStrategy, IdentifyError, PathStrategy, QueryStrategy,
    SubdomainStrategy, build_strategy,
};
