//! Tenantry Core Types and Traits
//!
//! This crate provides the fundamental types and traits used throughout Tenantry:
//! - Entity definitions and runtime entity contexts
//! - Collaborator traits (configuration store, security service, host app, module loader)
//! - Core error types

pub mod config_store;
pub mod context;
pub mod definition;
pub mod error;
pub mod format;
pub mod host;
pub mod module;
pub mod request;
pub mod security;
pub mod template;

pub use config_store::{EntityConfigStore, StaticConfigStore};
pub use context::{EntityContext, EntitySummary, entity_key};
pub use definition::{
    Authentication, EntityDefinition, Isolation, MergeStrategy, ResourceLoading, SecurityPolicy,
    StrategyConfig, StrategyParams, StrategyType,
};
pub use error::{Error, Result};
pub use host::{
    HostApp, Plugin, PluginOptions, ServiceConstructor, ServiceDeps, ServiceFn, ServiceHandle,
    ServiceMap,
};
pub use module::{Catalog, CatalogModuleLoader, Export, Module, ModuleLoader};
pub use request::RequestInfo;
pub use security::{AccessContext, PathSecurity, PolicyViolation, SecurityService};
