//! File-based entity configuration store
//!
//! This crate implements the `EntityConfigStore` trait using a YAML or TOML
//! file on disk. Entity types live under the top-level `entities:` key.
//!
//! # Features
//! - YAML and TOML formats
//! - Definition validation on load and reload
//! - Real-time file watching with `notify`
//!
//! # Example
//! ```no_run
//! # use tenantry_config_file::FileConfigStore;
//! # use tenantry_core::EntityConfigStore;
//! # async fn example() -> tenantry_core::Result<()> {
//! let store = FileConfigStore::new("~/.tenantry/entities.yaml").await?;
//! let tenant = store.get_entity_definition("tenant");
//! # Ok(())
//! # }
//! ```

mod file_store;

pub use file_store::{ENTITIES_KEY, FileConfigStore, parse_definitions};
