//! Entity configuration store trait
//!
//! The `EntityConfigStore` trait is the static configuration collaborator:
//! it answers which entity types exist and how each one is defined. Lookups
//! are synchronous because they sit on the per-request identification path.

use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::{EntityDefinition, Result};

/// Type alias for configuration change streams
pub type ConfigChangeStream<'a> = BoxStream<'a, Result<ConfigChange>>;

/// Configuration change notification
#[derive(Debug, Clone)]
pub struct ConfigChange {
    /// Timestamp of the change
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Configuration version after the change
    pub version: u32,
}

/// Entity configuration store
///
/// Implementations:
/// - `StaticConfigStore`: in-memory definitions
/// - `FileConfigStore` (tenantry-config-file): YAML/TOML file with hot reload
pub trait EntityConfigStore: Send + Sync {
    /// Definition for one entity type, if configured
    fn get_entity_definition(&self, entity_type: &str) -> Option<Arc<EntityDefinition>>;

    /// All configured entity type names, enabled or not
    fn get_all_entity_types(&self) -> Vec<String>;

    /// Enabled definitions only
    fn enabled_definitions(&self) -> Vec<Arc<EntityDefinition>> {
        self.get_all_entity_types()
            .iter()
            .filter_map(|t| self.get_entity_definition(t))
            .filter(|d| d.enabled)
            .collect()
    }
}

/// In-memory configuration store
#[derive(Debug, Default)]
pub struct StaticConfigStore {
    definitions: RwLock<BTreeMap<String, Arc<EntityDefinition>>>,
}

impl StaticConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from definitions, validating each one
    pub fn with_definitions(definitions: impl IntoIterator<Item = EntityDefinition>) -> Result<Self> {
        let store = Self::new();
        for definition in definitions {
            store.insert(definition)?;
        }
        Ok(store)
    }

    /// Add or replace a definition
    pub fn insert(&self, definition: EntityDefinition) -> Result<()> {
        definition.validate()?;
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        definitions.insert(definition.entity_type.clone(), Arc::new(definition));
        Ok(())
    }

    /// Replace the whole definition set
    pub fn replace_all(&self, definitions: BTreeMap<String, Arc<EntityDefinition>>) {
        let mut current = self
            .definitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = definitions;
    }
}

impl EntityConfigStore for StaticConfigStore {
    fn get_entity_definition(&self, entity_type: &str) -> Option<Arc<EntityDefinition>> {
        self.definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(entity_type)
            .cloned()
    }

    fn get_all_entity_types(&self) -> Vec<String> {
        self.definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}
