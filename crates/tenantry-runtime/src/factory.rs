//! Builds entity contexts from discovered sources

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use tenantry_core::{EntityContext, EntityDefinition, Error, Result, SecurityService};

use crate::adapter::{EntityAdapter, LocalAdapter, PackageAdapter, is_inactive};
use crate::hierarchical::{HierarchicalResourceStrategy, ResourceBag};

/// A discovered entity source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySource {
    pub entity_type: String,
    pub path: PathBuf,
    /// Explicit id; derived by the adapter when absent
    pub id: Option<String>,
}

impl EntitySource {
    pub fn new(entity_type: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            entity_type: entity_type.into(),
            path: path.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A context with config applied, ready for resource loading
pub struct PreparedEntity {
    pub context: EntityContext,
    adapter: Arc<dyn EntityAdapter>,
}

impl PreparedEntity {
    /// Load resources through the adapter that prepared this entity
    pub async fn load_resources(
        mut self,
        strategy: &HierarchicalResourceStrategy,
    ) -> (EntityContext, ResourceBag) {
        let bag = self.adapter.load_resources(&mut self.context, strategy).await;
        (self.context, bag)
    }
}

impl fmt::Debug for PreparedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedEntity")
            .field("context", &self.context)
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

pub struct EntityFactory {
    adapters: Vec<Arc<dyn EntityAdapter>>,
    security: Arc<dyn SecurityService>,
    strategy: Arc<HierarchicalResourceStrategy>,
}

impl fmt::Debug for EntityFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let adapters: Vec<&str> = self.adapters.iter().map(|a| a.name()).collect();
        f.debug_struct("EntityFactory")
            .field("adapters", &adapters)
            .finish()
    }
}

impl EntityFactory {
    /// Factory with the package adapter probed before the local one
    pub fn new(
        security: Arc<dyn SecurityService>,
        strategy: Arc<HierarchicalResourceStrategy>,
    ) -> Self {
        Self {
            adapters: vec![Arc::new(PackageAdapter), Arc::new(LocalAdapter)],
            security,
            strategy,
        }
    }

    /// Replace the adapter list
    pub fn with_adapters(mut self, adapters: Vec<Arc<dyn EntityAdapter>>) -> Self {
        self.adapters = adapters;
        self
    }

    /// Probe `adapter` before the existing ones
    pub fn register_adapter(&mut self, adapter: Arc<dyn EntityAdapter>) {
        self.adapters.insert(0, adapter);
    }

    pub fn strategy(&self) -> &Arc<HierarchicalResourceStrategy> {
        &self.strategy
    }

    /// First adapter that can handle `source`
    pub fn select_adapter(&self, source: &EntitySource) -> Option<Arc<dyn EntityAdapter>> {
        self.adapters
            .iter()
            .find(|adapter| adapter.can_handle(&source.path))
            .cloned()
    }

    /// Select an adapter, resolve and validate the id, and apply config
    ///
    /// Returns `Ok(None)` when the adapter config marks the entity inactive.
    pub async fn prepare(
        &self,
        definition: Arc<EntityDefinition>,
        source: &EntitySource,
    ) -> Result<Option<PreparedEntity>> {
        let adapter = self.select_adapter(source).ok_or_else(|| {
            Error::NotFound(format!(
                "No adapter can handle entity source {}",
                source.path.display()
            ))
        })?;

        let raw_id = match &source.id {
            Some(id) => id.clone(),
            None => adapter.derive_id(&source.path).await?,
        };
        let id = self
            .security
            .validate_entity_id(&raw_id, &definition.entity_type)?;

        let mut context = EntityContext::new(definition, id, adapter.name(), &source.path);
        let config = adapter.load_config(&context, &self.strategy).await?;

        if is_inactive(&config) {
            info!(entity = %context.key(), "Entity marked inactive, skipping");
            return Ok(None);
        }

        context.merge_config(&config);
        debug!(entity = %context.key(), adapter = adapter.name(), "Entity prepared");
        Ok(Some(PreparedEntity { context, adapter }))
    }

    /// Prepare and load resources in one step
    pub async fn create_entity(
        &self,
        definition: Arc<EntityDefinition>,
        source: &EntitySource,
    ) -> Result<Option<(EntityContext, ResourceBag)>> {
        match self.prepare(definition, source).await? {
            Some(prepared) => Ok(Some(prepared.load_resources(&self.strategy).await)),
            None => Ok(None),
        }
    }
}
