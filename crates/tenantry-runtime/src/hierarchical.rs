//! Hierarchical resource loading across global, parent and entity levels
//!
//! For each resource kind the candidate directories are:
//! - global: `<resources_dir>/<kind>`
//! - parent: `<resources_dir>/<parent_type>/<kind>`, root-most ancestor first
//! - entity: `<source_path>/<kind>`
//!
//! Global and parent levels are only consulted when hierarchical loading is
//! enabled. Services combine levels according to the type's merge strategy;
//! plugins and routes come from the entity level only.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use tenantry_core::{
    EntityConfigStore, EntityContext, EntityDefinition, MergeStrategy, PluginOptions, Result,
    ServiceDeps, ServiceHandle, ServiceMap,
};

use crate::config::RuntimeConfig;
use crate::loader::{LoadOptions, ResourceKind, ResourceLoader, find_index};

/// Where a candidate directory sits in the hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Level {
    Global,
    Parent(String),
    Entity,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Global => f.write_str("global"),
            Level::Parent(t) => write!(f, "parent:{}", t),
            Level::Entity => f.write_str("entity"),
        }
    }
}

/// Outcome of loading every resource kind for one entity
///
/// Each kind is independent; one failing does not affect the others.
#[derive(Debug)]
pub struct ResourceBag {
    pub schemas: Result<Vec<String>>,
    pub services: Result<ServiceMap>,
    pub plugins: Result<Vec<String>>,
    pub routes: Result<bool>,
}

impl ResourceBag {
    /// Messages of every failed kind
    pub fn errors(&self) -> Vec<(ResourceKind, String)> {
        let mut errors = Vec::new();
        if let Err(e) = &self.schemas {
            errors.push((ResourceKind::Schemas, e.to_string()));
        }
        if let Err(e) = &self.services {
            errors.push((ResourceKind::Services, e.to_string()));
        }
        if let Err(e) = &self.plugins {
            errors.push((ResourceKind::Plugins, e.to_string()));
        }
        if let Err(e) = &self.routes {
            errors.push((ResourceKind::Routes, e.to_string()));
        }
        errors
    }
}

pub struct HierarchicalResourceStrategy {
    loader: Arc<ResourceLoader>,
    config_store: Arc<dyn EntityConfigStore>,
    config: RuntimeConfig,
    db: Option<ServiceHandle>,
}

impl fmt::Debug for HierarchicalResourceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchicalResourceStrategy")
            .field("config", &self.config)
            .field("has_db", &self.db.is_some())
            .finish()
    }
}

impl HierarchicalResourceStrategy {
    pub fn new(
        loader: Arc<ResourceLoader>,
        config_store: Arc<dyn EntityConfigStore>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            loader,
            config_store,
            config,
            db: None,
        }
    }

    /// Database handle passed to service constructors
    pub fn with_db(mut self, db: ServiceHandle) -> Self {
        self.db = Some(db);
        self
    }

    pub fn loader(&self) -> &Arc<ResourceLoader> {
        &self.loader
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            is_trusted_path: self.config.trusted_paths,
        }
    }

    /// Ancestor types of `definition`, root-most first
    ///
    /// Stops at the first repeated type or unknown parent.
    pub fn parent_chain(&self, definition: &EntityDefinition) -> Vec<String> {
        let mut chain = Vec::new();
        let mut visited = HashSet::from([definition.entity_type.clone()]);
        let mut next = definition.parent.clone();

        while let Some(parent) = next {
            if !visited.insert(parent.clone()) {
                warn!(
                    entity_type = %definition.entity_type,
                    parent = %parent,
                    "Cycle in parent chain, stopping"
                );
                break;
            }
            next = match self.config_store.get_entity_definition(&parent) {
                Some(parent_definition) => parent_definition.parent.clone(),
                None => {
                    debug!(parent = %parent, "Parent type has no definition");
                    None
                }
            };
            chain.push(parent);
        }

        chain.reverse();
        chain
    }

    /// Candidate directories for `kind`, in load order
    pub fn level_dirs(&self, context: &EntityContext, kind: ResourceKind) -> Vec<(Level, PathBuf)> {
        let mut dirs = Vec::new();
        if self.config.hierarchical_loading {
            dirs.push((Level::Global, self.config.resources_dir.join(kind.dir_name())));
            for parent in self.parent_chain(&context.definition) {
                let dir = self.config.resources_dir.join(&parent).join(kind.dir_name());
                dirs.push((Level::Parent(parent), dir));
            }
        }
        dirs.push((Level::Entity, context.source_path.join(kind.dir_name())));
        dirs
    }

    fn entity_dir(&self, context: &EntityContext, kind: ResourceKind) -> PathBuf {
        context.source_path.join(kind.dir_name())
    }

    /// Schema ids from every level, global first
    pub async fn load_schemas(&self, context: &EntityContext) -> Result<Vec<String>> {
        if !context.definition.resource_loading.schemas {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for (level, dir) in self.level_dirs(context, ResourceKind::Schemas) {
            match self.loader.load_schemas(&dir, self.load_options()).await {
                Ok(loaded) => ids.extend(loaded.iter().cloned()),
                Err(e) => warn!(
                    entity = %context.key(),
                    level = %level,
                    "Schema level failed, continuing: {}",
                    e
                ),
            }
        }
        Ok(ids)
    }

    async fn services_at(
        &self,
        context: &EntityContext,
        level: &Level,
        dir: &Path,
        deps: &ServiceDeps,
    ) -> ServiceMap {
        match self.loader.load_services(dir, deps, self.load_options()).await {
            Ok(services) => services.as_ref().clone(),
            Err(e) => {
                warn!(
                    entity = %context.key(),
                    level = %level,
                    "Service level failed, using empty contribution: {}",
                    e
                );
                ServiceMap::new()
            }
        }
    }

    /// Services combined according to the type's merge strategy
    pub async fn load_services(&self, context: &EntityContext) -> Result<ServiceMap> {
        if !context.definition.resource_loading.services {
            return Ok(ServiceMap::new());
        }

        let deps = ServiceDeps {
            db: self.db.clone(),
            config: context.config.clone(),
        };
        let strategy = context.definition.merge_strategy;

        if strategy == MergeStrategy::Isolate {
            let dir = self.entity_dir(context, ResourceKind::Services);
            return Ok(self.services_at(context, &Level::Entity, &dir, &deps).await);
        }

        let mut inherited = ServiceMap::new();
        let mut own = ServiceMap::new();
        for (level, dir) in self.level_dirs(context, ResourceKind::Services) {
            let services = self.services_at(context, &level, &dir, &deps).await;
            if level == Level::Entity {
                own = services;
            } else {
                inherited.extend(services);
            }
        }

        let merged = match strategy {
            MergeStrategy::Override => own,
            _ => {
                inherited.extend(own);
                inherited
            }
        };

        debug!(
            entity = %context.key(),
            strategy = ?strategy,
            count = merged.len(),
            "Services merged"
        );
        Ok(merged)
    }

    /// Names of plugin subdirectories that loaded, entity level only
    pub async fn load_plugins(&self, context: &EntityContext) -> Result<Vec<String>> {
        if !context.definition.resource_loading.plugins {
            return Ok(Vec::new());
        }

        let dir = self.entity_dir(context, ResourceKind::Plugins);
        if !self.loader.dir_exists(&dir, self.load_options()) {
            return Ok(Vec::new());
        }

        let mut subdirs = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if !hidden && entry.file_type().await?.is_dir() {
                subdirs.push(entry.path());
            }
        }
        subdirs.sort();

        let options = PluginOptions::new().with_entity(&context.entity_type, &context.id);

        let mut loaded = Vec::new();
        for subdir in subdirs {
            match self.loader.load_plugin(&subdir, &options, self.load_options()).await {
                Ok(name) => loaded.push(name),
                Err(e) => warn!(
                    entity = %context.key(),
                    path = %subdir.display(),
                    "Plugin failed to load: {}",
                    e
                ),
            }
        }
        Ok(loaded)
    }

    /// Register the entity's routes plugin under its route prefix
    ///
    /// Returns `Ok(false)` when there is no routes directory or index file.
    pub async fn load_routes(&self, context: &EntityContext) -> Result<bool> {
        if !context.definition.resource_loading.routes {
            return Ok(false);
        }

        let dir = self.entity_dir(context, ResourceKind::Routes);
        if !self.loader.dir_exists(&dir, self.load_options()) || find_index(&dir).is_none() {
            return Ok(false);
        }

        let options = PluginOptions::new()
            .with_prefix(context.definition.route_prefix_for(&context.id))
            .with_entity(&context.entity_type, &context.id)
            .with_app(self.loader.host().clone());

        self.loader
            .load_plugin(&dir, &options, self.load_options())
            .await
            .map(|_| true)
    }

    /// Load every resource kind
    pub async fn load_resources(&self, context: &EntityContext) -> ResourceBag {
        ResourceBag {
            schemas: self.load_schemas(context).await,
            services: self.load_services(context).await,
            plugins: self.load_plugins(context).await,
            routes: self.load_routes(context).await,
        }
    }
}
