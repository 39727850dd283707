//! Entity manager: the façade the request pipeline and admin surface call
//!
//! Composes identification, the registry, the lifecycle state machine and
//! the factory. Startup loading is sequential, one entity at a time.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use tenantry_core::{
    EntityConfigStore, EntityContext, Error, HostApp, ModuleLoader, PathSecurity, RequestInfo,
    Result, SecurityService, ServiceHandle,
};
use tenantry_identify::{EntityIdentificationManager, IdentifiedEntity};
use tenantry_observability::{EntityTypeStatus, LoadOutcome, Metrics, ReadinessChecker};

use crate::adapter::EntityAdapter;
use crate::config::RuntimeConfig;
use crate::factory::{EntityFactory, EntitySource};
use crate::hierarchical::HierarchicalResourceStrategy;
use crate::lifecycle::{EntityLifecycleManager, LifecycleState, Transition, TransitionOutcome};
use crate::loader::ResourceLoader;
use crate::registry::{EntityRegistry, RegistryStats};

/// Result of a batch load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Keys of entities that were registered and activated
    pub loaded: Vec<String>,
    /// Sources whose config marked them inactive
    pub skipped: Vec<String>,
    /// Source path and error message of each failure
    pub failed: Vec<(String, String)>,
}

/// Registry statistics plus a lifecycle snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EntityManagerStats {
    #[serde(flatten)]
    pub registry: RegistryStats,
    /// Tracked entities per lifecycle state
    pub lifecycle: BTreeMap<LifecycleState, usize>,
}

pub struct EntityManagerBuilder {
    config: RuntimeConfig,
    config_store: Arc<dyn EntityConfigStore>,
    host: Arc<dyn HostApp>,
    modules: Arc<dyn ModuleLoader>,
    security: Option<Arc<dyn SecurityService>>,
    metrics: Option<Arc<Metrics>>,
    adapters: Vec<Arc<dyn EntityAdapter>>,
    db: Option<ServiceHandle>,
}

impl EntityManagerBuilder {
    /// Path and name validation; defaults to confinement within the entity and resource roots
    pub fn security(mut self, security: Arc<dyn SecurityService>) -> Self {
        self.security = Some(security);
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Extra adapter, probed before the built-in ones
    pub fn adapter(mut self, adapter: Arc<dyn EntityAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Database handle passed to service constructors
    pub fn db(mut self, db: ServiceHandle) -> Self {
        self.db = Some(db);
        self
    }

    pub fn build(self) -> EntityManager {
        let security = self.security.unwrap_or_else(|| {
            Arc::new(PathSecurity::new([
                self.config.entities_dir.clone(),
                self.config.resources_dir.clone(),
            ]))
        });

        let loader = Arc::new(ResourceLoader::new(
            security.clone(),
            self.modules,
            self.host,
        ));
        let mut strategy =
            HierarchicalResourceStrategy::new(loader, self.config_store.clone(), self.config.clone());
        if let Some(db) = self.db {
            strategy = strategy.with_db(db);
        }

        let mut factory = EntityFactory::new(security, Arc::new(strategy));
        for adapter in self.adapters.into_iter().rev() {
            factory.register_adapter(adapter);
        }

        let mut lifecycle = EntityLifecycleManager::new();
        if let Some(metrics) = &self.metrics {
            lifecycle = lifecycle.with_metrics(metrics.clone());
        }

        EntityManager {
            identification: EntityIdentificationManager::new(self.config_store.clone()),
            config: self.config,
            config_store: self.config_store,
            registry: Arc::new(EntityRegistry::new()),
            lifecycle: Arc::new(lifecycle),
            factory,
            metrics: self.metrics,
            ready: AtomicBool::new(false),
        }
    }
}

pub struct EntityManager {
    config: RuntimeConfig,
    config_store: Arc<dyn EntityConfigStore>,
    identification: EntityIdentificationManager,
    registry: Arc<EntityRegistry>,
    lifecycle: Arc<EntityLifecycleManager>,
    factory: EntityFactory,
    metrics: Option<Arc<Metrics>>,
    ready: AtomicBool,
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("config", &self.config)
            .field("registered", &self.registry.len())
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl EntityManager {
    pub fn builder(
        config: RuntimeConfig,
        config_store: Arc<dyn EntityConfigStore>,
        host: Arc<dyn HostApp>,
        modules: Arc<dyn ModuleLoader>,
    ) -> EntityManagerBuilder {
        EntityManagerBuilder {
            config,
            config_store,
            host,
            modules,
            security: None,
            metrics: None,
            adapters: Vec::new(),
            db: None,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn config_store(&self) -> &Arc<dyn EntityConfigStore> {
        &self.config_store
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn lifecycle_manager(&self) -> &Arc<EntityLifecycleManager> {
        &self.lifecycle
    }

    pub fn loader(&self) -> &Arc<ResourceLoader> {
        self.factory.strategy().loader()
    }

    /// Entities found on a request, primary first
    pub fn identify_entities(&self, request: &RequestInfo) -> Vec<IdentifiedEntity> {
        let found = self.identification.identify_entities(request);

        if let Some(metrics) = &self.metrics {
            for definition in self.config_store.enabled_definitions() {
                let hit = found.iter().any(|e| e.entity_type == definition.entity_type);
                metrics.record_identification(&definition.entity_type, hit);
            }
        }
        found
    }

    /// Drop cached identification composites, e.g. after a config reload
    pub fn invalidate_identification(&self) {
        self.identification.invalidate();
    }

    pub fn get_entity(&self, entity_type: &str, entity_id: &str) -> Option<Arc<EntityContext>> {
        self.registry.get(entity_type, entity_id)
    }

    pub fn get_entities_by_type(&self, entity_type: &str) -> Vec<Arc<EntityContext>> {
        self.registry.get_by_type(entity_type)
    }

    pub fn get_all_entity_states(&self) -> BTreeMap<String, BTreeMap<String, LifecycleState>> {
        self.lifecycle.get_all_entity_states()
    }

    pub fn get_stats(&self) -> EntityManagerStats {
        EntityManagerStats {
            registry: self.registry.get_stats(),
            lifecycle: self.lifecycle.state_counts().into_iter().collect(),
        }
    }

    /// Whether the startup load has finished
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Entity source directories under `<entities_dir>/<type>/<id>` for every enabled type
    pub async fn discover_sources(&self) -> Result<Vec<EntitySource>> {
        let mut sources = Vec::new();
        for definition in self.config_store.enabled_definitions() {
            let type_dir = self.config.entities_dir.join(&definition.entity_type);
            if !type_dir.is_dir() {
                debug!(entity_type = %definition.entity_type, path = %type_dir.display(), "No entity directory");
                continue;
            }

            let mut found = Vec::new();
            let mut entries = tokio::fs::read_dir(&type_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if !hidden && entry.file_type().await?.is_dir() {
                    found.push(entry.path());
                }
            }
            found.sort();

            sources.extend(
                found
                    .into_iter()
                    .map(|path| EntitySource::new(definition.entity_type.clone(), path)),
            );
        }

        info!(count = sources.len(), "Discovered entity sources");
        Ok(sources)
    }

    /// Discover and load every entity on disk, then mark the manager ready
    pub async fn load_all_from_disk(&self) -> Result<LoadReport> {
        let sources = self.discover_sources().await?;
        let report = self.load_all_entities(&sources).await;
        self.mark_ready();
        Ok(report)
    }

    /// Load each source in turn; failures are counted and do not stop the batch
    pub async fn load_all_entities(&self, sources: &[EntitySource]) -> LoadReport {
        let mut report = LoadReport::default();

        for source in sources {
            match self.load_entity(source).await {
                Ok(Some(context)) => report.loaded.push(context.key()),
                Ok(None) => report.skipped.push(source.path.display().to_string()),
                Err(e) => {
                    error!(
                        entity_type = %source.entity_type,
                        path = %source.path.display(),
                        "Failed to load entity: {}",
                        e
                    );
                    report
                        .failed
                        .push((source.path.display().to_string(), e.to_string()));
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Entity loading complete"
        );
        report
    }

    /// Build, register and activate one entity
    ///
    /// Returns `Ok(None)` when the entity is marked inactive. Failures are
    /// counted in `history.failed`.
    pub async fn load_entity(&self, source: &EntitySource) -> Result<Option<Arc<EntityContext>>> {
        let started = Instant::now();
        let result = self.load_entity_inner(source).await;

        let outcome = match &result {
            Ok(Some(_)) => LoadOutcome::Loaded,
            Ok(None) => LoadOutcome::Skipped,
            Err(_) => {
                self.registry.record_failure();
                LoadOutcome::Failed
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_entity_load(
                &source.entity_type,
                outcome,
                started.elapsed().as_secs_f64(),
            );
        }
        result
    }

    async fn load_entity_inner(&self, source: &EntitySource) -> Result<Option<Arc<EntityContext>>> {
        let definition = self
            .config_store
            .get_entity_definition(&source.entity_type)
            .filter(|d| d.enabled)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Entity type '{}' is not configured or is disabled",
                    source.entity_type
                ))
            })?;

        let label = source.path.display().to_string();
        let Some(prepared) = self
            .with_timeout(&label, self.factory.prepare(definition, source))
            .await?
        else {
            return Ok(None);
        };

        let entity_type = prepared.context.entity_type.clone();
        let entity_id = prepared.context.id.clone();
        if !self
            .lifecycle
            .can_transition(&entity_type, &entity_id, Transition::Load)
        {
            return Err(Error::entity(
                &entity_type,
                &entity_id,
                format!(
                    "Entity is already loaded (state {})",
                    self.lifecycle.get_state(&entity_type, &entity_id)
                ),
            ));
        }

        let strategy = self.factory.strategy();
        let label = &label;
        let outcome = self
            .lifecycle
            .transition_with(&entity_type, &entity_id, Transition::Load, || async move {
                let (context, _bag) = self
                    .with_timeout(label, async { Ok(prepared.load_resources(strategy).await) })
                    .await?;
                self.registry.register(context)?;
                Ok(())
            })
            .await?;

        if !outcome.success {
            return Err(Error::entity(
                &entity_type,
                &entity_id,
                outcome.error.unwrap_or_else(|| "load failed".to_string()),
            ));
        }

        self.update_registered_gauge(&entity_type);
        Ok(self.registry.get(&entity_type, &entity_id))
    }

    /// Re-run resource loading for a registered entity
    ///
    /// The entity's cached resources are cleared first. A handler failure
    /// leaves the entity in `ERROR` with its previous context registered.
    pub async fn reload_entity(&self, entity_type: &str, entity_id: &str) -> Result<TransitionOutcome> {
        let existing = self.require(entity_type, entity_id)?;
        let definition = self
            .config_store
            .get_entity_definition(entity_type)
            .unwrap_or_else(|| existing.definition.clone());
        let source = EntitySource::new(entity_type, existing.source_path.clone()).with_id(entity_id);
        let label = existing.key();

        let outcome = self
            .lifecycle
            .transition_with(entity_type, entity_id, Transition::Reload, || async {
                self.loader().clear_path(&source.path);
                let prepared = self
                    .with_timeout(&label, self.factory.prepare(definition, &source))
                    .await?
                    .ok_or_else(|| Error::entity(entity_type, entity_id, "Entity is marked inactive"))?;
                let (context, _bag) = self
                    .with_timeout(&label, async {
                        Ok(prepared.load_resources(self.factory.strategy()).await)
                    })
                    .await?;
                self.registry.replace(context)?;
                Ok(())
            })
            .await?;

        if outcome.success {
            self.registry.record_reload();
            self.invalidate_identification();
        }
        Ok(outcome)
    }

    pub async fn suspend_entity(&self, entity_type: &str, entity_id: &str) -> Result<TransitionOutcome> {
        let context = self.require(entity_type, entity_id)?;
        self.lifecycle
            .transition_with(entity_type, entity_id, Transition::Suspend, || async {
                context.set_active(false);
                Ok(())
            })
            .await
    }

    pub async fn resume_entity(&self, entity_type: &str, entity_id: &str) -> Result<TransitionOutcome> {
        let context = self.require(entity_type, entity_id)?;
        self.lifecycle
            .transition_with(entity_type, entity_id, Transition::Resume, || async {
                context.set_active(true);
                Ok(())
            })
            .await
    }

    /// Unregister an entity and move it to `UNLOADED` together
    ///
    /// Returns whether the entity was registered.
    pub async fn unload_entity(&self, entity_type: &str, entity_id: &str) -> Result<bool> {
        if !self
            .lifecycle
            .can_transition(entity_type, entity_id, Transition::Unload)
        {
            return Err(Error::entity(
                entity_type,
                entity_id,
                format!(
                    "Cannot unload entity in state {}",
                    self.lifecycle.get_state(entity_type, entity_id)
                ),
            ));
        }

        let existing = self.registry.get(entity_type, entity_id);
        let removed = self.registry.unregister(entity_type, entity_id);
        self.lifecycle
            .transition(entity_type, entity_id, Transition::Unload)
            .await?;

        if let Some(context) = existing {
            self.loader().clear_path(&context.source_path);
        }
        let released = self.loader().host().release_entity(entity_type, entity_id);
        debug!(entity_type, entity_id, released, "Released host plugins");
        self.update_registered_gauge(entity_type);
        Ok(removed)
    }

    fn require(&self, entity_type: &str, entity_id: &str) -> Result<Arc<EntityContext>> {
        self.registry.get(entity_type, entity_id).ok_or_else(|| {
            Error::NotFound(format!("Entity '{}:{}' not found", entity_type, entity_id))
        })
    }

    async fn with_timeout<T>(
        &self,
        label: &str,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.config.load_timeout() {
            Some(limit) => tokio::time::timeout(limit, future).await.map_err(|_| {
                warn!(entity = label, timeout = ?limit, "Entity load timed out");
                Error::Timeout(format!("Loading {} exceeded {:?}", label, limit))
            })?,
            None => future.await,
        }
    }

    fn update_registered_gauge(&self, entity_type: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.set_registered(entity_type, self.registry.count_by_type(entity_type));
        }
    }
}

impl ReadinessChecker for EntityManager {
    fn is_ready(&self) -> bool {
        EntityManager::is_ready(self)
    }

    fn get_entity_type_statuses(&self) -> Vec<EntityTypeStatus> {
        let stats = self.registry.get_stats();
        self.config_store
            .enabled_definitions()
            .into_iter()
            .map(|definition| {
                let by_type = stats.by_type.get(&definition.entity_type);
                EntityTypeStatus {
                    entity_type: definition.entity_type.clone(),
                    total: by_type.map(|t| t.total).unwrap_or(0),
                    active: by_type.map(|t| t.active).unwrap_or(0),
                }
            })
            .collect()
    }
}
