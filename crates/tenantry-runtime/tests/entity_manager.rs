//! End-to-end tests for the entity manager over an on-disk entity tree

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use tenantry_core::{
    Catalog, CatalogModuleLoader, EntityDefinition, Error, HostApp, Plugin, PluginOptions,
    RequestInfo, Result, StaticConfigStore, StrategyConfig, StrategyType,
};
use tenantry_runtime::{
    EntityManager, EntitySource, LifecycleState, RuntimeConfig, Transition,
};

#[derive(Default)]
struct TestHost {
    registered: Mutex<Vec<(String, Option<String>)>>,
    released: Mutex<Vec<String>>,
}

#[async_trait]
impl HostApp for TestHost {
    async fn register(
        &self,
        name: &str,
        plugin: Arc<dyn Plugin>,
        options: PluginOptions,
    ) -> Result<()> {
        plugin.register(&options).await?;
        self.registered
            .lock()
            .unwrap()
            .push((name.to_string(), options.prefix.clone()));
        Ok(())
    }

    fn add_schema(&self, _schema: &Value) -> Result<()> {
        Ok(())
    }

    fn decorate(&self, _name: &str, _value: Value) -> Result<()> {
        Ok(())
    }

    fn release_entity(&self, entity_type: &str, entity_id: &str) -> usize {
        self.released
            .lock()
            .unwrap()
            .push(format!("{}:{}", entity_type, entity_id));
        0
    }
}

struct NoopPlugin;

#[async_trait]
impl Plugin for NoopPlugin {
    async fn register(&self, _options: &PluginOptions) -> Result<()> {
        Ok(())
    }
}

struct SlowPlugin;

#[async_trait]
impl Plugin for SlowPlugin {
    async fn register(&self, _options: &PluginOptions) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        Ok(())
    }
}

fn write(path: impl AsRef<Path>, contents: &str) {
    let path = path.as_ref();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

struct Harness {
    root: TempDir,
    host: Arc<TestHost>,
    manager: EntityManager,
}

impl Harness {
    fn new(definition: EntityDefinition, configure: impl FnOnce(&mut RuntimeConfig)) -> Self {
        let root = TempDir::new().unwrap();
        let mut config =
            RuntimeConfig::with_dirs(root.path().join("entities"), root.path().join("resources"));
        configure(&mut config);

        let catalog = Arc::new(Catalog::new());
        catalog.register_plugin("noop", Arc::new(NoopPlugin));
        catalog.register_plugin("slow", Arc::new(SlowPlugin));

        let host = Arc::new(TestHost::default());
        let store = Arc::new(StaticConfigStore::with_definitions([definition]).unwrap());
        let manager = EntityManager::builder(
            config,
            store,
            host.clone(),
            Arc::new(CatalogModuleLoader::new(catalog)),
        )
        .build();

        Self {
            root,
            host,
            manager,
        }
    }

    fn entity(&self, id: &str) -> std::path::PathBuf {
        self.root.path().join("entities/tenant").join(id)
    }
}

fn tenant() -> EntityDefinition {
    EntityDefinition::new("tenant").with_strategy(StrategyConfig::new(StrategyType::Header, 1))
}

#[tokio::test]
async fn test_load_identify_and_resolve() {
    let harness = Harness::new(tenant(), |_| {});
    write(
        harness.root.path().join("resources/services/shared.yaml"),
        "tier: base\n",
    );
    let acme = harness.entity("acme");
    write(acme.join("config/settings.yaml"), "plan: gold\n");
    write(acme.join("services/limits.yaml"), "seats: 5\n");
    write(acme.join("schemas/user.yaml"), "$id: acme-user\ntype: object\n");
    write(acme.join("plugins/audit/index.yaml"), "native: noop\n");
    write(acme.join("routes/index.yaml"), "native: noop\n");
    std::fs::create_dir_all(harness.entity("globex")).unwrap();

    let report = harness.manager.load_all_from_disk().await.unwrap();
    assert_eq!(report.loaded, vec!["tenant:acme", "tenant:globex"]);
    assert!(report.failed.is_empty());
    assert!(harness.manager.is_ready());

    let found = harness
        .manager
        .identify_entities(&RequestInfo::new().with_header("x-tenant-id", "acme"));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "acme");

    let context = harness.manager.get_entity("tenant", "acme").unwrap();
    assert_eq!(context.config["plan"], "gold");
    assert!(context.is_active());
    assert!(context.schemas.contains("acme-user"));
    assert!(context.plugins.contains("audit"));
    assert!(context.routes.contains("/tenants/acme"));
    assert_eq!(context.services["limits"].as_value(), Some(&json!({"seats": 5})));
    assert_eq!(context.services["shared"].as_value(), Some(&json!({"tier": "base"})));

    let registered = harness.host.registered.lock().unwrap().clone();
    assert!(registered.contains(&("audit".to_string(), None)));
    assert!(registered.contains(&("routes".to_string(), Some("/tenants/acme".to_string()))));

    assert_eq!(harness.manager.get_entities_by_type("tenant").len(), 2);
    assert_eq!(
        harness.manager.lifecycle_manager().get_state("tenant", "globex"),
        LifecycleState::Active
    );
}

#[tokio::test]
async fn test_capacity_limit_counts_failure() {
    let harness = Harness::new(tenant().with_max_instances(1), |_| {});
    std::fs::create_dir_all(harness.entity("alpha")).unwrap();
    std::fs::create_dir_all(harness.entity("beta")).unwrap();

    let report = harness.manager.load_all_from_disk().await.unwrap();
    assert_eq!(report.loaded, vec!["tenant:alpha"]);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("Maximum instances"));

    let stats = harness.manager.get_stats();
    assert_eq!(stats.registry.total, 1);
    assert_eq!(stats.registry.history.failed, 1);
    assert_eq!(
        harness.manager.lifecycle_manager().get_state("tenant", "beta"),
        LifecycleState::Error
    );
}

#[tokio::test]
async fn test_reload_at_capacity() {
    let harness = Harness::new(tenant().with_max_instances(1), |_| {});
    write(harness.entity("alpha").join("services/limits.yaml"), "seats: 1\n");
    harness.manager.load_all_from_disk().await.unwrap();

    write(harness.entity("alpha").join("services/limits.yaml"), "seats: 2\n");
    let outcome = harness.manager.reload_entity("tenant", "alpha").await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.state, LifecycleState::Active);

    let context = harness.manager.get_entity("tenant", "alpha").unwrap();
    assert_eq!(context.services["limits"].as_value(), Some(&json!({"seats": 2})));
    assert_eq!(harness.manager.registry().len(), 1);
}

#[tokio::test]
async fn test_inactive_entity_is_skipped() {
    let harness = Harness::new(tenant(), |_| {});
    write(harness.entity("dormant").join("config/status.yaml"), "active: false\n");

    let report = harness.manager.load_all_from_disk().await.unwrap();
    assert!(report.loaded.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert!(harness.manager.get_entity("tenant", "dormant").is_none());
    assert_eq!(
        harness.manager.lifecycle_manager().get_state("tenant", "dormant"),
        LifecycleState::Unloaded
    );
    assert_eq!(harness.manager.get_stats().registry.history.failed, 0);
}

#[tokio::test]
async fn test_unknown_entity_type_fails() {
    let harness = Harness::new(tenant(), |_| {});
    let source = EntitySource::new("store", harness.root.path().join("entities/store/x"));

    let err = harness.manager.load_entity(&source).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(harness.manager.get_stats().registry.history.failed, 1);
}

#[tokio::test]
async fn test_double_load_rejected() {
    let harness = Harness::new(tenant(), |_| {});
    std::fs::create_dir_all(harness.entity("acme")).unwrap();
    let source = EntitySource::new("tenant", harness.entity("acme"));

    assert!(harness.manager.load_entity(&source).await.unwrap().is_some());
    let err = harness.manager.load_entity(&source).await.unwrap_err();
    assert!(matches!(err, Error::Entity { .. }));
    assert_eq!(harness.manager.registry().len(), 1);
}

#[tokio::test]
async fn test_suspend_resume_reload_unload() {
    let harness = Harness::new(tenant(), |_| {});
    let acme = harness.entity("acme");
    write(acme.join("services/limits.yaml"), "seats: 5\n");
    harness.manager.load_all_from_disk().await.unwrap();
    let lifecycle = harness.manager.lifecycle_manager().clone();

    let outcome = harness.manager.suspend_entity("tenant", "acme").await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.state, LifecycleState::Suspended);
    assert!(!harness.manager.get_entity("tenant", "acme").unwrap().is_active());

    // Suspending twice is not a valid transition
    let err = harness.manager.suspend_entity("tenant", "acme").await.unwrap_err();
    assert!(matches!(err, Error::Entity { .. }));

    harness.manager.resume_entity("tenant", "acme").await.unwrap();
    assert!(harness.manager.get_entity("tenant", "acme").unwrap().is_active());
    assert_eq!(lifecycle.get_state("tenant", "acme"), LifecycleState::Active);

    write(acme.join("services/limits.yaml"), "seats: 9\n");
    let outcome = harness.manager.reload_entity("tenant", "acme").await.unwrap();
    assert!(outcome.success);
    let reloaded = harness.manager.get_entity("tenant", "acme").unwrap();
    assert_eq!(reloaded.services["limits"].as_value(), Some(&json!({"seats": 9})));
    assert_eq!(harness.manager.get_stats().registry.history.reloaded, 1);

    assert!(harness.manager.unload_entity("tenant", "acme").await.unwrap());
    assert!(harness.manager.get_entity("tenant", "acme").is_none());
    assert_eq!(*harness.host.released.lock().unwrap(), vec!["tenant:acme"]);
    assert_eq!(lifecycle.get_state("tenant", "acme"), LifecycleState::Unloaded);
    assert!(!lifecycle.can_transition("tenant", "acme", Transition::Unload));
    assert!(harness.manager.unload_entity("tenant", "acme").await.is_err());
}

#[tokio::test]
async fn test_operations_on_missing_entity() {
    let harness = Harness::new(tenant(), |_| {});

    assert!(harness.manager.reload_entity("tenant", "ghost").await.unwrap_err().is_not_found());
    assert!(harness.manager.suspend_entity("tenant", "ghost").await.unwrap_err().is_not_found());
    assert!(harness.manager.resume_entity("tenant", "ghost").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_load_timeout_marks_error() {
    let harness = Harness::new(tenant(), |config| config.load_timeout_secs = Some(1));
    write(harness.entity("sloth").join("routes/index.yaml"), "native: slow\n");

    let report = harness.manager.load_all_from_disk().await.unwrap();
    assert!(report.loaded.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("exceeded"));
    assert_eq!(
        harness.manager.lifecycle_manager().get_state("tenant", "sloth"),
        LifecycleState::Error
    );
    assert!(harness.manager.get_entity("tenant", "sloth").is_none());
}

#[tokio::test]
async fn test_lifecycle_events_and_stats() {
    let harness = Harness::new(tenant(), |_| {});
    std::fs::create_dir_all(harness.entity("acme")).unwrap();
    let mut events = harness.manager.lifecycle_manager().subscribe();

    harness.manager.load_all_from_disk().await.unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.transition, Transition::Load);
    assert_eq!(event.from, LifecycleState::Unloaded);
    assert_eq!(event.to, LifecycleState::Active);

    let stats = serde_json::to_value(harness.manager.get_stats()).unwrap();
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["lifecycle"]["ACTIVE"], 1);
    assert_eq!(stats["by_type"]["tenant"]["active"], 1);
}
