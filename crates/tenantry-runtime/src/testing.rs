//! Shared fixtures for unit tests

use async_trait::async_trait;
use mockall::mock;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tenantry_core::{
    Catalog, CatalogModuleLoader, Error, HostApp, PathSecurity, Plugin, PluginOptions, Result,
    ServiceDeps, ServiceHandle,
};

use crate::loader::ResourceLoader;

mock! {
    pub Host {}

    #[async_trait]
    impl HostApp for Host {
        async fn register(
            &self,
            name: &str,
            plugin: Arc<dyn Plugin>,
            options: PluginOptions,
        ) -> Result<()>;
        fn add_schema(&self, schema: &Value) -> Result<()>;
        fn decorate(&self, name: &str, value: Value) -> Result<()>;
        fn release_entity(&self, entity_type: &str, entity_id: &str) -> usize;
    }
}

/// Host that records what it was asked to register
#[derive(Default)]
pub struct RecordingHost {
    pub plugins: Mutex<Vec<(String, PluginOptions)>>,
    pub schemas: Mutex<Vec<Value>>,
    /// Error message returned by every plugin registration
    pub fail_register: Option<String>,
}

#[async_trait]
impl HostApp for RecordingHost {
    async fn register(
        &self,
        name: &str,
        plugin: Arc<dyn Plugin>,
        options: PluginOptions,
    ) -> Result<()> {
        if let Some(message) = &self.fail_register {
            return Err(Error::Internal(message.clone()));
        }
        plugin.register(&options).await?;
        self.plugins
            .lock()
            .unwrap()
            .push((name.to_string(), options));
        Ok(())
    }

    fn add_schema(&self, schema: &Value) -> Result<()> {
        self.schemas.lock().unwrap().push(schema.clone());
        Ok(())
    }

    fn decorate(&self, _name: &str, _value: Value) -> Result<()> {
        Ok(())
    }
}

impl RecordingHost {
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

pub struct NoopPlugin;

#[async_trait]
impl Plugin for NoopPlugin {
    async fn register(&self, _options: &PluginOptions) -> Result<()> {
        Ok(())
    }
}

/// Catalog with a few native components used across tests
pub fn catalog() -> Arc<Catalog> {
    let catalog = Arc::new(Catalog::new());
    catalog.register_plugin("noop", Arc::new(NoopPlugin));
    catalog.register_function(
        "echo-config",
        Arc::new(|deps: &ServiceDeps| Ok(ServiceHandle::from_value(deps.config.clone()))),
    );
    catalog.register_function(
        "broken",
        Arc::new(|_deps: &ServiceDeps| Err(Error::Internal("constructor exploded".into()))),
    );
    catalog
}

pub fn loader(host: Arc<dyn HostApp>) -> ResourceLoader {
    ResourceLoader::new(
        Arc::new(PathSecurity::permissive()),
        Arc::new(CatalogModuleLoader::new(catalog())),
        host,
    )
}

pub fn write(path: impl AsRef<Path>, contents: &str) {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}
