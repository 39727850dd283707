//! `HostApp` backed by the axum server
//!
//! Plugins cannot mount routers into a running axum service, so the host
//! records what each plugin registered (name, prefix, options) and exposes
//! it through the admin API.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use tenantry_core::{Error, HostApp, Plugin, PluginOptions, Result, entity_key};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisteredPlugin {
    pub name: String,
    /// `type:id` of the entity the plugin was registered for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub options: Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct AxumHost {
    plugins: RwLock<Vec<RegisteredPlugin>>,
    schemas: RwLock<BTreeMap<String, Value>>,
    decorations: RwLock<BTreeMap<String, Value>>,
}

/// Snapshot served by `GET /admin/host`
#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    pub plugins: Vec<RegisteredPlugin>,
    pub schemas: Vec<String>,
    pub decorations: Vec<String>,
}

impl AxumHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plugins(&self) -> Vec<RegisteredPlugin> {
        self.plugins
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn schema(&self, id: &str) -> Option<Value> {
        self.schemas
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }

    pub fn snapshot(&self) -> HostSnapshot {
        HostSnapshot {
            plugins: self.plugins(),
            schemas: self
                .schemas
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .keys()
                .cloned()
                .collect(),
            decorations: self
                .decorations
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .keys()
                .cloned()
                .collect(),
        }
    }
}

#[async_trait]
impl HostApp for AxumHost {
    async fn register(
        &self,
        name: &str,
        plugin: Arc<dyn Plugin>,
        options: PluginOptions,
    ) -> Result<()> {
        plugin.register(&options).await?;

        let record = RegisteredPlugin {
            name: name.to_string(),
            entity: options.entity_key(),
            prefix: options.prefix,
            options: options.values,
        };

        // One record per (name, entity, prefix); re-registration replaces it
        let mut plugins = self
            .plugins
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match plugins.iter_mut().find(|p| {
            p.name == record.name && p.entity == record.entity && p.prefix == record.prefix
        }) {
            Some(existing) => {
                debug!(plugin = name, prefix = ?record.prefix, "Plugin re-registered");
                *existing = record;
            }
            None => {
                info!(plugin = name, prefix = ?record.prefix, "Plugin registered");
                plugins.push(record);
            }
        }
        Ok(())
    }

    /// Register a schema by `$id`; re-adding an identical schema is a no-op
    fn add_schema(&self, schema: &Value) -> Result<()> {
        let id = schema
            .get("$id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation("Schema has no $id".to_string()))?;

        let mut schemas = self
            .schemas
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match schemas.get(id) {
            Some(existing) if existing == schema => {
                debug!(schema = id, "Schema already registered");
                Ok(())
            }
            Some(_) => Err(Error::Validation(format!(
                "A different schema with $id '{}' is already registered",
                id
            ))),
            None => {
                schemas.insert(id.to_string(), schema.clone());
                Ok(())
            }
        }
    }

    fn release_entity(&self, entity_type: &str, entity_id: &str) -> usize {
        let key = entity_key(entity_type, entity_id);
        let mut plugins = self
            .plugins
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = plugins.len();
        plugins.retain(|p| p.entity.as_deref() != Some(key.as_str()));
        let released = before - plugins.len();
        if released > 0 {
            info!(entity = %key, released, "Released entity plugins");
        }
        released
    }

    fn decorate(&self, name: &str, value: Value) -> Result<()> {
        let mut decorations = self
            .decorations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if decorations.contains_key(name) {
            return Err(Error::Validation(format!(
                "Decoration '{}' is already set",
                name
            )));
        }
        decorations.insert(name.to_string(), value);
        Ok(())
    }
}
