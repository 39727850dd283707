//! Entity source adapters
//!
//! An adapter knows how to read one kind of entity source. The factory
//! probes adapters in order and uses the first whose `can_handle` accepts
//! the source.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use tenantry_core::format::{STRUCTURED_EXTENSIONS, read_structured};
use tenantry_core::{EntityContext, Error, Result};

use crate::hierarchical::{HierarchicalResourceStrategy, ResourceBag};
use crate::loader::ResourceKind;

/// Base name of a packaged entity's manifest
pub const MANIFEST: &str = "package";

#[async_trait]
pub trait EntityAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this adapter can read `source`
    fn can_handle(&self, source: &Path) -> bool;

    /// Entity id when the source does not supply one
    async fn derive_id(&self, source: &Path) -> Result<String> {
        basename(source)
    }

    /// Adapter-level configuration, merged onto the context config
    async fn load_config(
        &self,
        context: &EntityContext,
        strategy: &HierarchicalResourceStrategy,
    ) -> Result<Value>;

    /// Load resources through the hierarchy and record them on the context
    async fn load_resources(
        &self,
        context: &mut EntityContext,
        strategy: &HierarchicalResourceStrategy,
    ) -> ResourceBag {
        let bag = strategy.load_resources(context).await;
        apply_resources(context, &bag);
        bag
    }
}

/// Copy a resource bag's successful parts onto the context
///
/// Failures are kept under `metadata.resource_errors`.
pub fn apply_resources(context: &mut EntityContext, bag: &ResourceBag) {
    if let Ok(schemas) = &bag.schemas {
        context.schemas.extend(schemas.iter().cloned());
    }
    if let Ok(services) = &bag.services {
        context
            .services
            .extend(services.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    if let Ok(plugins) = &bag.plugins {
        context.plugins.extend(plugins.iter().cloned());
    }
    if let Ok(true) = &bag.routes {
        context
            .routes
            .insert(context.definition.route_prefix_for(&context.id));
    }

    let errors = bag.errors();
    if !errors.is_empty() {
        for (kind, message) in &errors {
            warn!(entity = %context.key(), kind = %kind, "Resource load failed: {}", message);
        }
        let errors: Map<String, Value> = errors
            .into_iter()
            .map(|(kind, message)| (kind.to_string(), Value::String(message)))
            .collect();
        context
            .metadata
            .insert("resource_errors".to_string(), Value::Object(errors));
    }
}

/// Whether adapter config marks the entity as not to be loaded
pub fn is_inactive(config: &Value) -> bool {
    ["active", "enabled"]
        .iter()
        .any(|key| config.get(key).and_then(|v| v.as_bool()) == Some(false))
}

fn basename(source: &Path) -> Result<String> {
    source
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| {
            Error::Validation(format!("Cannot derive entity id from {}", source.display()))
        })
}

async fn config_dir(
    context: &EntityContext,
    strategy: &HierarchicalResourceStrategy,
    defaults: Value,
) -> Result<Value> {
    let dir = context.source_path.join(ResourceKind::Config.dir_name());
    strategy
        .loader()
        .load_config(&dir, defaults, strategy.load_options())
        .await
}

/// Plain directory source
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalAdapter;

#[async_trait]
impl EntityAdapter for LocalAdapter {
    fn name(&self) -> &'static str {
        "local"
    }

    fn can_handle(&self, source: &Path) -> bool {
        source.is_dir()
    }

    async fn load_config(
        &self,
        context: &EntityContext,
        strategy: &HierarchicalResourceStrategy,
    ) -> Result<Value> {
        config_dir(context, strategy, Value::Object(Map::new())).await
    }
}

/// Packaged source: a directory with a `package.{json,yaml,yml,toml}` manifest
///
/// The manifest's `name` (scope stripped) is the entity id and its `entity`
/// table seeds the configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct PackageAdapter;

impl PackageAdapter {
    pub fn manifest_path(source: &Path) -> Option<PathBuf> {
        STRUCTURED_EXTENSIONS
            .iter()
            .map(|ext| source.join(format!("{}.{}", MANIFEST, ext)))
            .find(|path| path.is_file())
    }

    async fn manifest(source: &Path) -> Result<Value> {
        let path = Self::manifest_path(source).ok_or_else(|| {
            Error::NotFound(format!("No package manifest in {}", source.display()))
        })?;
        read_structured(&path).await
    }
}

/// `@scope/name` → `name`
fn strip_scope(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[async_trait]
impl EntityAdapter for PackageAdapter {
    fn name(&self) -> &'static str {
        "package"
    }

    fn can_handle(&self, source: &Path) -> bool {
        source.is_dir() && Self::manifest_path(source).is_some()
    }

    async fn derive_id(&self, source: &Path) -> Result<String> {
        let manifest = Self::manifest(source).await?;
        match manifest.get("name").and_then(|v| v.as_str()) {
            Some(name) => Ok(strip_scope(name).to_string()),
            None => {
                debug!(path = %source.display(), "Manifest has no name, using directory name");
                basename(source)
            }
        }
    }

    async fn load_config(
        &self,
        context: &EntityContext,
        strategy: &HierarchicalResourceStrategy,
    ) -> Result<Value> {
        let manifest = Self::manifest(&context.source_path).await?;
        let defaults = match manifest.get("entity") {
            Some(Value::Object(entity)) => Value::Object(entity.clone()),
            Some(_) => {
                return Err(Error::Config(format!(
                    "'entity' in the manifest of {} must be a table",
                    context.source_path.display()
                )));
            }
            None => Value::Object(Map::new()),
        };
        config_dir(context, strategy, defaults).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_is_inactive() {
        assert!(is_inactive(&json!({"active": false})));
        assert!(is_inactive(&json!({"enabled": false})));
        assert!(!is_inactive(&json!({"active": true})));
        assert!(!is_inactive(&json!({})));
        assert!(!is_inactive(&json!({"active": "no"})));
    }

    #[test]
    fn test_strip_scope() {
        assert_eq!(strip_scope("@acme/tenant-blue"), "tenant-blue");
        assert_eq!(strip_scope("plain"), "plain");
    }

    #[tokio::test]
    async fn test_can_handle() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("plain");
        let packaged = dir.path().join("packaged");
        std::fs::create_dir_all(&plain).unwrap();
        write(packaged.join("package.json"), r#"{"name": "@acme/blue"}"#);

        assert!(LocalAdapter.can_handle(&plain));
        assert!(!PackageAdapter.can_handle(&plain));
        assert!(PackageAdapter.can_handle(&packaged));
        assert!(!LocalAdapter.can_handle(&dir.path().join("missing")));
    }

    #[tokio::test]
    async fn test_derive_id() {
        let dir = TempDir::new().unwrap();
        let packaged = dir.path().join("pkg-dir");
        write(packaged.join("package.yaml"), "name: \"@acme/blue\"\n");
        let unnamed = dir.path().join("unnamed");
        write(unnamed.join("package.toml"), "version = \"1\"\n");

        assert_eq!(PackageAdapter.derive_id(&packaged).await.unwrap(), "blue");
        assert_eq!(PackageAdapter.derive_id(&unnamed).await.unwrap(), "unnamed");
        assert_eq!(LocalAdapter.derive_id(&packaged).await.unwrap(), "pkg-dir");
    }
}
