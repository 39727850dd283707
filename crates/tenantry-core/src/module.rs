//! Module resolution for resource files
//!
//! A resource file is parsed as structured data. Its exports are either plain
//! values or references to native components registered up front in a
//! [`Catalog`]:
//!
//! ```yaml
//! # services/billing.yaml
//! exports:
//!   billing: { native: "billing-service" }   # constructor from the catalog
//!   limits: { max_seats: 25 }                # plain value
//! ```
//!
//! A document without an `exports` key is a single `default` export.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::format::read_structured;
use crate::host::{Plugin, ServiceConstructor, ServiceFn};
use crate::{Error, Result};

/// Name of the export used when a file has no `exports` table
pub const DEFAULT_EXPORT: &str = "default";

/// One exported item of a module
#[derive(Clone)]
pub enum Export {
    /// Plain data
    Value(Value),
    /// Class-like service, constructed with `(db, config)`
    Constructor(Arc<dyn ServiceConstructor>),
    /// Service factory function, invoked with `(db, config)`
    Function(ServiceFn),
    /// Host plugin
    Plugin(Arc<dyn Plugin>),
}

impl Export {
    pub fn kind(&self) -> &'static str {
        match self {
            Export::Value(_) => "value",
            Export::Constructor(_) => "constructor",
            Export::Function(_) => "function",
            Export::Plugin(_) => "plugin",
        }
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Export::Value(v) => write!(f, "Export::Value({})", v),
            other => write!(f, "Export::{}", other.kind()),
        }
    }
}

/// A loaded resource file
#[derive(Debug, Clone)]
pub struct Module {
    pub path: PathBuf,
    /// Exports in declaration order
    pub exports: Vec<(String, Export)>,
}

impl Module {
    pub fn default_export(&self) -> Option<&Export> {
        self.export(DEFAULT_EXPORT)
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, export)| export)
    }
}

/// Dynamic module resolution collaborator
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<Module>;
}

/// Registry of native components that module files may reference by name
#[derive(Default)]
pub struct Catalog {
    entries: DashMap<String, Export>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_constructor(&self, name: impl Into<String>, ctor: Arc<dyn ServiceConstructor>) {
        self.entries.insert(name.into(), Export::Constructor(ctor));
    }

    pub fn register_function(&self, name: impl Into<String>, func: ServiceFn) {
        self.entries.insert(name.into(), Export::Function(func));
    }

    pub fn register_plugin(&self, name: impl Into<String>, plugin: Arc<dyn Plugin>) {
        self.entries.insert(name.into(), Export::Plugin(plugin));
    }

    pub fn register_value(&self, name: impl Into<String>, value: Value) {
        self.entries.insert(name.into(), Export::Value(value));
    }

    pub fn get(&self, name: &str) -> Option<Export> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// `ModuleLoader` backed by structured files and a [`Catalog`]
#[derive(Debug, Clone)]
pub struct CatalogModuleLoader {
    catalog: Arc<Catalog>,
}

impl CatalogModuleLoader {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    fn resolve(&self, path: &Path, value: Value) -> Result<Export> {
        let native = value
            .as_object()
            .filter(|obj| obj.len() == 1)
            .and_then(|obj| obj.get("native"))
            .and_then(|v| v.as_str());

        match native {
            Some(name) => self.catalog.get(name).ok_or_else(|| {
                Error::NotFound(format!(
                    "Native export '{}' referenced by {} is not registered",
                    name,
                    path.display()
                ))
            }),
            None => Ok(Export::Value(value)),
        }
    }
}

#[async_trait]
impl ModuleLoader for CatalogModuleLoader {
    async fn load(&self, path: &Path) -> Result<Module> {
        let document = read_structured(path).await?;

        let exports = match document {
            Value::Object(obj) if obj.get("exports").is_some_and(|e| e.is_object()) => obj
                .into_iter()
                .filter(|(key, _)| key == "exports")
                .flat_map(|(_, table)| match table {
                    Value::Object(table) => table.into_iter().collect::<Vec<_>>(),
                    _ => Vec::new(),
                })
                .map(|(name, value)| Ok((name, self.resolve(path, value)?)))
                .collect::<Result<Vec<_>>>()?,
            other => vec![(DEFAULT_EXPORT.to_string(), self.resolve(path, other)?)],
        };

        debug!(path = %path.display(), exports = exports.len(), "Loaded module");
        Ok(Module {
            path: path.to_path_buf(),
            exports,
        })
    }
}
