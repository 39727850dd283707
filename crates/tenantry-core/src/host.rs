//! Host framework and plugin abstractions
//!
//! The runtime never talks to a concrete web framework. It registers plugins,
//! schemas and decorations through [`HostApp`], and the server crate adapts
//! those calls onto its own router.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::Result;
use crate::context::entity_key;

/// Options handed to a plugin at registration time
#[derive(Clone, Default)]
pub struct PluginOptions {
    /// Route prefix the plugin should mount under
    pub prefix: Option<String>,

    /// Free-form options
    pub values: Map<String, Value>,

    /// Back-reference to the host; stripped before the host sees the options
    pub app: Option<Arc<dyn HostApp>>,
}

impl PluginOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Tag the registration with the entity it is made for
    pub fn with_entity(self, entity_type: &str, entity_id: &str) -> Self {
        self.with_value("entity_type", Value::from(entity_type))
            .with_value("entity_id", Value::from(entity_id))
    }

    /// `type:id` of the owning entity, when tagged
    pub fn entity_key(&self) -> Option<String> {
        let entity_type = self.values.get("entity_type")?.as_str()?;
        let entity_id = self.values.get("entity_id")?.as_str()?;
        Some(entity_key(entity_type, entity_id))
    }

    pub fn with_app(mut self, app: Arc<dyn HostApp>) -> Self {
        self.app = Some(app);
        self
    }

    /// Copy without the host back-reference
    pub fn without_app(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            values: self.values.clone(),
            app: None,
        }
    }
}

impl fmt::Debug for PluginOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginOptions")
            .field("prefix", &self.prefix)
            .field("values", &self.values)
            .field("app", &self.app.as_ref().map(|_| "<host>"))
            .finish()
    }
}

/// A unit of host functionality (routes, hooks, decorations)
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Called by the host once the plugin is accepted
    async fn register(&self, options: &PluginOptions) -> Result<()>;
}

/// Host serving framework collaborator
#[async_trait]
pub trait HostApp: Send + Sync {
    /// Register a plugin under `name`
    async fn register(&self, name: &str, plugin: Arc<dyn Plugin>, options: PluginOptions)
    -> Result<()>;

    /// Register a schema object (identified by its `$id`)
    fn add_schema(&self, schema: &Value) -> Result<()>;

    /// Attach a named value to the host
    fn decorate(&self, name: &str, value: Value) -> Result<()>;

    /// Forget the plugins registered for an entity, returning how many
    fn release_entity(&self, _entity_type: &str, _entity_id: &str) -> usize {
        0
    }
}

/// Type-erased service instance
#[derive(Clone)]
pub struct ServiceHandle {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ServiceHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Wrap a plain data value
    pub fn from_value(value: Value) -> Self {
        Self::new(value)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// The service as plain data, if it is one
    pub fn as_value(&self) -> Option<&Value> {
        self.downcast_ref::<Value>()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether both handles point at the same instance
    pub fn ptr_eq(&self, other: &ServiceHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_value() {
            Some(value) => write!(f, "ServiceHandle({})", value),
            None => write!(f, "ServiceHandle(<{}>)", self.type_name),
        }
    }
}

/// Services keyed by name
pub type ServiceMap = HashMap<String, ServiceHandle>;

/// Dependencies handed to service constructors and factory functions
#[derive(Debug, Clone, Default)]
pub struct ServiceDeps {
    /// Shared database handle, if the host provides one
    pub db: Option<ServiceHandle>,

    /// Entity configuration
    pub config: Value,
}

/// Class-like service export: constructed with `(db, config)`
pub trait ServiceConstructor: Send + Sync {
    fn construct(&self, deps: &ServiceDeps) -> Result<ServiceHandle>;
}

/// Callable service export: invoked with `(db, config)`
pub type ServiceFn = Arc<dyn Fn(&ServiceDeps) -> Result<ServiceHandle> + Send + Sync>;
