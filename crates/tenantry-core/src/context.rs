//! Runtime context of one loaded entity instance

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::EntityDefinition;
use crate::host::ServiceMap;

/// A loaded entity instance
///
/// Built by the entity factory, filled in by its adapter during resource
/// loading, then owned by the registry behind an `Arc`. Only the `active`
/// flag changes after registration.
pub struct EntityContext {
    pub entity_type: String,
    pub id: String,

    /// Static definition of the entity's type
    pub definition: Arc<EntityDefinition>,

    /// Definition merged with adapter-loaded configuration
    pub config: Value,

    /// Name of the adapter that built this context
    pub adapter: String,

    /// Source directory the entity was loaded from
    pub source_path: PathBuf,

    pub created_at: DateTime<Utc>,

    active: AtomicBool,

    pub services: ServiceMap,
    pub plugins: BTreeSet<String>,
    pub routes: BTreeSet<String>,
    pub schemas: BTreeSet<String>,

    pub metadata: Map<String, Value>,
}

impl EntityContext {
    pub fn new(
        definition: Arc<EntityDefinition>,
        id: impl Into<String>,
        adapter: impl Into<String>,
        source_path: impl Into<PathBuf>,
    ) -> Self {
        let config = serde_json::to_value(definition.as_ref()).unwrap_or(Value::Null);
        Self {
            entity_type: definition.entity_type.clone(),
            id: id.into(),
            definition,
            config,
            adapter: adapter.into(),
            source_path: source_path.into(),
            created_at: Utc::now(),
            active: AtomicBool::new(true),
            services: ServiceMap::new(),
            plugins: BTreeSet::new(),
            routes: BTreeSet::new(),
            schemas: BTreeSet::new(),
            metadata: Map::new(),
        }
    }

    /// Registry key `type:id`
    pub fn key(&self) -> String {
        entity_key(&self.entity_type, &self.id)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Shallow-merge `overlay` keys onto the context config
    pub fn merge_config(&mut self, overlay: &Value) {
        if let (Value::Object(base), Value::Object(overlay)) = (&mut self.config, overlay) {
            for (key, value) in overlay {
                base.insert(key.clone(), value.clone());
            }
        }
    }

    /// Serializable view for admin endpoints
    pub fn summary(&self) -> EntitySummary {
        let mut services: Vec<String> = self.services.keys().cloned().collect();
        services.sort();
        EntitySummary {
            entity_type: self.entity_type.clone(),
            id: self.id.clone(),
            adapter: self.adapter.clone(),
            active: self.is_active(),
            created_at: self.created_at,
            services,
            plugins: self.plugins.iter().cloned().collect(),
            routes: self.routes.iter().cloned().collect(),
            schemas: self.schemas.iter().cloned().collect(),
            metadata: self.metadata.clone(),
        }
    }
}

impl fmt::Debug for EntityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityContext")
            .field("entity_type", &self.entity_type)
            .field("id", &self.id)
            .field("adapter", &self.adapter)
            .field("active", &self.is_active())
            .field("services", &self.services.len())
            .field("plugins", &self.plugins)
            .field("schemas", &self.schemas)
            .finish()
    }
}

/// JSON-friendly snapshot of an [`EntityContext`]
#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: String,
    pub adapter: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub services: Vec<String>,
    pub plugins: Vec<String>,
    pub routes: Vec<String>,
    pub schemas: Vec<String>,
    pub metadata: Map<String, Value>,
}

/// Registry / lifecycle key for an entity instance
pub fn entity_key(entity_type: &str, entity_id: &str) -> String {
    format!("{}:{}", entity_type, entity_id)
}
