//! In-memory registry of live entity instances

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use tenantry_core::{EntityContext, Error, Result, entity_key};

/// Per-type registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    /// Sum of loaded services across instances
    pub services: usize,
}

/// Monotonic load history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadHistory {
    pub loaded: u64,
    pub failed: u64,
    pub reloaded: u64,
}

/// Aggregate registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub by_type: BTreeMap<String, TypeStats>,
    pub services_loaded: usize,
    pub history: LoadHistory,
}

/// Registry of entity contexts keyed by `type:id`
///
/// Enforces `max_instances` per type. Registration and removal are
/// independent of lifecycle state; callers pair them with lifecycle
/// transitions themselves.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: RwLock<HashMap<String, Arc<EntityContext>>>,
    loaded: AtomicU64,
    failed: AtomicU64,
    reloaded: AtomicU64,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context under its `type:id` key
    ///
    /// The capacity check counts every live instance of the type,
    /// including one already registered under the same key. Use
    /// [`EntityRegistry::replace`] to swap a registered context in place.
    ///
    /// # Errors
    /// `Error::Entity` naming the type, id and limit when the type is full
    pub fn register(&self, context: EntityContext) -> Result<Arc<EntityContext>> {
        let key = context.key();
        let limit = context.definition.max_instances;

        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let count = entities
            .values()
            .filter(|e| e.entity_type == context.entity_type)
            .count();
        if count >= limit {
            return Err(Error::entity(
                &context.entity_type,
                &context.id,
                format!(
                    "Maximum instances ({}) reached for entity type '{}'",
                    limit, context.entity_type
                ),
            ));
        }

        let context = Arc::new(context);
        entities.insert(key.clone(), context.clone());
        drop(entities);

        self.loaded.fetch_add(1, Ordering::Relaxed);
        info!(key = %key, "Registered entity");
        Ok(context)
    }

    /// Swap the context registered under the same key
    ///
    /// Does not add a live instance, so capacity is not checked.
    ///
    /// # Errors
    /// `Error::NotFound` if nothing is registered under the key
    pub fn replace(&self, context: EntityContext) -> Result<Arc<EntityContext>> {
        let key = context.key();
        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(slot) = entities.get_mut(&key) else {
            return Err(Error::NotFound(format!("Entity '{}' not found", key)));
        };
        let context = Arc::new(context);
        *slot = context.clone();
        drop(entities);

        self.loaded.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Replaced registered entity");
        Ok(context)
    }

    /// Remove an entity, returning whether it was registered
    pub fn unregister(&self, entity_type: &str, entity_id: &str) -> bool {
        let removed = self
            .entities
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&entity_key(entity_type, entity_id))
            .is_some();
        if removed {
            info!(entity_type, entity_id, "Unregistered entity");
        }
        removed
    }

    pub fn get(&self, entity_type: &str, entity_id: &str) -> Option<Arc<EntityContext>> {
        self.entities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&entity_key(entity_type, entity_id))
            .cloned()
    }

    /// All instances of one type, ordered by id
    pub fn get_by_type(&self, entity_type: &str) -> Vec<Arc<EntityContext>> {
        let mut found: Vec<Arc<EntityContext>> = self
            .entities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|e| e.entity_type == entity_type)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// All instances ordered by key
    pub fn all(&self) -> Vec<Arc<EntityContext>> {
        let mut all: Vec<Arc<EntityContext>> = self
            .entities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|e| e.key());
        all
    }

    pub fn count_by_type(&self, entity_type: &str) -> usize {
        self.entities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|e| e.entity_type == entity_type)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reload(&self) {
        self.reloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> RegistryStats {
        let entities = self
            .entities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut stats = RegistryStats {
            history: LoadHistory {
                loaded: self.loaded.load(Ordering::Relaxed),
                failed: self.failed.load(Ordering::Relaxed),
                reloaded: self.reloaded.load(Ordering::Relaxed),
            },
            ..RegistryStats::default()
        };

        for entity in entities.values() {
            let active = entity.is_active();
            let services = entity.services.len();
            let by_type = stats.by_type.entry(entity.entity_type.clone()).or_default();

            stats.total += 1;
            by_type.total += 1;
            if active {
                stats.active += 1;
                by_type.active += 1;
            } else {
                stats.inactive += 1;
                by_type.inactive += 1;
            }
            by_type.services += services;
            stats.services_loaded += services;
        }

        stats
    }
}
