//! Identification across all configured entity types

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;

use tenantry_core::{EntityConfigStore, EntityDefinition, RequestInfo};

use crate::composite::CompositeStrategy;

/// An entity found on one request
#[derive(Debug, Clone, Serialize)]
pub struct IdentifiedEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: String,
    pub priority: u32,
    #[serde(skip)]
    pub definition: Arc<EntityDefinition>,
}

/// Runs composite identification for every enabled entity type
///
/// Composites are built lazily per type and rebuilt when the store hands out
/// a different definition (e.g. after a config reload).
pub struct EntityIdentificationManager {
    config: Arc<dyn EntityConfigStore>,
    composites: DashMap<String, (Arc<EntityDefinition>, Arc<CompositeStrategy>)>,
}

impl EntityIdentificationManager {
    pub fn new(config: Arc<dyn EntityConfigStore>) -> Self {
        Self {
            config,
            composites: DashMap::new(),
        }
    }

    fn composite_for(&self, definition: &Arc<EntityDefinition>) -> Arc<CompositeStrategy> {
        if let Some(entry) = self.composites.get(&definition.entity_type) {
            let (cached_def, composite) = entry.value();
            if Arc::ptr_eq(cached_def, definition) {
                return composite.clone();
            }
        }

        let composite = Arc::new(CompositeStrategy::from_configs(&definition.identification));
        self.composites.insert(
            definition.entity_type.clone(),
            (definition.clone(), composite.clone()),
        );
        composite
    }

    /// Identify entities on a request, sorted by ascending priority
    ///
    /// The first element, if any, is the primary entity.
    pub fn identify_entities(&self, request: &RequestInfo) -> Vec<IdentifiedEntity> {
        let mut found: Vec<IdentifiedEntity> = self
            .config
            .enabled_definitions()
            .into_iter()
            .filter_map(|definition| {
                let composite = self.composite_for(&definition);
                composite
                    .extract_entity_id(request, &definition)
                    .map(|id| IdentifiedEntity {
                        entity_type: definition.entity_type.clone(),
                        id,
                        priority: definition.priority,
                        definition,
                    })
            })
            .collect();

        found.sort_by_key(|e| e.priority);
        trace!(count = found.len(), "Identification complete");
        found
    }

    /// Primary entity only
    pub fn identify_primary(&self, request: &RequestInfo) -> Option<IdentifiedEntity> {
        self.identify_entities(request).into_iter().next()
    }

    /// Drop cached composites so the next request rebuilds them
    pub fn invalidate(&self) {
        self.composites.clear();
    }
}
