//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for Tenantry:
//! - Identification outcomes per entity type
//! - Entity load outcomes and durations
//! - Lifecycle transition counts
//! - Registered entity gauges
//! - Config reloads

use prometheus::{
    CounterVec, GaugeVec, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
};
use std::fmt;
use std::sync::Arc;

/// Metrics collector for Tenantry
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Identification attempts by entity type and outcome (hit, miss)
    pub identifications_total: CounterVec,

    /// Entity loads by entity type and outcome (loaded, failed, skipped)
    pub entity_loads_total: CounterVec,

    /// Entity load duration
    pub entity_load_duration_seconds: HistogramVec,

    /// Lifecycle transitions by transition name and outcome (success, failure, rejected)
    pub lifecycle_transitions_total: CounterVec,

    /// Currently registered entities per type
    pub entities_registered: GaugeVec,

    /// Entity configuration reloads
    pub config_reloads_total: IntCounter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let identifications_total = CounterVec::new(
            Opts::new(
                "tenantry_identifications_total",
                "Total number of entity identification attempts",
            ),
            &["entity_type", "outcome"],
        )?;

        let entity_loads_total = CounterVec::new(
            Opts::new("tenantry_entity_loads_total", "Total number of entity loads"),
            &["entity_type", "outcome"],
        )?;

        let entity_load_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tenantry_entity_load_duration_seconds",
                "Entity load duration in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["entity_type"],
        )?;

        let lifecycle_transitions_total = CounterVec::new(
            Opts::new(
                "tenantry_lifecycle_transitions_total",
                "Total number of lifecycle transitions",
            ),
            &["transition", "outcome"],
        )?;

        let entities_registered = GaugeVec::new(
            Opts::new(
                "tenantry_entities_registered",
                "Number of registered entities per type",
            ),
            &["entity_type"],
        )?;

        let config_reloads_total = IntCounter::new(
            "tenantry_config_reloads_total",
            "Total number of entity configuration reloads",
        )?;

        registry.register(Box::new(identifications_total.clone()))?;
        registry.register(Box::new(entity_loads_total.clone()))?;
        registry.register(Box::new(entity_load_duration_seconds.clone()))?;
        registry.register(Box::new(lifecycle_transitions_total.clone()))?;
        registry.register(Box::new(entities_registered.clone()))?;
        registry.register(Box::new(config_reloads_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            identifications_total,
            entity_loads_total,
            entity_load_duration_seconds,
            lifecycle_transitions_total,
            entities_registered,
            config_reloads_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record an identification attempt for an entity type
    pub fn record_identification(&self, entity_type: &str, hit: bool) {
        let outcome = if hit { "hit" } else { "miss" };
        self.identifications_total
            .with_label_values(&[entity_type, outcome])
            .inc();
    }

    /// Record an entity load
    pub fn record_entity_load(&self, entity_type: &str, outcome: LoadOutcome, duration_secs: f64) {
        self.entity_loads_total
            .with_label_values(&[entity_type, outcome.as_str()])
            .inc();
        self.entity_load_duration_seconds
            .with_label_values(&[entity_type])
            .observe(duration_secs);
    }

    /// Record a lifecycle transition
    pub fn record_transition(&self, transition: &str, outcome: &str) {
        self.lifecycle_transitions_total
            .with_label_values(&[transition, outcome])
            .inc();
    }

    /// Update the registered entity gauge for a type
    pub fn set_registered(&self, entity_type: &str, count: usize) {
        self.entities_registered
            .with_label_values(&[entity_type])
            .set(count as f64);
    }

    pub fn record_config_reload(&self) {
        self.config_reloads_total.inc();
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("families", &self.registry.gather().len())
            .finish_non_exhaustive()
    }
}

/// Outcome label for entity loads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Failed,
    Skipped,
}

impl LoadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadOutcome::Loaded => "loaded",
            LoadOutcome::Failed => "failed",
            LoadOutcome::Skipped => "skipped",
        }
    }
}
