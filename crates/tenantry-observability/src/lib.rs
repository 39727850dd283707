//! Tenantry Observability
//!
//! This crate provides observability features:
//! - Metrics collection (Prometheus)
//! - Health endpoints

pub mod health;
pub mod metrics;

pub use health::{EntityTypeStatus, HealthState, ReadinessChecker, health_router};
pub use metrics::{LoadOutcome, Metrics};
