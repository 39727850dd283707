//! Static entity type definitions
//!
//! An [`EntityDefinition`] describes one entity type: how requests are mapped
//! to an entity id, how many instances may be live at once, which resource
//! kinds are loaded and how inherited resources combine with the entity's own.
//!
//! ```yaml
//! tenant:
//!   priority: 10
//!   identification:
//!     - type: subdomain
//!       priority: 1
//!     - type: header
//!       priority: 2
//!       params:
//!         header_name: x-tenant
//!   max_instances: 50
//!   merge_strategy: override
//!   route_prefix: "/tenants/{entityId}"
//!   security:
//!     authentication: required
//!     isolation: strict
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::template::render;
use crate::{Error, Result};

/// Default capacity per entity type
pub const DEFAULT_MAX_INSTANCES: usize = 100;

/// Default priority for entity types and strategies that don't declare one
pub const DEFAULT_PRIORITY: u32 = 100;

static ENTITY_TYPE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_-]{0,63}$").unwrap());

/// Identification strategy kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyType {
    Subdomain,
    Path,
    Header,
    Query,
}

/// Strategy-specific parameters; each strategy reads only its own keys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Regex applied to the hostname (subdomain), first capture group is the id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_pattern: Option<String>,

    /// Path prefix (path), defaults to `/{type}s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,

    /// Segment index after the prefix (path), defaults to 0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_segment: Option<usize>,

    /// Header name (header), defaults to `x-{type}-id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,

    /// Query parameter name (query), defaults to `{type}_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_param: Option<String>,
}

/// One configured identification strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(rename = "type")]
    pub kind: StrategyType,

    /// Lower number is tried first
    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default)]
    pub params: StrategyParams,
}

impl StrategyConfig {
    pub fn new(kind: StrategyType, priority: u32) -> Self {
        Self {
            kind,
            priority,
            params: StrategyParams::default(),
        }
    }

    pub fn with_params(mut self, params: StrategyParams) -> Self {
        self.params = params;
        self
    }
}

/// Per-kind resource loading switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLoading {
    #[serde(default = "default_true")]
    pub schemas: bool,
    #[serde(default = "default_true")]
    pub services: bool,
    #[serde(default = "default_true")]
    pub plugins: bool,
    #[serde(default = "default_true")]
    pub routes: bool,
}

impl Default for ResourceLoading {
    fn default() -> Self {
        Self {
            schemas: true,
            services: true,
            plugins: true,
            routes: true,
        }
    }
}

impl ResourceLoading {
    /// All resource kinds disabled
    pub fn none() -> Self {
        Self {
            schemas: false,
            services: false,
            plugins: false,
            routes: false,
        }
    }
}

/// How an entity's own services combine with inherited ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Inherited levels are loaded, but only the entity level is kept
    Override,
    /// Union of all levels, entity values win on name clashes
    #[default]
    Extend,
    /// Only the entity level is ever consulted
    Isolate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Authentication {
    Required,
    #[default]
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    Strict,
    #[default]
    Loose,
}

/// Caller-declared access policy for an entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecurityPolicy {
    #[serde(default)]
    pub authentication: Authentication,
    #[serde(default)]
    pub isolation: Isolation,
}

/// Static definition of an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    /// Entity type name; filled from the map key when loaded from a config file
    #[serde(default, rename = "type")]
    pub entity_type: String,

    /// Ordering among entity types identified on the same request (lower = primary)
    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default)]
    pub identification: Vec<StrategyConfig>,

    #[serde(default = "default_max_instances")]
    pub max_instances: usize,

    #[serde(default)]
    pub resource_loading: ResourceLoading,

    #[serde(default)]
    pub merge_strategy: MergeStrategy,

    /// Route prefix template, may contain `{entityId}` and `{type}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_prefix: Option<String>,

    /// Parent entity type whose resources are inherited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub security: SecurityPolicy,
}

impl EntityDefinition {
    /// Definition with every field at its default
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            priority: DEFAULT_PRIORITY,
            identification: Vec::new(),
            max_instances: DEFAULT_MAX_INSTANCES,
            resource_loading: ResourceLoading::default(),
            merge_strategy: MergeStrategy::default(),
            route_prefix: None,
            parent: None,
            enabled: true,
            security: SecurityPolicy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.identification.push(strategy);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn with_merge_strategy(mut self, merge_strategy: MergeStrategy) -> Self {
        self.merge_strategy = merge_strategy;
        self
    }

    pub fn with_resource_loading(mut self, resource_loading: ResourceLoading) -> Self {
        self.resource_loading = resource_loading;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_route_prefix(mut self, route_prefix: impl Into<String>) -> Self {
        self.route_prefix = Some(route_prefix.into());
        self
    }

    pub fn with_security(mut self, security: SecurityPolicy) -> Self {
        self.security = security;
        self
    }

    /// Route prefix for one instance, `{entityId}` substituted
    ///
    /// Falls back to `/{type}s/{entityId}` when no template is configured.
    pub fn route_prefix_for(&self, entity_id: &str) -> String {
        let template = self
            .route_prefix
            .clone()
            .unwrap_or_else(|| "/{type}s/{entityId}".to_string());

        let vars = HashMap::from([
            ("entityId", entity_id),
            ("type", self.entity_type.as_str()),
        ]);
        render(&template, &vars)
    }

    /// Validate the definition
    pub fn validate(&self) -> Result<()> {
        if !ENTITY_TYPE_REGEX.is_match(&self.entity_type) {
            return Err(Error::Config(format!(
                "Invalid entity type name '{}'",
                self.entity_type
            )));
        }

        if self.max_instances == 0 {
            return Err(Error::Config(format!(
                "Entity type '{}': max_instances must be greater than 0",
                self.entity_type
            )));
        }

        if self.parent.as_deref() == Some(self.entity_type.as_str()) {
            return Err(Error::Config(format!(
                "Entity type '{}' cannot be its own parent",
                self.entity_type
            )));
        }

        Ok(())
    }
}

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

fn default_max_instances() -> usize {
    DEFAULT_MAX_INSTANCES
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let def: EntityDefinition = serde_yaml::from_str("type: tenant\n").unwrap();

        assert_eq!(def.entity_type, "tenant");
        assert_eq!(def.max_instances, 100);
        assert_eq!(def.merge_strategy, MergeStrategy::Extend);
        assert!(def.enabled);
        assert!(def.resource_loading.schemas && def.resource_loading.routes);
        assert_eq!(def.security.authentication, Authentication::Optional);
        assert_eq!(def.security.isolation, Isolation::Loose);
    }

    #[test]
    fn test_strategy_config_yaml() {
        let yaml = r#"
type: product
identification:
  - type: header
    priority: 2
    params:
      header_name: x-product
  - type: subdomain
    priority: 1
"#;
        let def: EntityDefinition = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(def.identification.len(), 2);
        assert_eq!(def.identification[0].kind, StrategyType::Header);
        assert_eq!(
            def.identification[0].params.header_name.as_deref(),
            Some("x-product")
        );
        assert_eq!(def.identification[1].priority, 1);
    }

    #[test]
    fn test_route_prefix_default() {
        let def = EntityDefinition::new("tenant");
        assert_eq!(def.route_prefix_for("acme"), "/tenants/acme");
    }

    #[test]
    fn test_route_prefix_template() {
        let def = EntityDefinition::new("tenant").with_route_prefix("/t/{entityId}/api");
        assert_eq!(def.route_prefix_for("acme"), "/t/acme/api");
    }

    #[test]
    fn test_validate() {
        assert!(EntityDefinition::new("tenant").validate().is_ok());
        assert!(EntityDefinition::new("Bad Name").validate().is_err());
        assert!(
            EntityDefinition::new("tenant")
                .with_max_instances(0)
                .validate()
                .is_err()
        );
        assert!(
            EntityDefinition::new("tenant")
                .with_parent("tenant")
                .validate()
                .is_err()
        );
    }
}
