//! Entity identification strategies
//!
//! Each strategy maps an inbound request to a candidate entity id for one
//! entity type, or `None` when the request carries no id for it.
//!
//! ## Strategies
//!
//! ### Subdomain
//! Applies `extract_pattern` (default `^([^.]+)\.`) to the hostname and
//! returns the first capture group.
//!
//! ```rust
//! use tenantry_core::{EntityDefinition, RequestInfo, StrategyParams};
//! use tenantry_identify::{IdentificationStrategy, SubdomainStrategy};
//!
//! let strategy = SubdomainStrategy::from_params(&StrategyParams::default());
//! let tenant = EntityDefinition::new("tenant");
//!
//! let req = RequestInfo::new().with_hostname("tenant1.example.com");
//! assert_eq!(strategy.extract_entity_id(&req, &tenant).unwrap().as_deref(), Some("tenant1"));
//!
//! let req = RequestInfo::new().with_hostname("localhost");
//! assert_eq!(strategy.extract_entity_id(&req, &tenant).unwrap(), None);
//! ```
//!
//! ### Path
//! Strips `path_prefix` (default `/{type}s`) and returns segment `path_segment`.
//!
//! ### Header
//! Case-insensitive lookup of `header_name` (default `x-{type}-id`).
//!
//! ### Query
//! Lookup of `query_param` (default `{type}_id`).
//!
//! Strategies never mutate the request. A subdomain strategy compiles its
//! pattern once, on first use.

use once_cell::sync::OnceCell;
use regex::Regex;
use std::fmt;

use tenantry_core::{EntityDefinition, RequestInfo, StrategyConfig, StrategyParams, StrategyType};

/// Default hostname pattern: everything before the first dot
pub const DEFAULT_SUBDOMAIN_PATTERN: &str = r"^([^.]+)\.";

/// Identification-related errors
#[derive(Debug, thiserror::Error)]
pub enum IdentifyError {
    #[error("Invalid extract pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Request has no headers object")]
    MissingHeaders,
}

/// A single identification algorithm
pub trait IdentificationStrategy: Send + Sync + fmt::Debug {
    /// Strategy kind, for logging
    fn kind(&self) -> StrategyType;

    /// Extract an entity id for `definition`'s type from `request`
    fn extract_entity_id(
        &self,
        request: &RequestInfo,
        definition: &EntityDefinition,
    ) -> Result<Option<String>, IdentifyError>;
}

/// Build a concrete strategy from its configuration
pub fn build_strategy(config: &StrategyConfig) -> Box<dyn IdentificationStrategy> {
    match config.kind {
        StrategyType::Subdomain => Box::new(SubdomainStrategy::from_params(&config.params)),
        StrategyType::Path => Box::new(PathStrategy::from_params(&config.params)),
        StrategyType::Header => Box::new(HeaderStrategy::from_params(&config.params)),
        StrategyType::Query => Box::new(QueryStrategy::from_params(&config.params)),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(|v| v.to_string())
}

/// Hostname-based identification
pub struct SubdomainStrategy {
    extract_pattern: String,
    compiled: OnceCell<Result<Regex, regex::Error>>,
}

impl SubdomainStrategy {
    pub fn from_params(params: &StrategyParams) -> Self {
        Self {
            extract_pattern: params
                .extract_pattern
                .clone()
                .unwrap_or_else(|| DEFAULT_SUBDOMAIN_PATTERN.to_string()),
            compiled: OnceCell::new(),
        }
    }

    fn regex(&self) -> Result<&Regex, IdentifyError> {
        self.compiled
            .get_or_init(|| Regex::new(&self.extract_pattern))
            .as_ref()
            .map_err(|source| IdentifyError::InvalidPattern {
                pattern: self.extract_pattern.clone(),
                source: source.clone(),
            })
    }
}

impl fmt::Debug for SubdomainStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubdomainStrategy")
            .field("extract_pattern", &self.extract_pattern)
            .finish()
    }
}

impl IdentificationStrategy for SubdomainStrategy {
    fn kind(&self) -> StrategyType {
        StrategyType::Subdomain
    }

    fn extract_entity_id(
        &self,
        request: &RequestInfo,
        _definition: &EntityDefinition,
    ) -> Result<Option<String>, IdentifyError> {
        let Some(hostname) = request.hostname.as_deref() else {
            return Ok(None);
        };

        // An invalid pattern is a configuration error and surfaces even for
        // hostnames that could never match.
        let regex = self.regex()?;

        if !hostname.contains('.') {
            return Ok(None);
        }

        Ok(regex
            .captures(hostname)
            .and_then(|caps| caps.get(1))
            .and_then(|m| non_empty(Some(m.as_str()))))
    }
}

/// Path-segment identification
#[derive(Debug, Clone)]
pub struct PathStrategy {
    path_prefix: Option<String>,
    path_segment: usize,
}

impl PathStrategy {
    pub fn from_params(params: &StrategyParams) -> Self {
        Self {
            path_prefix: params.path_prefix.clone(),
            path_segment: params.path_segment.unwrap_or(0),
        }
    }

    fn prefix_for(&self, definition: &EntityDefinition) -> String {
        self.path_prefix
            .clone()
            .unwrap_or_else(|| format!("/{}s", definition.entity_type))
    }
}

impl IdentificationStrategy for PathStrategy {
    fn kind(&self) -> StrategyType {
        StrategyType::Path
    }

    fn extract_entity_id(
        &self,
        request: &RequestInfo,
        definition: &EntityDefinition,
    ) -> Result<Option<String>, IdentifyError> {
        let Some(path) = request.path() else {
            return Ok(None);
        };

        let prefix = self.prefix_for(definition);
        let Some(rest) = path.strip_prefix(prefix.as_str()) else {
            return Ok(None);
        };

        Ok(rest
            .split('/')
            .filter(|segment| !segment.is_empty())
            .nth(self.path_segment)
            .map(|segment| segment.to_string()))
    }
}

/// Header identification
#[derive(Debug, Clone)]
pub struct HeaderStrategy {
    header_name: Option<String>,
}

impl HeaderStrategy {
    pub fn from_params(params: &StrategyParams) -> Self {
        Self {
            header_name: params.header_name.clone(),
        }
    }
}

impl IdentificationStrategy for HeaderStrategy {
    fn kind(&self) -> StrategyType {
        StrategyType::Header
    }

    fn extract_entity_id(
        &self,
        request: &RequestInfo,
        definition: &EntityDefinition,
    ) -> Result<Option<String>, IdentifyError> {
        let name = self
            .header_name
            .clone()
            .unwrap_or_else(|| format!("x-{}-id", definition.entity_type));

        let value = request.header(&name).ok_or(IdentifyError::MissingHeaders)?;
        Ok(non_empty(value))
    }
}

/// Query parameter identification
#[derive(Debug, Clone)]
pub struct QueryStrategy {
    query_param: Option<String>,
}

impl QueryStrategy {
    pub fn from_params(params: &StrategyParams) -> Self {
        Self {
            query_param: params.query_param.clone(),
        }
    }
}

impl IdentificationStrategy for QueryStrategy {
    fn kind(&self) -> StrategyType {
        StrategyType::Query
    }

    fn extract_entity_id(
        &self,
        request: &RequestInfo,
        definition: &EntityDefinition,
    ) -> Result<Option<String>, IdentifyError> {
        let name = self
            .query_param
            .clone()
            .unwrap_or_else(|| format!("{}_id", definition.entity_type));

        Ok(non_empty(request.query_param(&name)))
    }
}
