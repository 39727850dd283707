//! Path confinement, name validation and access policy checks
//!
//! `SecurityService` is the collaborator every loader goes through before
//! touching the filesystem. `PathSecurity` is the default implementation: it
//! confines paths to a set of base directories unless the caller marks the
//! path as trusted.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::definition::{Authentication, Isolation, SecurityPolicy};
use crate::{Error, Result};

static ENTITY_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").unwrap());

static PLUGIN_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9@][A-Za-z0-9_.@/-]{0,127}$").unwrap());

/// Filesystem and input validation collaborator
pub trait SecurityService: Send + Sync {
    /// Whether `path` exists and is inside the allowed roots (or trusted)
    fn path_exists(&self, path: &Path, allow_trusted: bool) -> bool;

    /// Join `relative` onto `base`, rejecting traversal outside `base`
    fn resolve_path(&self, base: &Path, relative: &str) -> Result<PathBuf>;

    /// Validate an entity id, returning the accepted id
    fn validate_entity_id(&self, entity_id: &str, entity_type: &str) -> Result<String>;

    /// Validate a plugin name, returning the accepted name
    fn validate_plugin_name(&self, name: &str) -> Result<String>;
}

/// Default `SecurityService` confining paths to configured base directories
#[derive(Debug, Clone, Default)]
pub struct PathSecurity {
    /// Allowed roots; empty means no confinement
    base_dirs: Vec<PathBuf>,
}

impl PathSecurity {
    pub fn new(base_dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            base_dirs: base_dirs.into_iter().collect(),
        }
    }

    /// No confinement at all
    pub fn permissive() -> Self {
        Self::default()
    }

    fn is_confined(&self, path: &Path) -> bool {
        if self.base_dirs.is_empty() {
            return true;
        }

        let Ok(canonical) = path.canonicalize() else {
            return false;
        };

        self.base_dirs.iter().any(|base| {
            base.canonicalize()
                .map(|base| canonical.starts_with(base))
                .unwrap_or(false)
        })
    }
}

impl SecurityService for PathSecurity {
    fn path_exists(&self, path: &Path, allow_trusted: bool) -> bool {
        if !path.exists() {
            return false;
        }
        if allow_trusted {
            return true;
        }
        if self.is_confined(path) {
            true
        } else {
            warn!(path = %path.display(), "Path outside allowed base directories");
            false
        }
    }

    fn resolve_path(&self, base: &Path, relative: &str) -> Result<PathBuf> {
        let relative_path = Path::new(relative);
        if relative_path.is_absolute() {
            return Err(Error::Validation(format!(
                "Absolute path not allowed: {}",
                relative
            )));
        }

        let escapes = relative_path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
        if escapes {
            return Err(Error::Validation(format!(
                "Path traversal not allowed: {}",
                relative
            )));
        }

        Ok(base.join(relative_path))
    }

    fn validate_entity_id(&self, entity_id: &str, entity_type: &str) -> Result<String> {
        if entity_id.contains("..") || !ENTITY_ID_REGEX.is_match(entity_id) {
            return Err(Error::Validation(format!(
                "Invalid {} id '{}'",
                entity_type, entity_id
            )));
        }
        Ok(entity_id.to_string())
    }

    fn validate_plugin_name(&self, name: &str) -> Result<String> {
        if name.contains("..") || !PLUGIN_NAME_REGEX.is_match(name) {
            return Err(Error::Validation(format!("Invalid plugin name '{}'", name)));
        }
        Ok(name.to_string())
    }
}

/// Access facts computed by the caller's own authentication layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    pub authenticated: bool,

    /// Entity the authenticated principal is bound to, as `(type, id)`
    pub principal_entity: Option<(String, String)>,
}

impl AccessContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated() -> Self {
        Self {
            authenticated: true,
            principal_entity: None,
        }
    }

    pub fn bound_to(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.principal_entity = Some((entity_type.into(), entity_id.into()));
        self
    }
}

/// Policy violations, kept apart so the host can map them to 401 vs 403
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("Authentication required for entity type '{entity_type}'")]
    Unauthenticated { entity_type: String },

    #[error("Access to '{entity_type}:{entity_id}' violates strict isolation")]
    IsolationViolation {
        entity_type: String,
        entity_id: String,
    },
}

impl SecurityPolicy {
    /// Check caller-computed access facts against this policy
    pub fn check(
        &self,
        access: &AccessContext,
        entity_type: &str,
        entity_id: &str,
    ) -> std::result::Result<(), PolicyViolation> {
        if self.authentication == Authentication::Required && !access.authenticated {
            return Err(PolicyViolation::Unauthenticated {
                entity_type: entity_type.to_string(),
            });
        }

        if self.isolation == Isolation::Strict {
            let matches = access
                .principal_entity
                .as_ref()
                .is_some_and(|(t, id)| t == entity_type && id == entity_id);
            if !matches {
                return Err(PolicyViolation::IsolationViolation {
                    entity_type: entity_type.to_string(),
                    entity_id: entity_id.to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_entity_id() {
        let security = PathSecurity::permissive();
        assert_eq!(
            security.validate_entity_id("tenant-1", "tenant").unwrap(),
            "tenant-1"
        );
        assert!(security.validate_entity_id("../etc", "tenant").is_err());
        assert!(security.validate_entity_id("", "tenant").is_err());
        assert!(security.validate_entity_id("a b", "tenant").is_err());
        assert!(security.validate_entity_id("-lead", "tenant").is_err());
    }

    #[test]
    fn test_validate_plugin_name() {
        let security = PathSecurity::permissive();
        assert!(security.validate_plugin_name("auth").is_ok());
        assert!(security.validate_plugin_name("@scope/db-pool").is_ok());
        assert!(security.validate_plugin_name("../evil").is_err());
        assert!(security.validate_plugin_name("/abs").is_err());
    }

    #[test]
    fn test_resolve_path_rejects_traversal() {
        let security = PathSecurity::permissive();
        let base = Path::new("/srv/entities");

        assert_eq!(
            security.resolve_path(base, "tenant/acme").unwrap(),
            PathBuf::from("/srv/entities/tenant/acme")
        );
        assert!(security.resolve_path(base, "../secrets").is_err());
        assert!(security.resolve_path(base, "/etc/passwd").is_err());
    }

    #[test]
    fn test_path_exists_confinement() {
        let inside = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let security = PathSecurity::new([inside.path().to_path_buf()]);

        assert!(security.path_exists(inside.path(), false));
        assert!(!security.path_exists(outside.path(), false));
        assert!(security.path_exists(outside.path(), true));
        assert!(!security.path_exists(&inside.path().join("missing"), true));
    }

    #[test]
    fn test_policy_required_authentication() {
        let policy = SecurityPolicy {
            authentication: Authentication::Required,
            isolation: Isolation::Loose,
        };

        assert!(matches!(
            policy.check(&AccessContext::anonymous(), "tenant", "a"),
            Err(PolicyViolation::Unauthenticated { .. })
        ));
        assert!(
            policy
                .check(&AccessContext::authenticated(), "tenant", "a")
                .is_ok()
        );
    }

    #[test]
    fn test_policy_strict_isolation() {
        let policy = SecurityPolicy {
            authentication: Authentication::Optional,
            isolation: Isolation::Strict,
        };
        let access = AccessContext::authenticated().bound_to("tenant", "a");

        assert!(policy.check(&access, "tenant", "a").is_ok());
        assert!(matches!(
            policy.check(&access, "tenant", "b"),
            Err(PolicyViolation::IsolationViolation { .. })
        ));
        assert!(
            policy
                .check(&AccessContext::anonymous(), "tenant", "a")
                .is_err()
        );
    }

    #[test]
    fn test_policy_loose_optional_allows_all() {
        let policy = SecurityPolicy::default();
        assert!(
            policy
                .check(&AccessContext::anonymous(), "tenant", "a")
                .is_ok()
        );
    }
}
