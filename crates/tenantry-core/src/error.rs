//! Error types for Tenantry Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unsafe input rejected before any state change
    #[error("Validation error: {0}")]
    Validation(String),

    /// Failure scoped to a single entity instance
    #[error("Entity error [{entity_type}:{entity_id}]: {message}")]
    Entity {
        entity_type: String,
        entity_id: String,
        message: String,
    },

    /// Plugin registration failure
    #[error("Plugin error [{plugin}]: {message}")]
    Plugin { plugin: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration not found")]
    ConfigNotFound,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an entity-scoped error
    pub fn entity(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Entity {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            message: message.into(),
        }
    }

    /// Build a plugin error
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Whether this is a "resource absent" failure rather than a broken resource
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::ConfigNotFound)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
