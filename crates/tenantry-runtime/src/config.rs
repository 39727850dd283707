//! Runtime settings shared by the loader, hierarchy and manager

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Root of entity sources, laid out as `<entities_dir>/<type>/<id>`
    #[serde(default = "default_entities_dir")]
    pub entities_dir: PathBuf,

    /// Host-wide resource root; parent-type resources live in `<resources_dir>/<type>`
    #[serde(default = "default_resources_dir")]
    pub resources_dir: PathBuf,

    /// Consult global and parent levels when loading resources
    #[serde(default = "default_hierarchical_loading")]
    pub hierarchical_loading: bool,

    /// Per-entity load timeout in seconds; unset means no limit
    #[serde(default)]
    pub load_timeout_secs: Option<u64>,

    /// Skip base-directory confinement for resource paths
    #[serde(default)]
    pub trusted_paths: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            entities_dir: default_entities_dir(),
            resources_dir: default_resources_dir(),
            hierarchical_loading: default_hierarchical_loading(),
            load_timeout_secs: None,
            trusted_paths: false,
        }
    }
}

impl RuntimeConfig {
    pub fn with_dirs(entities_dir: impl Into<PathBuf>, resources_dir: impl Into<PathBuf>) -> Self {
        Self {
            entities_dir: entities_dir.into(),
            resources_dir: resources_dir.into(),
            ..Self::default()
        }
    }

    pub fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout_secs.map(Duration::from_secs)
    }
}

fn default_entities_dir() -> PathBuf {
    PathBuf::from("entities")
}

fn default_resources_dir() -> PathBuf {
    PathBuf::from("resources")
}

fn default_hierarchical_loading() -> bool {
    true
}
