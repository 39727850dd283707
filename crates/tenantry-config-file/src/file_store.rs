//! File-based EntityConfigStore implementation

use futures::stream;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use tenantry_core::{
    EntityConfigStore, EntityDefinition, Error, Result, StaticConfigStore,
    config_store::{ConfigChange, ConfigChangeStream},
    format::parse_structured,
};

/// Top-level key holding entity type definitions
pub const ENTITIES_KEY: &str = "entities";

/// File-based entity configuration store
///
/// Reads entity type definitions from the `entities:` map of a YAML or TOML
/// file. Definitions are held in memory; call [`FileConfigStore::reload`] to
/// pick up edits, typically in response to [`FileConfigStore::watch_changes`].
#[derive(Debug)]
pub struct FileConfigStore {
    /// Path to the configuration file
    config_path: PathBuf,
    /// Currently loaded definitions
    definitions: StaticConfigStore,
    /// Configuration version counter (incremented on each reload)
    version: Arc<AtomicU32>,
}

impl FileConfigStore {
    /// Open and load a configuration file
    ///
    /// # Errors
    /// - `Error::ConfigNotFound` if the file doesn't exist
    /// - `Error::Config` if the file or any definition is invalid
    pub async fn new(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = expand_tilde(config_path.into())?;

        if !config_path.exists() {
            return Err(Error::ConfigNotFound);
        }

        let store = Self {
            config_path,
            definitions: StaticConfigStore::new(),
            version: Arc::new(AtomicU32::new(0)),
        };
        store.reload().await?;

        info!("Initialized FileConfigStore for {:?}", store.config_path);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Current configuration version
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    /// Re-read the file and swap in its definitions
    ///
    /// On error the previously loaded definitions stay in place.
    pub async fn reload(&self) -> Result<u32> {
        let contents = tokio::fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| {
                error!("Failed to read config file: {}", e);
                Error::Io(e)
            })?;

        let definitions = parse_definitions(&self.config_path, &contents)?;
        let count = definitions.len();
        self.definitions.replace_all(definitions);

        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            entity_types = count,
            version, "Loaded entity definitions from {:?}", self.config_path
        );
        Ok(version)
    }

    /// Stream of change notifications for the configuration file
    ///
    /// Must be called from within a tokio runtime. The watcher thread stops
    /// once the returned stream is dropped and the next event fails to send.
    pub fn watch_changes(&self) -> Result<ConfigChangeStream<'static>> {
        let (tx, rx) = mpsc::channel(100);

        let config_path = self.config_path.clone();
        let version = self.version.clone();

        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = match RecommendedWatcher::new(
                move |res: std::result::Result<Event, notify::Error>| {
                    if let Err(e) = notify_tx.send(res) {
                        error!("Failed to send file watch event: {}", e);
                    }
                },
                notify::Config::default(),
            ) {
                Ok(w) => w,
                Err(e) => {
                    error!("Failed to create file watcher: {}", e);
                    return;
                }
            };

            if let Err(e) = watcher.watch(&config_path, RecursiveMode::NonRecursive) {
                error!("Failed to watch config file: {}", e);
                return;
            }

            info!("Watching entity config for changes: {:?}", config_path);

            while let Ok(event_result) = notify_rx.recv() {
                match event_result {
                    Ok(event) => {
                        if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                            let change = ConfigChange {
                                timestamp: chrono::Utc::now(),
                                version: version.load(Ordering::SeqCst),
                            };

                            if tx.blocking_send(Ok(change)).is_err() {
                                debug!("Config change stream closed, stopping watcher");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("File watch error: {}", e);
                        if tx
                            .blocking_send(Err(Error::Internal(format!("File watch error: {}", e))))
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok(Box::pin(stream))
    }
}

impl EntityConfigStore for FileConfigStore {
    fn get_entity_definition(&self, entity_type: &str) -> Option<Arc<EntityDefinition>> {
        self.definitions.get_entity_definition(entity_type)
    }

    fn get_all_entity_types(&self) -> Vec<String> {
        self.definitions.get_all_entity_types()
    }
}

fn expand_tilde(path: PathBuf) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => Ok(dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?
            .join(rest)),
        Err(_) => Ok(path),
    }
}

/// Parse the `entities:` map of a config document
///
/// Each key names an entity type. A definition may omit `type`; if present
/// it must match the key.
pub fn parse_definitions(
    path: &Path,
    contents: &str,
) -> Result<BTreeMap<String, Arc<EntityDefinition>>> {
    let document = parse_structured(path, contents)?;

    let Some(entities) = document.get(ENTITIES_KEY) else {
        warn!("No '{}' section in {:?}", ENTITIES_KEY, path);
        return Ok(BTreeMap::new());
    };

    let entities = entities.as_object().ok_or_else(|| {
        Error::Config(format!("'{}' must be a map of entity types", ENTITIES_KEY))
    })?;

    let mut definitions = BTreeMap::new();
    for (key, raw) in entities {
        let mut definition: EntityDefinition =
            serde_json::from_value(raw.clone()).map_err(|e| {
                Error::Config(format!("Invalid definition for entity type '{}': {}", key, e))
            })?;

        if definition.entity_type.is_empty() {
            definition.entity_type = key.clone();
        } else if definition.entity_type != *key {
            return Err(Error::Config(format!(
                "Entity type '{}' declares mismatched type '{}'",
                key, definition.entity_type
            )));
        }

        definition.validate()?;
        definitions.insert(key.clone(), Arc::new(definition));
    }

    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::Builder;
    use tenantry_core::{MergeStrategy, StrategyType};

    const SAMPLE: &str = r#"
entities:
  tenant:
    priority: 1
    identification:
      - type: subdomain
        priority: 1
      - type: header
        priority: 2
        params:
          header_name: x-tenant
    max_instances: 5
    merge_strategy: override
  region:
    identification:
      - type: query
"#;

    fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let file = Builder::new().suffix(suffix).tempfile().unwrap();
        std::fs::write(file.path(), contents).unwrap();
        file
    }

    #[tokio::test]
    async fn test_file_not_found() {
        let result = FileConfigStore::new("/nonexistent/entities.yaml").await;
        assert!(matches!(result.unwrap_err(), Error::ConfigNotFound));
    }

    #[tokio::test]
    async fn test_read_yaml_definitions() {
        let file = write_config(".yaml", SAMPLE);
        let store = FileConfigStore::new(file.path()).await.unwrap();

        assert_eq!(store.get_all_entity_types(), vec!["region", "tenant"]);
        assert_eq!(store.version(), 1);

        let tenant = store.get_entity_definition("tenant").unwrap();
        assert_eq!(tenant.entity_type, "tenant");
        assert_eq!(tenant.max_instances, 5);
        assert_eq!(tenant.merge_strategy, MergeStrategy::Override);
        assert_eq!(tenant.identification.len(), 2);
        assert_eq!(
            tenant.identification[1].params.header_name.as_deref(),
            Some("x-tenant")
        );

        let region = store.get_entity_definition("region").unwrap();
        assert_eq!(region.identification[0].kind, StrategyType::Query);
        assert_eq!(region.max_instances, 100);
        assert_eq!(region.merge_strategy, MergeStrategy::Extend);
    }

    #[tokio::test]
    async fn test_read_toml_definitions() {
        let file = write_config(
            ".toml",
            r#"
[entities.tenant]
max_instances = 2

[[entities.tenant.identification]]
type = "path"
priority = 1
"#,
        );
        let store = FileConfigStore::new(file.path()).await.unwrap();
        let tenant = store.get_entity_definition("tenant").unwrap();

        assert_eq!(tenant.max_instances, 2);
        assert_eq!(tenant.identification[0].kind, StrategyType::Path);
    }

    #[tokio::test]
    async fn test_reload_picks_up_edits() {
        let file = write_config(".yaml", SAMPLE);
        let store = FileConfigStore::new(file.path()).await.unwrap();
        let before = store.get_entity_definition("tenant").unwrap();

        std::fs::write(
            file.path(),
            "entities:\n  tenant:\n    max_instances: 9\n",
        )
        .unwrap();
        let version = store.reload().await.unwrap();

        assert_eq!(version, 2);
        assert_eq!(store.get_all_entity_types(), vec!["tenant"]);
        let after = store.get_entity_definition("tenant").unwrap();
        assert_eq!(after.max_instances, 9);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous() {
        let file = write_config(".yaml", SAMPLE);
        let store = FileConfigStore::new(file.path()).await.unwrap();

        std::fs::write(file.path(), "entities:\n  tenant:\n    max_instances: 0\n").unwrap();
        assert!(store.reload().await.is_err());

        assert_eq!(store.version(), 1);
        assert_eq!(store.get_entity_definition("tenant").unwrap().max_instances, 5);
    }

    #[test]
    fn test_parse_rejects_mismatched_type() {
        let result = parse_definitions(
            Path::new("entities.yaml"),
            "entities:\n  tenant:\n    type: region\n",
        );
        assert!(matches!(result.unwrap_err(), Error::Config(_)));
    }

    #[test]
    fn test_parse_without_entities_section() {
        let definitions = parse_definitions(Path::new("entities.yaml"), "other: 1\n").unwrap();
        assert!(definitions.is_empty());
    }

    #[test]
    fn test_parse_rejects_invalid_type_name() {
        let result = parse_definitions(Path::new("entities.yaml"), "entities:\n  Bad Name: {}\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_tilde() {
        let plain = expand_tilde(PathBuf::from("/etc/tenantry.yaml")).unwrap();
        assert_eq!(plain, PathBuf::from("/etc/tenantry.yaml"));

        if let Some(home) = dirs::home_dir() {
            let expanded = expand_tilde(PathBuf::from("~/tenantry.yaml")).unwrap();
            assert_eq!(expanded, home.join("tenantry.yaml"));
        }
    }
}
