//! Directory-convention resource loader
//!
//! Loads the four resource kinds from a single directory:
//! - schemas: every structured file's default export with an `$id`
//! - services: every export of every file, constructed with [`ServiceDeps`]
//! - plugins: the default export of an `index.*` file
//! - config: every file shallow-merged onto caller defaults
//!
//! Results are cached per `"<kind>:<path>"` until cleared explicitly.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use tenantry_core::format::{STRUCTURED_EXTENSIONS, is_structured_file};
use tenantry_core::module::DEFAULT_EXPORT;
use tenantry_core::{
    Error, Export, HostApp, ModuleLoader, Plugin, PluginOptions, Result, SecurityService,
    ServiceDeps, ServiceHandle, ServiceMap,
};

/// Base name of a plugin's entry file
pub const PLUGIN_INDEX: &str = "index";

static DB_PLUGIN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(postgres|postgresql|pg|mysql|mariadb|sqlite|mongo|mongodb|redis|db|database|sql)")
        .unwrap()
});

static DB_DIALECT_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(dialect|unknown driver|driver not (found|installed))").unwrap());

static DB_CONNECTION_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(econnrefused|connection refused|could not connect|host not found)").unwrap()
});

static DB_AUTH_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(authentication failed|access denied|password authentication)").unwrap()
});

/// Resource kinds, each with its own directory name and cache prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Schemas,
    Services,
    Plugins,
    Routes,
    Config,
}

impl ResourceKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            ResourceKind::Schemas => "schemas",
            ResourceKind::Services => "services",
            ResourceKind::Plugins => "plugins",
            ResourceKind::Routes => "routes",
            ResourceKind::Config => "config",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Per-call loading options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Skip base-directory confinement for this path
    pub is_trusted_path: bool,
}

impl LoadOptions {
    pub fn trusted() -> Self {
        Self {
            is_trusted_path: true,
        }
    }
}

#[derive(Clone)]
enum Cached {
    Schemas(Arc<Vec<String>>),
    Services(Arc<ServiceMap>),
    Config(Arc<Map<String, Value>>),
    Plugin(Arc<dyn Plugin>),
}

/// Cache key for a resource at `path`
pub fn cache_key(kind: &str, path: &Path) -> String {
    format!("{}:{}", kind, path.display())
}

/// Resource loader with an instance-owned cache
pub struct ResourceLoader {
    security: Arc<dyn SecurityService>,
    modules: Arc<dyn ModuleLoader>,
    host: Arc<dyn HostApp>,
    cache: DashMap<String, Cached>,
}

impl fmt::Debug for ResourceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLoader")
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl ResourceLoader {
    pub fn new(
        security: Arc<dyn SecurityService>,
        modules: Arc<dyn ModuleLoader>,
        host: Arc<dyn HostApp>,
    ) -> Self {
        Self {
            security,
            modules,
            host,
            cache: DashMap::new(),
        }
    }

    pub fn host(&self) -> &Arc<dyn HostApp> {
        &self.host
    }

    pub fn security(&self) -> &Arc<dyn SecurityService> {
        &self.security
    }

    /// Whether `dir` exists and passes confinement
    pub fn dir_exists(&self, dir: &Path, options: LoadOptions) -> bool {
        self.security.path_exists(dir, options.is_trusted_path) && dir.is_dir()
    }

    /// Structured, non-hidden files in `dir`, sorted by name
    async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if !hidden && entry.file_type().await?.is_file() && is_structured_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Register every schema in `dir` with the host, returning their ids
    ///
    /// An absent directory yields an empty list. A path that exists but
    /// cannot be listed is an error.
    pub async fn load_schemas(&self, dir: &Path, options: LoadOptions) -> Result<Arc<Vec<String>>> {
        let key = cache_key(ResourceKind::Schemas.dir_name(), dir);
        if let Some(Cached::Schemas(ids)) = self.cache.get(&key).map(|c| c.clone()) {
            debug!(path = %dir.display(), "Schemas served from cache");
            return Ok(ids);
        }

        if !self.security.path_exists(dir, options.is_trusted_path) {
            return Ok(Arc::new(Vec::new()));
        }

        let mut ids = Vec::new();
        for file in self.list_files(dir).await? {
            let module = match self.modules.load(&file).await {
                Ok(module) => module,
                Err(e) => {
                    warn!(path = %file.display(), "Skipping unreadable schema: {}", e);
                    continue;
                }
            };

            let Some(Export::Value(schema)) = module.default_export() else {
                warn!(path = %file.display(), "Schema file has no default object export");
                continue;
            };

            let Some(id) = schema.get("$id").and_then(|v| v.as_str()) else {
                warn!(path = %file.display(), "Schema without $id, skipping");
                continue;
            };

            match self.host.add_schema(schema) {
                Ok(()) => ids.push(id.to_string()),
                Err(e) => warn!(path = %file.display(), schema_id = id, "Schema rejected: {}", e),
            }
        }

        info!(path = %dir.display(), count = ids.len(), "Loaded schemas");
        let ids = Arc::new(ids);
        self.cache.insert(key, Cached::Schemas(ids.clone()));
        Ok(ids)
    }

    /// Instantiate every service exported from files in `dir`
    ///
    /// A default export is named after its file stem. A service whose
    /// construction fails is logged and left out. An absent directory
    /// yields an empty map; one that cannot be listed is an error.
    pub async fn load_services(
        &self,
        dir: &Path,
        deps: &ServiceDeps,
        options: LoadOptions,
    ) -> Result<Arc<ServiceMap>> {
        let key = cache_key(ResourceKind::Services.dir_name(), dir);
        if let Some(Cached::Services(services)) = self.cache.get(&key).map(|c| c.clone()) {
            debug!(path = %dir.display(), "Services served from cache");
            return Ok(services);
        }

        if !self.security.path_exists(dir, options.is_trusted_path) {
            return Ok(Arc::new(ServiceMap::new()));
        }

        let mut services = ServiceMap::new();
        for file in self.list_files(dir).await? {
            let module = match self.modules.load(&file).await {
                Ok(module) => module,
                Err(e) => {
                    warn!(path = %file.display(), "Skipping unreadable service file: {}", e);
                    continue;
                }
            };

            let stem = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            for (export_name, export) in &module.exports {
                let name = if export_name == DEFAULT_EXPORT {
                    stem.clone()
                } else {
                    export_name.clone()
                };

                let instance = match export {
                    Export::Constructor(ctor) => ctor.construct(deps),
                    Export::Function(func) => func(deps),
                    Export::Value(value) => Ok(ServiceHandle::from_value(value.clone())),
                    Export::Plugin(plugin) => Ok(ServiceHandle::new(plugin.clone())),
                };

                match instance {
                    Ok(handle) => {
                        debug!(service = %name, kind = export.kind(), "Service loaded");
                        services.insert(name, handle);
                    }
                    Err(e) => {
                        warn!(service = %name, path = %file.display(), "Service failed to load: {}", e);
                    }
                }
            }
        }

        info!(path = %dir.display(), count = services.len(), "Loaded services");
        let services = Arc::new(services);
        self.cache.insert(key, Cached::Services(services.clone()));
        Ok(services)
    }

    /// Load the plugin in `dir` and register it with the host
    ///
    /// The plugin is named after the directory. The host app reference in
    /// `plugin_options` is not forwarded to registration.
    ///
    /// # Errors
    /// - `Error::NotFound` if `dir` has no index file
    /// - `Error::Plugin` if the export is not a plugin or registration fails
    pub async fn load_plugin(
        &self,
        dir: &Path,
        plugin_options: &PluginOptions,
        options: LoadOptions,
    ) -> Result<String> {
        let raw_name = dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = self.security.validate_plugin_name(&raw_name)?;

        let index = if self.dir_exists(dir, options) {
            find_index(dir)
        } else {
            None
        };
        let Some(index) = index else {
            return Err(Error::NotFound(format!(
                "Plugin '{}' not found: no {} file in {}",
                name,
                PLUGIN_INDEX,
                dir.display()
            )));
        };

        let plugin = self.resolve_plugin(&name, &index).await?;

        self.host
            .register(&name, plugin, plugin_options.without_app())
            .await
            .map_err(|e| {
                let message = match e {
                    Error::Plugin { message, .. } => message,
                    other => other.to_string(),
                };
                Error::plugin(&name, friendly_plugin_error(&name, &message))
            })?;

        info!(plugin = %name, prefix = ?plugin_options.prefix, "Registered plugin");
        Ok(name)
    }

    async fn resolve_plugin(&self, name: &str, index: &Path) -> Result<Arc<dyn Plugin>> {
        let key = cache_key("plugin", index);
        if let Some(Cached::Plugin(plugin)) = self.cache.get(&key).map(|c| c.clone()) {
            return Ok(plugin);
        }

        let module = self.modules.load(index).await?;
        let plugin = match module.default_export() {
            Some(Export::Plugin(plugin)) => plugin.clone(),
            Some(other) => {
                return Err(Error::plugin(
                    name,
                    format!("Plugin export is not a function (found {})", other.kind()),
                ));
            }
            None => {
                return Err(Error::plugin(
                    name,
                    "Plugin export is not a function (no default export)",
                ));
            }
        };

        self.cache.insert(key, Cached::Plugin(plugin.clone()));
        Ok(plugin)
    }

    /// Shallow-merge every config file in `dir` onto `defaults`
    ///
    /// Files merge in name order, later keys winning. Unparseable files are
    /// skipped.
    pub async fn load_config(&self, dir: &Path, defaults: Value, options: LoadOptions) -> Result<Value> {
        let key = cache_key(ResourceKind::Config.dir_name(), dir);
        let contribution = match self.cache.get(&key).map(|c| c.clone()) {
            Some(Cached::Config(contribution)) => contribution,
            _ => {
                if !self.dir_exists(dir, options) {
                    return Ok(defaults);
                }
                let contribution = Arc::new(self.read_config_dir(dir).await?);
                self.cache.insert(key, Cached::Config(contribution.clone()));
                contribution
            }
        };

        let mut merged = match defaults {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                warn!(path = %dir.display(), "Config defaults are not an object; ignoring {}", other);
                Map::new()
            }
        };
        for (k, v) in contribution.iter() {
            merged.insert(k.clone(), v.clone());
        }
        Ok(Value::Object(merged))
    }

    async fn read_config_dir(&self, dir: &Path) -> Result<Map<String, Value>> {
        let mut merged = Map::new();
        for file in self.list_files(dir).await? {
            let module = match self.modules.load(&file).await {
                Ok(module) => module,
                Err(e) => {
                    warn!(path = %file.display(), "Skipping config file: {}", e);
                    continue;
                }
            };

            for (export_name, export) in module.exports {
                match (export_name.as_str(), export) {
                    (DEFAULT_EXPORT, Export::Value(Value::Object(map))) => merged.extend(map),
                    (DEFAULT_EXPORT, _) => {
                        warn!(path = %file.display(), "Config file is not an object, skipping");
                    }
                    (_, Export::Value(value)) => {
                        merged.insert(export_name, value);
                    }
                    (_, other) => {
                        debug!(path = %file.display(), export = %export_name, kind = other.kind(), "Ignoring non-value config export");
                    }
                }
            }
        }
        Ok(merged)
    }

    /// Drop one cache entry
    pub fn clear_cache(&self, key: &str) -> bool {
        self.cache.remove(key).is_some()
    }

    /// Drop every cache entry whose key starts with `prefix`
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let before = self.cache.len();
        self.cache.retain(|key, _| !key.starts_with(prefix));
        before - self.cache.len()
    }

    /// Drop every cache entry for paths under `root`, whatever the kind
    pub fn clear_path(&self, root: &Path) -> usize {
        let before = self.cache.len();
        self.cache.retain(|key, _| {
            key.split_once(':')
                .is_none_or(|(_, path)| !Path::new(path).starts_with(root))
        });
        let removed = before - self.cache.len();
        debug!(path = %root.display(), removed, "Cleared resource cache");
        removed
    }

    pub fn clear_all(&self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }
}

/// First `index.<ext>` present in `dir`, in extension preference order
pub fn find_index(dir: &Path) -> Option<PathBuf> {
    STRUCTURED_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", PLUGIN_INDEX, ext)))
        .find(|path| path.is_file())
}

/// Friendlier registration errors for database plugins
pub fn friendly_plugin_error(plugin: &str, message: &str) -> String {
    if !DB_PLUGIN_NAME.is_match(plugin) {
        return message.to_string();
    }

    let hint = if DB_DIALECT_ERROR.is_match(message) {
        "database dialect is not supported or its driver is not installed"
    } else if DB_CONNECTION_ERROR.is_match(message) {
        "could not connect to the database; check that it is running and reachable"
    } else if DB_AUTH_ERROR.is_match(message) {
        "database authentication failed; check the configured credentials"
    } else {
        return message.to_string();
    };

    format!("{} ({})", hint, message)
}
