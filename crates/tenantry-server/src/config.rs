use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tenantry_runtime::RuntimeConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// File holding the `entities:` definitions
    #[serde(default = "default_entities_config")]
    pub entities_config: PathBuf,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Mount the `/admin` JSON API
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            entities_config: default_entities_config(),
            runtime: RuntimeConfig::default(),
            logging: LoggingConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        // Server settings
        if let Ok(val) = std::env::var("TENANTRY_HOST") {
            self.host = val;
        }

        if let Ok(val) = std::env::var("TENANTRY_PORT")
            && let Ok(port) = val.parse::<u16>()
        {
            self.port = port;
        }

        if let Ok(val) = std::env::var("TENANTRY_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = std::env::var("TENANTRY_ENTITIES_CONFIG") {
            self.entities_config = PathBuf::from(val);
        }

        // Runtime settings
        if let Ok(val) = std::env::var("TENANTRY_ENTITIES_DIR") {
            self.runtime.entities_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("TENANTRY_RESOURCES_DIR") {
            self.runtime.resources_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("TENANTRY_HIERARCHICAL") {
            match val.parse::<bool>() {
                Ok(enabled) => self.runtime.hierarchical_loading = enabled,
                Err(_) => eprintln!("Warning: Invalid TENANTRY_HIERARCHICAL '{}', ignoring", val),
            }
        }

        if let Ok(val) = std::env::var("TENANTRY_LOAD_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            self.runtime.load_timeout_secs = Some(secs);
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_entities_config() -> PathBuf {
    PathBuf::from("entities.yaml")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;
    use tempfile::TempDir;

    const ENV_VARS: [&str; 8] = [
        "TENANTRY_HOST",
        "TENANTRY_PORT",
        "TENANTRY_LOG_LEVEL",
        "TENANTRY_ENTITIES_CONFIG",
        "TENANTRY_ENTITIES_DIR",
        "TENANTRY_RESOURCES_DIR",
        "TENANTRY_HIERARCHICAL",
        "TENANTRY_LOAD_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            // SAFETY: tests touching the environment are serialized
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn test_yaml_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.yaml");
        std::fs::write(
            &path,
            "port: 8080\nruntime:\n  entities_dir: /srv/entities\n  load_timeout_secs: 5\n",
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.runtime.entities_dir, PathBuf::from("/srv/entities"));
        assert_eq!(config.runtime.resources_dir, PathBuf::from("resources"));
        assert_eq!(config.runtime.load_timeout(), Some(Duration::from_secs(5)));
        assert!(config.admin.enabled);
    }

    #[test]
    fn test_toml_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            "host = \"0.0.0.0\"\n[runtime]\nhierarchical_loading = false\n[admin]\nenabled = false\n",
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert!(!config.runtime.hierarchical_loading);
        assert!(!config.admin.enabled);
    }

    #[test]
    fn test_invalid_config_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.yaml");
        std::fs::write(&path, "port: not-a-number\n").unwrap();
        assert!(ServerConfig::from_file(&path).is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        // SAFETY: serialized with other env tests
        unsafe {
            std::env::set_var("TENANTRY_PORT", "9090");
            std::env::set_var("TENANTRY_LOG_LEVEL", "debug");
            std::env::set_var("TENANTRY_ENTITIES_DIR", "/data/entities");
            std::env::set_var("TENANTRY_HIERARCHICAL", "false");
            std::env::set_var("TENANTRY_LOAD_TIMEOUT_SECS", "30");
        }

        let mut config = ServerConfig::default();
        config.merge_env();
        clear_env();

        assert_eq!(config.port, 9090);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.runtime.entities_dir, PathBuf::from("/data/entities"));
        assert!(!config.runtime.hierarchical_loading);
        assert_eq!(config.runtime.load_timeout_secs, Some(30));
    }

    #[test]
    #[serial]
    fn test_invalid_env_values_ignored() {
        clear_env();
        // SAFETY: serialized with other env tests
        unsafe {
            std::env::set_var("TENANTRY_PORT", "not-a-port");
            std::env::set_var("TENANTRY_HIERARCHICAL", "maybe");
        }

        let mut config = ServerConfig::default();
        config.merge_env();
        clear_env();

        assert_eq!(config.port, 3000);
        assert!(config.runtime.hierarchical_loading);
    }
}
