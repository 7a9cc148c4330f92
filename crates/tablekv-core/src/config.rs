//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/tablekv/config.toml)
//! 3. Environment variables (TABLEKV_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix
const ENV_PREFIX: &str = "TABLEKV";

/// Settings the key-value container consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicesConfig {
    /// Opaque backend connection string
    pub storage_connection_string: String,
    /// Logical collection name; sanitized into the table name
    pub storage_collection_name: String,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend connection string
    #[serde(default = "default_connection_string")]
    pub storage_connection_string: String,

    /// Logical collection (table) name
    #[serde(default = "default_collection_name")]
    pub storage_collection_name: String,

    /// Log level for tracing output (trace, debug, info, warn, error)
    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_connection_string: default_connection_string(),
            storage_collection_name: default_collection_name(),
            log_level: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (TABLEKV_CONNECTION_STRING, TABLEKV_COLLECTION, TABLEKV_LOG_LEVEL)
    /// 2. Config file (~/.config/tablekv/config.toml or TABLEKV_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // TABLEKV_CONNECTION_STRING
        if let Ok(val) = std::env::var(format!("{}_CONNECTION_STRING", ENV_PREFIX)) {
            self.storage_connection_string = val;
        }

        // TABLEKV_COLLECTION
        if let Ok(val) = std::env::var(format!("{}_COLLECTION", ENV_PREFIX)) {
            self.storage_collection_name = val;
        }

        // TABLEKV_LOG_LEVEL
        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            self.log_level = if val.is_empty() { None } else { Some(val) };
        }
    }

    /// The subset of settings the container needs
    pub fn services(&self) -> ServicesConfig {
        ServicesConfig {
            storage_connection_string: self.storage_connection_string.clone(),
            storage_collection_name: self.storage_collection_name.clone(),
        }
    }

    /// Get the config file path
    ///
    /// Can be overridden with TABLEKV_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tablekv")
            .join("config.toml")
    }
}

fn default_connection_string() -> String {
    format!("DataSource={}", default_database_path().display())
}

/// SQLite file used when no connection string is configured
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tablekv")
        .join("tablekv.db")
}

fn default_collection_name() -> String {
    "keyvalue".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "TABLEKV_CONNECTION_STRING",
        "TABLEKV_COLLECTION",
        "TABLEKV_LOG_LEVEL",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(
            config.storage_connection_string,
            format!("DataSource={}", default_database_path().display())
        );
        assert_eq!(config.storage_collection_name, "keyvalue");
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("TABLEKV_CONNECTION_STRING", "DataSource=/tmp/kv.db");
        env::set_var("TABLEKV_COLLECTION", "pcs-storage");
        env::set_var("TABLEKV_LOG_LEVEL", "debug");
        config.apply_env_overrides();

        assert_eq!(config.storage_connection_string, "DataSource=/tmp/kv.db");
        assert_eq!(config.storage_collection_name, "pcs-storage");
        assert_eq!(config.log_level.as_deref(), Some("debug"));

        // Empty string clears the log level
        env::set_var("TABLEKV_LOG_LEVEL", "");
        config.apply_env_overrides();
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            storage_connection_string = "DataSource=:memory:"
            storage_collection_name = "values"
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.storage_connection_string, "DataSource=:memory:");
        assert_eq!(config.storage_collection_name, "values");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config::load_from_str("log_level = \"warn\"").unwrap();
        assert_eq!(config.storage_connection_string, default_connection_string());
        assert_eq!(config.log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_from_path() {
        let _guard = EnvGuard::new(ENV_VARS);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "storage_collection_name = \"from-file\"\n").unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.storage_collection_name, "from-file");

        env::set_var("TABLEKV_COLLECTION", "from-env");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.storage_collection_name, "from-env");
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config::load_from_path(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.storage_collection_name, "keyvalue");
    }

    #[test]
    fn test_load_from_path_invalid_toml() {
        let _guard = EnvGuard::new(ENV_VARS);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "storage_collection_name = [").unwrap();

        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_default_connection_string_is_persistent() {
        let parsed = crate::backend::ConnectionString::parse(&default_connection_string()).unwrap();
        assert_eq!(
            parsed.backend,
            crate::backend::BackendKind::Sqlite(default_database_path())
        );
    }

    #[test]
    fn test_services_config() {
        let config = Config {
            storage_connection_string: "UseDevelopmentStorage=true".to_string(),
            storage_collection_name: "my-collection_1!".to_string(),
            log_level: None,
        };

        let services = config.services();
        assert_eq!(services.storage_connection_string, "UseDevelopmentStorage=true");
        assert_eq!(services.storage_collection_name, "my-collection_1!");
    }
}
