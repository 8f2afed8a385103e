//! Layered configuration for rampart pipelines.
//!
//! Values are gathered from TOML, JSON and `.env` files and from prefixed
//! environment variables into one tree, then deserialized into
//! [`PipelineSettings`] and converted to a core `PipelineConfig`.
//!
//! ```rust,ignore
//! use rampart_config::{ConfigService, FileFormat};
//!
//! let service = ConfigService::builder()
//!     .add_file("rampart.toml", FileFormat::Toml)
//!     .load_env()
//!     .build()?;
//!
//! let config = service.pipeline_config()?;
//! ```

pub mod config_service;
pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use config_service::{ConfigService, ConfigServiceBuilder};
pub use env::{DEFAULT_PREFIX, EnvLoader};
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use settings::{BackoffKind, PipelineSettings};
pub use validation::{ConfigValidator, Validate};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Shared tree of configuration values.
///
/// Keys are dotted paths: `fallback.timeout` addresses the `timeout` entry
/// of the `fallback` table. Later loads override earlier ones key by key.
#[derive(Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Map<String, Value>>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    /// Create a manager reading `RAMPART_*` variables.
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_PREFIX.to_string())
    }

    /// Create with environment variable prefix
    pub fn with_prefix(prefix: String) -> Self {
        Self {
            config: Arc::new(RwLock::new(Map::new())),
            env_prefix: Some(prefix),
        }
    }

    /// Environment prefix in use.
    pub fn env_prefix(&self) -> Option<&str> {
        self.env_prefix.as_deref()
    }

    /// Load configuration from environment variables
    pub fn load_env(&self) -> Result<()> {
        self.load_vars(std::env::vars());
        Ok(())
    }

    /// Load prefixed `KEY=value` pairs as if they came from the environment.
    pub fn load_vars<I>(&self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env_vars = EnvLoader::new(self.env_prefix.clone()).collect(vars);
        debug!(count = env_vars.len(), prefix = ?self.env_prefix, "Loaded environment configuration");

        let mut config = self.config.write();
        for (key, value) in env_vars {
            insert_path(&mut config, &key, value);
        }
    }

    /// Load a `.env` file into the process environment, then read it.
    ///
    /// Without a path a missing `.env` in the working directory is ignored.
    pub fn load_dotenv(&self, path: Option<&str>) -> Result<()> {
        if let Some(path) = path {
            dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
        } else {
            dotenvy::dotenv().ok();
        }
        self.load_env()
    }

    /// Load configuration from file
    pub fn load_file(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let path = path.as_ref();
        let data = ConfigLoader::new(format).load_file(path)?;
        debug!(path = %path.display(), ?format, "Loaded configuration file");

        if let Value::Object(map) = data {
            let mut config = self.config.write();
            for (key, value) in map {
                merge_value(&mut config, key, value);
            }
        }

        Ok(())
    }

    /// Load a file, detecting the format from its name.
    pub fn load_file_auto(&self, path: impl AsRef<Path>) -> Result<()> {
        let format = FileFormat::from_path(path.as_ref())?;
        self.load_file(path, format)
    }

    /// Set a configuration value
    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;

        insert_path(&mut self.config.write(), key, json_value);
        Ok(())
    }

    /// Get a configuration value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = {
            let config = self.config.read();
            lookup_path(&config, key)
                .cloned()
                .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?
        };

        serde_json::from_value(value).map_err(|e| ConfigError::DeserializationError(e.to_string()))
    }

    /// Get a configuration value with default
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Check if a key exists
    pub fn has(&self, key: &str) -> bool {
        lookup_path(&self.config.read(), key).is_some()
    }

    /// Top-level keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.config.read().keys().cloned().collect()
    }

    /// Merge configuration from another manager; its values win.
    pub fn merge(&self, other: &ConfigManager) -> Result<()> {
        if Arc::ptr_eq(&self.config, &other.config) {
            return Ok(());
        }

        let other_config = other.config.read().clone();
        let mut config = self.config.write();
        for (key, value) in other_config {
            merge_value(&mut config, key, value);
        }

        Ok(())
    }

    /// Load and validate configuration
    pub fn load_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let json_value = Value::Object(self.config.read().clone());

        let validated: T = serde_json::from_value(json_value)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;

        validated.validate()?;

        Ok(validated)
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup_path<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut segments = key.split('.');
    let first = map.get(segments.next()?)?;
    segments.try_fold(first, |value, segment| value.get(segment))
}

fn insert_path(map: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once('.') {
        None => {
            map.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
    }
}

// Tables merge recursively; any other value replaces what was there.
fn merge_value(map: &mut Map<String, Value>, key: String, value: Value) {
    if let Value::Object(incoming) = value {
        if let Some(Value::Object(existing)) = map.get_mut(&key) {
            for (k, v) in incoming {
                merge_value(existing, k, v);
            }
        } else {
            map.insert(key, Value::Object(incoming));
        }
        return;
    }
    map.insert(key, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_set_and_get() {
        let manager = ConfigManager::new();
        manager.set("name", "externalWs").unwrap();

        let value: String = manager.get("name").unwrap();
        assert_eq!(value, "externalWs");
    }

    #[test]
    fn test_get_or_default() {
        let manager = ConfigManager::new();

        let value: u32 = manager.get_or("max_attempts", 3);
        assert_eq!(value, 3);
    }

    #[test]
    fn test_has_key() {
        let manager = ConfigManager::new();
        manager.set("timeout_ms", 250).unwrap();

        assert!(manager.has("timeout_ms"));
        assert!(!manager.has("missing_key"));
    }

    #[test]
    fn test_dotted_keys_nest() {
        let manager = ConfigManager::new();
        manager.set("fallback.timeout", "slow").unwrap();
        manager.set("fallback.bulkhead_full", "busy").unwrap();

        assert_eq!(manager.get::<String>("fallback.timeout").unwrap(), "slow");
        assert_eq!(manager.keys(), vec!["fallback".to_string()]);

        let table: Map<String, Value> = manager.get("fallback").unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_missing_key_error() {
        let manager = ConfigManager::new();
        assert!(matches!(
            manager.get::<String>("nope"),
            Err(ConfigError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_file_then_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "name = \"externalWs\"\nmax_attempts = 2\n\n[fallback]\ntimeout = \"slow\""
        )
        .unwrap();

        let manager = ConfigManager::new();
        manager.load_file_auto(file.path()).unwrap();
        manager.set("fallback.bulkhead_full", "busy").unwrap();

        let settings: PipelineSettings = manager.load_validated().unwrap();
        assert_eq!(settings.name, "externalWs");
        assert_eq!(settings.max_attempts, 2);
        assert_eq!(settings.fallback.len(), 2);
    }

    #[test]
    fn test_merge_overrides_and_keeps_tables() {
        let base = ConfigManager::new();
        base.set("max_attempts", 3).unwrap();
        base.set("fallback.timeout", "slow").unwrap();

        let overrides = ConfigManager::new();
        overrides.set("max_attempts", 5).unwrap();
        overrides.set("fallback.cancelled", "gone").unwrap();

        base.merge(&overrides).unwrap();

        assert_eq!(base.get::<u32>("max_attempts").unwrap(), 5);
        assert!(base.has("fallback.timeout"));
        assert!(base.has("fallback.cancelled"));
    }

    #[test]
    fn test_merge_with_self() {
        let manager = ConfigManager::new();
        manager.set("max_attempts", 3).unwrap();

        manager.merge(&manager.clone()).unwrap();
        assert_eq!(manager.get::<u32>("max_attempts").unwrap(), 3);
    }

    #[test]
    fn test_load_validated_rejects_invalid() {
        let manager = ConfigManager::new();
        manager.set("max_attempts", 0).unwrap();

        assert!(matches!(
            manager.load_validated::<PipelineSettings>(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_numeric_env_values_fill_text_fields() {
        let manager = ConfigManager::new();
        manager.load_vars(vec![
            ("RAMPART_NAME".to_string(), "123".to_string()),
            ("RAMPART_MAX_ATTEMPTS".to_string(), "2".to_string()),
            ("RAMPART_FALLBACK__TIMEOUT".to_string(), "0".to_string()),
            ("RAMPART_FALLBACK__BULKHEAD_FULL".to_string(), "true".to_string()),
        ]);

        let settings: PipelineSettings = manager.load_validated().unwrap();
        assert_eq!(settings.name, "123");
        assert_eq!(settings.max_attempts, 2);
        assert_eq!(settings.fallback["timeout"], "0");
        assert_eq!(settings.fallback["bulkhead_full"], "true");

        let config = settings.into_pipeline_config().unwrap();
        assert_eq!(
            config.fallback.substitutes.get(&rampart_core::FailureKind::Timeout),
            Some(&"0".to_string())
        );
    }
}
