// Configuration file loaders

use crate::env::coerce;
use crate::{ConfigError, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }

    /// Detect the format of `path` from its extension (`.env` files included).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
        let ext = if file_name == ".env" {
            "env"
        } else {
            path.extension().and_then(|s| s.to_str()).ok_or_else(|| {
                ConfigError::LoadError(format!("No file extension found: {}", path.display()))
            })?
        };

        FileFormat::from_extension(ext)
            .ok_or_else(|| ConfigError::LoadError(format!("Unsupported format: {}", ext)))
    }
}

/// Parses a configuration file into a JSON object.
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Auto-detect format from file extension
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        FileFormat::from_path(path).map(Self::new)
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Load configuration from file
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::LoadError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        self.parse(&content)
    }

    /// Parse configuration from string; the top level must be a table.
    pub fn parse(&self, content: &str) -> Result<Value> {
        let value = match self.format {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e)))?,
            FileFormat::Toml => Self::parse_toml(content)?,
            FileFormat::Env => Self::parse_env(content),
        };

        if !value.is_object() {
            return Err(ConfigError::ParseError(
                "Top level of a configuration file must be a table".to_string(),
            ));
        }
        Ok(value)
    }

    fn parse_toml(content: &str) -> Result<Value> {
        let toml_value: toml::Value = toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        serde_json::to_value(toml_value)
            .map_err(|e| ConfigError::ParseError(format!("TOML to JSON conversion error: {}", e)))
    }

    fn parse_env(content: &str) -> Value {
        let map = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                (key.trim().to_lowercase(), coerce(value))
            })
            .collect();

        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_json() {
        let loader = ConfigLoader::new(FileFormat::Json);
        let result = loader.parse(r#"{"max_attempts": 3, "name": "externalWs"}"#).unwrap();

        assert_eq!(result["max_attempts"], 3);
        assert_eq!(result["name"], "externalWs");
    }

    #[test]
    fn test_parse_toml_with_table() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let toml = r#"
            name = "externalWs"
            timeout_ms = 250

            [fallback]
            bulkhead_full = "degraded"
        "#;

        let result = loader.parse(toml).unwrap();
        assert_eq!(result["timeout_ms"], 250);
        assert_eq!(result["fallback"]["bulkhead_full"], "degraded");
    }

    #[test]
    fn test_parse_env_coerces_values() {
        let loader = ConfigLoader::new(FileFormat::Env);
        let env = r#"
            MAX_ATTEMPTS=5
            # Comment
            NAME="external ws"
            AUTOMATIC_TRANSITIONS=false
        "#;

        let result = loader.parse(env).unwrap();
        assert_eq!(result["max_attempts"], 5);
        assert_eq!(result["name"], "external ws");
        assert_eq!(result["automatic_transitions"], false);
    }

    #[test]
    fn test_rejects_non_table() {
        let loader = ConfigLoader::new(FileFormat::Json);
        assert!(matches!(loader.parse("[1, 2, 3]"), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_extension("json"), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_extension("TOML"), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_extension("unknown"), None);

        assert_eq!(FileFormat::from_path("conf/pipeline.toml").unwrap(), FileFormat::Toml);
        assert_eq!(FileFormat::from_path(".env").unwrap(), FileFormat::Env);
        assert!(FileFormat::from_path("Makefile").is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"max_concurrent_calls": 7}}"#).unwrap();

        let loader = ConfigLoader::auto(file.path()).unwrap();
        let result = loader.load_file(file.path()).unwrap();

        assert_eq!(loader.format(), FileFormat::Json);
        assert_eq!(result["max_concurrent_calls"], 7);
    }

    #[test]
    fn test_missing_file() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        assert!(matches!(
            loader.load_file("/nonexistent/rampart.toml"),
            Err(ConfigError::LoadError(_))
        ));
    }
}
