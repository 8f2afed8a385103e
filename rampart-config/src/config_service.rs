// ConfigService - pipeline configuration from files and the environment

use crate::{ConfigManager, FileFormat, PipelineSettings, Result};
use rampart_core::PipelineConfig;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use tracing::info;

/// High-level configuration service
#[derive(Clone)]
pub struct ConfigService {
    manager: ConfigManager,
}

impl ConfigService {
    /// Create a new configuration service
    pub fn new() -> Self {
        Self {
            manager: ConfigManager::new(),
        }
    }

    /// Create from an existing manager
    pub fn from_manager(manager: ConfigManager) -> Self {
        Self { manager }
    }

    /// Builder for creating configured service
    pub fn builder() -> ConfigServiceBuilder {
        ConfigServiceBuilder::new()
    }

    /// Get configuration value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.manager.get(key)
    }

    /// Get configuration value with default
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.manager.get_or(key, default)
    }

    /// Check if key exists
    pub fn has(&self, key: &str) -> bool {
        self.manager.has(key)
    }

    /// Validated settings of the loaded tree.
    pub fn pipeline_settings(&self) -> Result<PipelineSettings> {
        self.manager.load_validated()
    }

    /// Core pipeline configuration of the loaded tree.
    pub fn pipeline_config(&self) -> Result<PipelineConfig<String>> {
        let settings = self.pipeline_settings()?;
        info!(name = %settings.name, "Resolved pipeline configuration");
        settings.into_pipeline_config()
    }

    /// Get underlying manager
    pub fn manager(&self) -> &ConfigManager {
        &self.manager
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for ConfigService
///
/// Sources are applied files first, then the environment, so variables
/// override file values.
pub struct ConfigServiceBuilder {
    manager: ConfigManager,
    load_env: bool,
    load_dotenv: bool,
    dotenv_path: Option<String>,
    config_files: Vec<(PathBuf, Option<FileFormat>)>,
}

impl ConfigServiceBuilder {
    pub fn new() -> Self {
        Self {
            manager: ConfigManager::new(),
            load_env: false,
            load_dotenv: false,
            dotenv_path: None,
            config_files: Vec::new(),
        }
    }

    /// Set environment variable prefix
    pub fn with_prefix(mut self, prefix: String) -> Self {
        self.manager = ConfigManager::with_prefix(prefix);
        self
    }

    /// Enable loading from environment variables
    pub fn load_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Enable loading from .env file
    pub fn load_dotenv(mut self, path: Option<String>) -> Self {
        self.load_dotenv = true;
        self.dotenv_path = path;
        self
    }

    /// Add configuration file to load
    pub fn add_file(mut self, path: impl Into<PathBuf>, format: FileFormat) -> Self {
        self.config_files.push((path.into(), Some(format)));
        self
    }

    /// Add a file whose format is detected from its name.
    pub fn add_file_auto(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_files.push((path.into(), None));
        self
    }

    /// Set a value before any source is loaded.
    pub fn set_default<T: serde::Serialize>(self, key: &str, value: T) -> Result<Self> {
        self.manager.set(key, value)?;
        Ok(self)
    }

    /// Build the configuration service
    pub fn build(self) -> Result<ConfigService> {
        for (path, format) in self.config_files {
            match format {
                Some(format) => self.manager.load_file(&path, format)?,
                None => self.manager.load_file_auto(&path)?,
            }
        }

        if self.load_dotenv {
            self.manager.load_dotenv(self.dotenv_path.as_deref())?;
        } else if self.load_env {
            self.manager.load_env()?;
        }

        Ok(ConfigService::from_manager(self.manager))
    }
}

impl Default for ConfigServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
