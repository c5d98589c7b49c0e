//! Configuration Loader
//!
//! Environment-aware configuration loading built on the `config` crate.
//! Sources are layered lowest to highest priority:
//!
//! 1. `ConveyorConfig::default()`
//! 2. `<config_dir>/conveyor.toml` (optional)
//! 3. `<config_dir>/conveyor.<environment>.toml` (optional)
//! 4. `CONVEYOR__<SECTION>__<FIELD>` environment variables

use super::error::{ConfigResult, ConfigurationError};
use super::ConveyorConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: ConveyorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let explicit = config_dir.is_some();
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        if explicit && !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound {
                path: config_directory,
            });
        }

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            config_dir = %config_directory.display(),
            max_concurrent_jobs = config.batch.max_concurrent_jobs,
            pool_size = config.supervisor.pool_size,
            "⚙️ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &ConveyorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Get current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("CONVEYOR_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("CONVEYOR_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<ConveyorConfig> {
        let defaults = Config::try_from(&ConveyorConfig::default())
            .map_err(|e| ConfigurationError::build_error("defaults", e))?;

        let base_file = config_directory.join("conveyor.toml");
        let env_file = config_directory.join(format!("conveyor.{environment}.toml"));

        let layered = Config::builder()
            .add_source(defaults)
            .add_source(
                File::from(base_file.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                File::from(env_file.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("CONVEYOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::build_error(config_directory.display().to_string(), e))?;

        layered
            .try_deserialize::<ConveyorConfig>()
            .map_err(|e| ConfigurationError::build_error(config_directory.display().to_string(), e))
    }
}
