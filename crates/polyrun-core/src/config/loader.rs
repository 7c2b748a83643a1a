//! Configuration loader for YAML files and environment overrides

use crate::config::types::*;
use crate::errors::PolyrunError;
use std::env;
use std::path::Path;
use tokio::fs;

pub const ENV_TIMEOUT_MS: &str = "POLYRUN_TIMEOUT_MS";
pub const ENV_PYTHON: &str = "POLYRUN_PYTHON";
pub const ENV_GO: &str = "POLYRUN_GO";
pub const ENV_NODE: &str = "POLYRUN_NODE";
pub const ENV_TSC: &str = "POLYRUN_TSC";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<PolyrunConfig, PolyrunError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            PolyrunError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<PolyrunConfig, PolyrunError> {
        let mut config: PolyrunConfig = if content.trim().is_empty() {
            PolyrunConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                PolyrunError::ConfigError(format!("Failed to parse YAML config: {}", e))
            })?
        };

        Self::apply_environment(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_environment() -> Result<PolyrunConfig, PolyrunError> {
        Self::from_str("")
    }

    fn apply_environment(config: &mut PolyrunConfig) -> Result<(), PolyrunError> {
        if let Some(value) = Self::env_value(ENV_TIMEOUT_MS) {
            config.execution.timeout_ms = value.parse().map_err(|_| {
                PolyrunError::ConfigError(format!(
                    "{} must be a whole number of milliseconds, got '{}'",
                    ENV_TIMEOUT_MS, value
                ))
            })?;
            log::debug!("Execution timeout overridden to {} ms", config.execution.timeout_ms);
        }
        if let Some(value) = Self::env_value(ENV_PYTHON) {
            config.runtimes.python.interpreter = value;
        }
        if let Some(value) = Self::env_value(ENV_GO) {
            config.runtimes.go.toolchain = value;
        }
        if let Some(value) = Self::env_value(ENV_NODE) {
            config.runtimes.javascript.node = value.clone();
            config.runtimes.typescript.node = value;
        }
        if let Some(value) = Self::env_value(ENV_TSC) {
            config.runtimes.typescript.compiler = value;
        }
        Ok(())
    }

    fn env_value(key: &str) -> Option<String> {
        env::var(key).ok().filter(|value| !value.trim().is_empty())
    }
}
