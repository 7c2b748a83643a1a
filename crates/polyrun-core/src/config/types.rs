//! Configuration type definitions
//!
//! Every field has a default, so an empty YAML document is a valid
//! configuration and a config file only needs to name what it overrides.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::coordinator::CoordinatorSettings;
use crate::errors::PolyrunError;
use crate::output::{OutputLimits, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_MAX_OUTPUT_LINES};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolyrunConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub runtimes: RuntimesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// How long a submission waits for its host to become ready.
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    /// Capacity of each coordinator's status channel.
    #[serde(default = "default_status_capacity")]
    pub status_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimesConfig {
    #[serde(default)]
    pub python: PythonRuntimeConfig,
    #[serde(default)]
    pub go: GoRuntimeConfig,
    #[serde(default)]
    pub javascript: JavaScriptRuntimeConfig,
    #[serde(default)]
    pub typescript: TypeScriptRuntimeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PythonRuntimeConfig {
    #[serde(default = "default_python")]
    pub interpreter: String,
    /// Install third-party imports on demand with pip.
    #[serde(default = "default_true")]
    pub install_packages: bool,
    #[serde(default)]
    pub package_index: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoRuntimeConfig {
    #[serde(default = "default_go")]
    pub toolchain: String,
    /// Budget for the warm-up build at boot, separate from the probe polling.
    #[serde(default = "default_build_timeout_ms")]
    pub build_timeout_ms: u64,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JavaScriptRuntimeConfig {
    #[serde(default = "default_node")]
    pub node: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeScriptRuntimeConfig {
    #[serde(default = "default_tsc")]
    pub compiler: String,
    #[serde(default = "default_node")]
    pub node: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_timeout_ms() -> u64 { 10_000 }
fn default_load_timeout_ms() -> u64 { 180_000 }
fn default_build_timeout_ms() -> u64 { 120_000 }
fn default_status_capacity() -> usize { 64 }
fn default_max_lines() -> usize { DEFAULT_MAX_OUTPUT_LINES }
fn default_max_bytes() -> usize { DEFAULT_MAX_OUTPUT_BYTES }
fn default_true() -> bool { true }
fn default_python() -> String { "python3".to_string() }
fn default_go() -> String { "go".to_string() }
fn default_node() -> String { "node".to_string() }
fn default_tsc() -> String { "tsc".to_string() }
fn default_probe_interval_ms() -> u64 { 100 }
fn default_probe_attempts() -> u32 { 50 }
fn default_log_level() -> String { "warn".to_string() }

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            load_timeout_ms: default_load_timeout_ms(),
            status_capacity: default_status_capacity(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl Default for PythonRuntimeConfig {
    fn default() -> Self {
        Self {
            interpreter: default_python(),
            install_packages: default_true(),
            package_index: None,
        }
    }
}

impl Default for GoRuntimeConfig {
    fn default() -> Self {
        Self {
            toolchain: default_go(),
            build_timeout_ms: default_build_timeout_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_attempts: default_probe_attempts(),
        }
    }
}

impl Default for JavaScriptRuntimeConfig {
    fn default() -> Self {
        Self { node: default_node() }
    }
}

impl Default for TypeScriptRuntimeConfig {
    fn default() -> Self {
        Self {
            compiler: default_tsc(),
            node: default_node(),
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

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

impl OutputConfig {
    pub fn limits(&self) -> OutputLimits {
        OutputLimits {
            max_lines: self.max_lines,
            max_bytes: self.max_bytes,
        }
    }
}

impl GoRuntimeConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_millis(self.build_timeout_ms)
    }
}

impl PolyrunConfig {
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            timeout: self.execution.timeout(),
            load_timeout: self.execution.load_timeout(),
            status_capacity: self.execution.status_capacity,
        }
    }

    pub fn validate(&self) -> Result<(), PolyrunError> {
        if self.execution.timeout_ms == 0 {
            return Err(PolyrunError::ConfigError(
                "execution.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.execution.load_timeout_ms == 0 {
            return Err(PolyrunError::ConfigError(
                "execution.load_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.execution.status_capacity == 0 {
            return Err(PolyrunError::ConfigError(
                "execution.status_capacity must be greater than 0".to_string(),
            ));
        }
        if self.output.max_lines == 0 || self.output.max_bytes == 0 {
            return Err(PolyrunError::ConfigError(
                "output limits must be greater than 0".to_string(),
            ));
        }
        if self.runtimes.go.build_timeout_ms == 0 {
            return Err(PolyrunError::ConfigError(
                "runtimes.go.build_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.runtimes.go.probe_attempts == 0 {
            return Err(PolyrunError::ConfigError(
                "runtimes.go.probe_attempts must be greater than 0".to_string(),
            ));
        }

        let binaries = [
            ("runtimes.python.interpreter", &self.runtimes.python.interpreter),
            ("runtimes.go.toolchain", &self.runtimes.go.toolchain),
            ("runtimes.javascript.node", &self.runtimes.javascript.node),
            ("runtimes.typescript.compiler", &self.runtimes.typescript.compiler),
            ("runtimes.typescript.node", &self.runtimes.typescript.node),
        ];
        for (field, value) in binaries {
            if value.trim().is_empty() {
                return Err(PolyrunError::ConfigError(format!("{} cannot be empty", field)));
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "off" | "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            other => Err(PolyrunError::ConfigError(format!(
                "Unknown logging.level '{}'",
                other
            ))),
        }
    }
}
