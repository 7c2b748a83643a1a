//! Configuration module
//!
//! YAML configuration for timeouts, output ceilings and the toolchains each
//! guest language runs on, with environment variable overrides.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;

#[cfg(test)]
mod tests;

use crate::errors::PolyrunError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<PolyrunConfig, PolyrunError> {
    ConfigLoader::from_file(path).await
}
