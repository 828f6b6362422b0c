//! Error types for configuration handling.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Layered configuration could not be built or deserialized
    #[error("Configuration error: {0}")]
    Load(String),

    /// A configuration value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Acceleration layer value is neither "auto" nor a non-negative integer
    #[error("Invalid gpu_layers value: {0}")]
    GpuLayers(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}
