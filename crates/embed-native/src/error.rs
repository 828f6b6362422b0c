//! Native binding error types.

use thiserror::Error;

/// Errors raised by the native inference binding.
#[derive(Debug, Error)]
pub enum NativeError {
    /// Candle model error
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Tokenizer error
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Model file not found
    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    /// Model configuration could not be parsed
    #[error("Invalid model config: {0}")]
    InvalidConfig(String),

    /// Requested acceleration is not available
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}
