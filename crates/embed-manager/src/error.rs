//! Embedding manager error types.

use embed_types::GpuLayers;
use thiserror::Error;

/// Errors returned to callers of the resource manager.
///
/// `Clone` so one failed load can be handed to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbeddingError {
    /// The manager was disposed; this instance will never serve again
    #[error("embedding manager has been shut down")]
    Disposed,

    /// The model could not be loaded or its context could not be created.
    /// The manager is back to unloaded and the next call retries.
    #[error("embedding model unavailable: {model} (gpu_layers={gpu_layers}): {reason}")]
    LoadFailed {
        model: String,
        gpu_layers: GpuLayers,
        reason: String,
    },

    /// Computing the vector for this input failed. The loaded model is kept.
    #[error("embedding inference failed for model {model}: {reason}")]
    InferenceFailed { model: String, reason: String },

    /// The manager could not be constructed
    #[error("invalid embedding manager configuration: {0}")]
    InvalidConfig(String),
}

impl EmbeddingError {
    /// True for errors after which a later call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::LoadFailed { .. } | EmbeddingError::InferenceFailed { .. }
        )
    }
}
