//! Native inference binding interface.
//!
//! A backend turns a model file into a loaded model, a loaded model into an
//! embedding context, and a context plus text into a raw vector. Both handles
//! carry an explicit release operation; a context must be released before the
//! model it was created from.

use std::path::Path;

use embed_types::GpuLayers;

use crate::error::NativeError;

/// Loads models from local storage.
///
/// Implementations must be thread-safe; calls are slow and may block.
pub trait InferenceBackend: Send + Sync + 'static {
    /// Load the model at `path`, offloading `gpu_layers` to an accelerator.
    fn load_model(
        &self,
        path: &Path,
        gpu_layers: GpuLayers,
    ) -> Result<Box<dyn LoadedModel>, NativeError>;
}

/// Opaque handle to a loaded model.
pub trait LoadedModel: Send + Sync {
    /// Create a context able to compute embeddings with this model.
    fn create_embedding_context(&self) -> Result<Box<dyn EmbeddingContext>, NativeError>;

    /// Release the model. Every context created from it must already be released.
    fn release(self: Box<Self>);
}

/// Opaque handle to an embedding context.
pub trait EmbeddingContext: Send {
    /// Compute the raw embedding vector for `text`.
    fn embed(&mut self, text: &str) -> Result<Vec<f32>, NativeError>;

    /// Release the context.
    fn release(self: Box<Self>);
}
