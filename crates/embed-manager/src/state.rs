//! Runtime state of the resource manager.

use std::fmt;

use embed_native::{EmbeddingContext, LoadedModel, NativeError};
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;
use tracing::debug;

use crate::error::EmbeddingError;

/// Outcome of the single in-flight load, shared by every caller that joins it.
pub(crate) type LoadFuture = Shared<BoxFuture<'static, Result<(), EmbeddingError>>>;

/// Lifecycle state. Only ever read or changed under the manager's state lock.
pub(crate) enum RuntimeState {
    Unloaded,
    Loading(LoadFuture),
    Loaded(LoadedResources),
    Disposed,
}

impl RuntimeState {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            RuntimeState::Unloaded => "unloaded",
            RuntimeState::Loading(_) => "loading",
            RuntimeState::Loaded(_) => "loaded",
            RuntimeState::Disposed => "disposed",
        }
    }
}

impl fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A loaded model and the embedding context created from it.
///
/// Owns both native handles. They are released exactly once, context first,
/// either through [`LoadedResources::release`] or on drop.
pub(crate) struct LoadedResources {
    context: Option<Box<dyn EmbeddingContext>>,
    model: Option<Box<dyn LoadedModel>>,
    last_used: Instant,
}

impl LoadedResources {
    pub(crate) fn new(model: Box<dyn LoadedModel>, context: Box<dyn EmbeddingContext>) -> Self {
        Self {
            context: Some(context),
            model: Some(model),
            last_used: Instant::now(),
        }
    }

    pub(crate) fn embed(&mut self, text: &str) -> Result<Vec<f32>, NativeError> {
        match self.context.as_mut() {
            Some(context) => context.embed(text),
            None => Err(NativeError::InvalidInput(
                "embedding context already released".to_string(),
            )),
        }
    }

    /// Mark the resources as used now.
    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub(crate) fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Release the context, then the model.
    pub(crate) fn release(mut self) {
        self.release_handles();
    }

    fn release_handles(&mut self) {
        if let Some(context) = self.context.take() {
            context.release();
        }
        if let Some(model) = self.model.take() {
            model.release();
        }
        debug!("Released embedding context and model");
    }
}

impl Drop for LoadedResources {
    fn drop(&mut self) {
        if self.context.is_some() || self.model.is_some() {
            self.release_handles();
        }
    }
}
