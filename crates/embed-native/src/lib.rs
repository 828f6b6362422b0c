//! # embed-native
//!
//! Native inference binding for the local embedding manager.
//!
//! The [`InferenceBackend`], [`LoadedModel`] and [`EmbeddingContext`] traits
//! describe what the manager needs from an inference library: load a model,
//! create a context, embed text, and release both handles explicitly.
//! [`CandleBackend`] implements them with Candle for BERT-family models.

pub mod backend;
pub mod bundle;
pub mod candle;
pub mod embedding;
pub mod error;

pub use crate::candle::{CandleBackend, MAX_SEQ_LENGTH};
pub use backend::{EmbeddingContext, InferenceBackend, LoadedModel};
pub use bundle::{ModelBundle, BUNDLE_FILES};
pub use embedding::Embedding;
pub use error::NativeError;
