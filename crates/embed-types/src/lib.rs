//! # embed-types
//!
//! Shared configuration and record types for the local embedding manager.
//!
//! - `Settings`: layered configuration (defaults, file, env, CLI)
//! - `ManagerConfig`: immutable per-process manager configuration
//! - `GpuLayers`: acceleration layer count with a per-platform default
//! - `EmbeddingMetadataRecord`: durable model/dimensionality record

pub mod config;
pub mod error;
pub mod gpu_layers;
pub mod record;

pub use config::{ManagerConfig, Settings, MAX_IDLE_CHECK_INTERVAL};
pub use error::ConfigError;
pub use gpu_layers::GpuLayers;
pub use record::EmbeddingMetadataRecord;
