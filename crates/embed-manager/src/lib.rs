//! # embed-manager
//!
//! Manages a local embedding model as an expensive native resource.
//!
//! ## Features
//! - Lazy load on first use, with concurrent callers sharing one load
//! - Idle eviction that never races an in-flight embedding
//! - Terminal, idempotent disposal with ordered release (context, then model)
//! - Durable model/dimensionality record that flags vector-incompatible
//!   reconfiguration
//!
//! ## Example
//!
//! ```ignore
//! use embed_manager::ResourceManager;
//! use embed_types::Settings;
//!
//! let settings = Settings::load(None)?;
//! let manager = ResourceManager::with_candle(settings.manager_config())?;
//! let vector = manager.generate_embedding("hello world").await?;
//! manager.dispose().await;
//! ```

pub mod error;
mod idle;
pub mod manager;
pub mod metadata;
mod state;

pub use error::EmbeddingError;
pub use manager::{ResourceManager, Stats, Vector};
pub use metadata::{DimensionChange, MetadataOutcome, MetadataStore};
