//! Durable embedding metadata record.
//!
//! Remembers which model and dimensionality produced the vectors stored by
//! the surrounding application, so a later run can detect when a new
//! configuration makes those vectors incompatible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Model and dimensionality last observed by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingMetadataRecord {
    /// Model identifier
    pub model: String,
    /// Vector length produced by `model`
    pub dimensions: usize,
    /// When this record was last rewritten
    pub last_changed: DateTime<Utc>,
}

impl EmbeddingMetadataRecord {
    pub fn new(model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model: model.into(),
            dimensions,
            last_changed: Utc::now(),
        }
    }

    /// A record is usable only with a model name and positive dimensionality.
    pub fn is_valid(&self) -> bool {
        !self.model.is_empty() && self.dimensions > 0
    }
}
