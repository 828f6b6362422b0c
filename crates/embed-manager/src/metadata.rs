//! Embedding metadata persistence.
//!
//! Keeps a small JSON record of the model and dimensionality last used, so a
//! configuration change that makes stored vectors incompatible is noticed
//! across restarts. Persistence is best-effort: read problems count as "no
//! record" and write problems are logged, never returned.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use embed_types::EmbeddingMetadataRecord;
use serde::Serialize;
use tracing::{debug, warn};

/// A change of vector dimensionality between the stored record and the
/// active configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionChange {
    /// Model named in the stored record
    pub previous_model: String,
    /// Dimensionality named in the stored record
    pub previous_dimensions: usize,
    /// Model now configured
    pub model: String,
    /// Dimensionality now configured
    pub dimensions: usize,
}

impl fmt::Display for DimensionChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "embedding dimensions changed from {} ({}) to {} ({}); vectors stored before this change are incompatible and must be re-embedded",
            self.previous_dimensions, self.previous_model, self.dimensions, self.model
        )
    }
}

/// Result of comparing the active configuration against the stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOutcome {
    /// Stored record matches; nothing written
    Unchanged,
    /// No usable prior record; a new one was written
    Recorded,
    /// Different model with the same dimensionality; record rewritten
    ModelChanged { previous_model: String },
    /// Dimensionality differs; record rewritten
    DimensionsChanged(DimensionChange),
}

/// Reads and writes the metadata record at a fixed path.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored record.
    ///
    /// Returns `None` when the file is absent, unreadable, or does not hold a
    /// valid record.
    pub fn read(&self) -> Option<EmbeddingMetadataRecord> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to read embedding metadata");
                return None;
            }
        };

        match serde_json::from_slice::<EmbeddingMetadataRecord>(&bytes) {
            Ok(record) if record.is_valid() => Some(record),
            Ok(_) => {
                debug!(path = ?self.path, "Ignoring embedding metadata with empty fields");
                None
            }
            Err(e) => {
                debug!(path = ?self.path, error = %e, "Ignoring corrupt embedding metadata");
                None
            }
        }
    }

    /// Persist `record`, creating parent directories as needed.
    ///
    /// Failures are logged and reported as `false`.
    pub fn write(&self, record: &EmbeddingMetadataRecord) -> bool {
        match self.try_write(record) {
            Ok(()) => {
                debug!(path = ?self.path, model = %record.model, dimensions = record.dimensions, "Wrote embedding metadata");
                true
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to write embedding metadata");
                false
            }
        }
    }

    fn try_write(&self, record: &EmbeddingMetadataRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec_pretty(record)?;
        fs::write(&self.path, json)
    }

    /// Compare the stored record against `model`/`dimensions`, rewriting it
    /// when anything differs.
    pub fn reconcile(&self, model: &str, dimensions: usize) -> MetadataOutcome {
        let previous = self.read();

        let outcome = match &previous {
            None => MetadataOutcome::Recorded,
            Some(p) if p.dimensions != dimensions => {
                MetadataOutcome::DimensionsChanged(DimensionChange {
                    previous_model: p.model.clone(),
                    previous_dimensions: p.dimensions,
                    model: model.to_string(),
                    dimensions,
                })
            }
            Some(p) if p.model != model => MetadataOutcome::ModelChanged {
                previous_model: p.model.clone(),
            },
            Some(_) => return MetadataOutcome::Unchanged,
        };

        self.write(&EmbeddingMetadataRecord {
            model: model.to_string(),
            dimensions,
            last_changed: Utc::now(),
        });

        match &outcome {
            MetadataOutcome::Recorded => {
                warn!(
                    model = %model,
                    dimensions,
                    "No prior embedding metadata; recording {} with {} dimensions",
                    model,
                    dimensions
                );
            }
            MetadataOutcome::ModelChanged { previous_model } => {
                warn!(
                    previous_model = %previous_model,
                    model = %model,
                    dimensions,
                    "Embedding model changed from {} to {}; dimensions unchanged at {}",
                    previous_model,
                    model,
                    dimensions
                );
            }
            MetadataOutcome::DimensionsChanged(change) => {
                warn!(
                    previous_dimensions = change.previous_dimensions,
                    dimensions = change.dimensions,
                    model = %model,
                    "{}",
                    change
                );
            }
            MetadataOutcome::Unchanged => {}
        }

        outcome
    }
}
