//! Model bundle layout on local storage.
//!
//! A Candle model is a directory holding the BERT config, the tokenizer and
//! the safetensors weights. Fetching the files is someone else's job; this
//! module only checks they are where they should be.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::NativeError;

/// Files every model bundle must contain
pub const BUNDLE_FILES: &[&str] = &["config.json", "tokenizer.json", "model.safetensors"];

/// Paths to the files of one model bundle
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub root: PathBuf,
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl ModelBundle {
    /// Describe the bundle rooted at `root` without touching the filesystem.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config: root.join("config.json"),
            tokenizer: root.join("tokenizer.json"),
            weights: root.join("model.safetensors"),
            root,
        }
    }

    /// Names of bundle files missing from `root`.
    pub fn missing_files(&self) -> Vec<&'static str> {
        BUNDLE_FILES
            .iter()
            .copied()
            .filter(|f| !self.root.join(f).is_file())
            .collect()
    }

    /// Resolve a bundle, failing if the directory or any file is absent.
    pub fn resolve(root: &Path) -> Result<Self, NativeError> {
        if !root.is_dir() {
            return Err(NativeError::ModelNotFound(format!(
                "{} is not a model directory",
                root.display()
            )));
        }

        let bundle = Self::at(root);
        let missing = bundle.missing_files();
        if !missing.is_empty() {
            return Err(NativeError::ModelNotFound(format!(
                "{} is missing {}",
                root.display(),
                missing.join(", ")
            )));
        }

        debug!(path = ?root, "Resolved model bundle");
        Ok(bundle)
    }
}
