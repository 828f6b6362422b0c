//! CLI argument parsing for the embedder binary.
//!
//! CLI flags override every other configuration source.

use clap::{Args, Parser, Subcommand};
use embed_types::{GpuLayers, Settings};

/// Local embedding model runner
///
/// Loads a local embedding model on demand, serves embeddings, and unloads
/// the model again when idle.
#[derive(Parser, Debug)]
#[command(name = "embedder")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/local-embed/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Commands,
}

/// Settings that can be overridden on the command line
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Model name inside the models directory
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Directory holding model files
    #[arg(long, global = true)]
    pub models_dir: Option<String>,

    /// Embedding dimensionality of the model
    #[arg(short, long, global = true)]
    pub dimensions: Option<usize>,

    /// Layers to offload to an accelerator ("auto" or a count)
    #[arg(long, global = true)]
    pub gpu_layers: Option<GpuLayers>,

    /// Unload the model after this many idle milliseconds (0 disables)
    #[arg(long, global = true)]
    pub idle_timeout_ms: Option<u64>,
}

impl Overrides {
    /// Apply CLI overrides (highest precedence).
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(level) = &self.log_level {
            settings.log_level = level.clone();
        }
        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        if let Some(dir) = &self.models_dir {
            settings.models_dir = dir.clone();
        }
        if let Some(dimensions) = self.dimensions {
            settings.dimensions = dimensions;
        }
        if let Some(gpu_layers) = self.gpu_layers {
            settings.gpu_layers = Some(gpu_layers);
        }
        if let Some(timeout) = self.idle_timeout_ms {
            settings.idle_timeout_ms = timeout;
        }
    }
}

/// Embedder commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Embed one text and print the vector as JSON
    Embed {
        /// Text to embed
        text: String,
    },

    /// Print manager configuration and stored metadata without loading the model
    Stats,

    /// Read texts from stdin, one per line, and print one JSON result per line
    Serve {
        /// Load the model before reading input
        #[arg(long)]
        preload: bool,
    },
}
