//! Embedder binary library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (embed, stats, serve)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, Overrides};
pub use commands::{init_logging, load_settings, run_embed, run_serve, show_stats, ServeReply};
