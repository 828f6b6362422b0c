//! Local embedding model runner
//!
//! # Usage
//!
//! ```bash
//! embedder embed "some text"
//! embedder stats
//! embedder serve [--preload] < texts.txt
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/local-embed/config.toml)
//! 3. Environment variables (EMBED_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use embed_daemon::{init_logging, load_settings, run_embed, run_serve, show_stats, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_deref(), &cli.overrides)?;
    init_logging(&settings.log_level)?;

    match cli.command {
        Commands::Embed { text } => {
            run_embed(&settings, &text).await?;
        }
        Commands::Stats => {
            show_stats(&settings)?;
        }
        Commands::Serve { preload } => {
            run_serve(&settings, preload).await?;
        }
    }

    Ok(())
}
