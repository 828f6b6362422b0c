//! Command implementations for the embedder binary.
//!
//! Handles:
//! - embed: one-shot embedding of a single text
//! - stats: configuration, stats and stored metadata without loading
//! - serve: line-oriented embedding loop over stdin/stdout

use anyhow::{Context, Result};
use embed_manager::{MetadataStore, ResourceManager};
use embed_types::Settings;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

use crate::cli::Overrides;

/// Load configuration (defaults -> file -> env -> CLI).
pub fn load_settings(config_path: Option<&str>, overrides: &Overrides) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    overrides.apply(&mut settings);
    settings
        .validate()
        .context("Invalid configuration after CLI overrides")?;
    Ok(settings)
}

/// Initialize logging on stderr so stdout stays machine-readable.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn create_manager(settings: &Settings) -> Result<ResourceManager> {
    let config = settings.manager_config();
    info!("Configuration:");
    info!("  Model path: {:?}", config.model_path());
    info!("  Dimensions: {}", config.dimensions);
    info!("  GPU layers: {}", config.resolved_gpu_layers());
    info!("  Idle timeout: {} ms", config.idle_timeout_ms);
    info!("  Metadata: {:?}", config.metadata_path());

    ResourceManager::with_candle(config).context("Failed to create embedding manager")
}

/// One line of `serve` output
#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ServeReply {
    Embedding { embedding: Vec<f32> },
    Error { error: String },
}

/// Embed one text and print it as a JSON array.
pub async fn run_embed(settings: &Settings, text: &str) -> Result<()> {
    let manager = create_manager(settings)?;

    let result = manager.generate_embedding(text).await;
    manager.dispose().await;

    let vector = result.context("Embedding failed")?;
    println!("{}", serde_json::to_string(&vector)?);
    Ok(())
}

/// Print configuration, stats and the stored metadata record.
pub fn show_stats(settings: &Settings) -> Result<()> {
    #[derive(Serialize)]
    struct Report<T: Serialize, R: Serialize> {
        stats: T,
        metadata: Option<R>,
    }

    let config = settings.manager_config();
    let metadata = MetadataStore::new(config.metadata_path()).read();
    let manager = ResourceManager::with_candle(config.with_idle_timeout(Default::default()))
        .context("Failed to create embedding manager")?;

    let report = Report {
        stats: manager.stats(),
        metadata,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Embed each stdin line until EOF or Ctrl+C, then dispose the manager.
pub async fn run_serve(settings: &Settings, preload: bool) -> Result<()> {
    let manager = create_manager(settings)?;

    if preload {
        if let Err(e) = manager.preload().await {
            warn!(error = %e, "Preload failed, will retry on first request");
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("Reading texts from stdin");
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                None
            }
        };
        let Some(text) = line else { break };

        let reply = match manager.generate_embedding(&text).await {
            Ok(embedding) => ServeReply::Embedding { embedding },
            Err(e) => ServeReply::Error {
                error: e.to_string(),
            },
        };

        let mut out = serde_json::to_vec(&reply)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    manager.dispose().await;
    let stats = manager.stats();
    info!(
        loads = stats.load_count,
        evictions = stats.eviction_count,
        "Embedder stopped"
    );
    Ok(())
}
