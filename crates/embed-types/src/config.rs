//! Configuration loading for the local embedding manager.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/local-embed/config.toml.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::gpu_layers::GpuLayers;

/// Upper bound on how often the idle check wakes up when no interval is configured.
pub const MAX_IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Model identifier, resolved as `models_dir/model`
    #[serde(default = "default_model")]
    pub model: String,

    /// Directory holding model files
    #[serde(default = "default_models_dir")]
    pub models_dir: String,

    /// Dimensionality of vectors produced by `model`
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Layers to offload ("auto" or a count). Unset means platform default.
    #[serde(default)]
    pub gpu_layers: Option<GpuLayers>,

    /// Unload the model after this long without use (0 disables)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// How often the idle check runs. Unset means min(idle timeout, 60s).
    #[serde(default)]
    pub idle_check_interval_ms: Option<u64>,

    /// Where the embedding metadata record is kept
    #[serde(default = "default_metadata_path")]
    pub metadata_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "local-embed")
}

fn default_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_models_dir() -> String {
    project_dirs()
        .map(|p| p.data_local_dir().join("models"))
        .unwrap_or_else(|| PathBuf::from("./models"))
        .to_string_lossy()
        .to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_idle_timeout_ms() -> u64 {
    5 * 60 * 1000
}

fn default_metadata_path() -> String {
    project_dirs()
        .map(|p| p.data_local_dir().join("embedding-metadata.json"))
        .unwrap_or_else(|| PathBuf::from("./embedding-metadata.json"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: default_model(),
            models_dir: default_models_dir(),
            dimensions: default_dimensions(),
            gpu_layers: None,
            idle_timeout_ms: default_idle_timeout_ms(),
            idle_check_interval_ms: None,
            metadata_path: default_metadata_path(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/local-embed/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (EMBED_*, nested keys joined with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir = project_dirs()
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("model", default_model())?
            .set_default("models_dir", default_models_dir())?
            .set_default("dimensions", default_dimensions() as i64)?
            .set_default("idle_timeout_ms", default_idle_timeout_ms() as i64)?
            .set_default("metadata_path", default_metadata_path())?
            .set_default("log_level", default_log_level())?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: EMBED_MODEL, EMBED_IDLE_TIMEOUT_MS, EMBED_GPU_LAYERS, etc.
        builder = builder.add_source(
            Environment::with_prefix("EMBED")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        if self.dimensions == 0 {
            return Err(ConfigError::Invalid("dimensions must be > 0".to_string()));
        }
        if self.idle_check_interval_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "idle_check_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the immutable manager configuration from these settings.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            model: self.model.clone(),
            models_dir: expand_home(&self.models_dir),
            dimensions: self.dimensions,
            gpu_layers: self.gpu_layers,
            idle_timeout_ms: self.idle_timeout_ms,
            idle_check_interval_ms: self.idle_check_interval_ms,
            metadata_path: expand_home(&self.metadata_path),
        }
    }
}

/// Expand a leading `~/` to the user's home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Configuration for one resource manager instance.
///
/// Created once per process and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Model file (or bundle) name inside `models_dir`
    pub model: String,
    /// Directory holding model files
    pub models_dir: PathBuf,
    /// Target embedding dimensionality
    pub dimensions: usize,
    /// Explicit acceleration layers; `None` picks the platform default
    pub gpu_layers: Option<GpuLayers>,
    /// Idle eviction threshold in milliseconds (0 disables eviction)
    pub idle_timeout_ms: u64,
    /// Idle check period; `None` means min(idle timeout, 60s)
    pub idle_check_interval_ms: Option<u64>,
    /// Location of the durable metadata record
    pub metadata_path: PathBuf,
}

impl ManagerConfig {
    /// Config with the given model and defaults for everything else.
    pub fn new(
        model: impl Into<String>,
        models_dir: impl Into<PathBuf>,
        dimensions: usize,
        metadata_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model: model.into(),
            models_dir: models_dir.into(),
            dimensions,
            gpu_layers: None,
            idle_timeout_ms: default_idle_timeout_ms(),
            idle_check_interval_ms: None,
            metadata_path: metadata_path.into(),
        }
    }

    /// Set explicit acceleration layers (builder pattern).
    pub fn with_gpu_layers(mut self, gpu_layers: GpuLayers) -> Self {
        self.gpu_layers = Some(gpu_layers);
        self
    }

    /// Set the idle timeout (builder pattern).
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the idle check period (builder pattern).
    pub fn with_idle_check_interval(mut self, interval: Duration) -> Self {
        self.idle_check_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Full path of the model file.
    pub fn model_path(&self) -> PathBuf {
        self.models_dir.join(&self.model)
    }

    /// Metadata record location.
    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// Acceleration layers after applying the platform default.
    pub fn resolved_gpu_layers(&self) -> GpuLayers {
        self.gpu_layers.unwrap_or_else(GpuLayers::platform_default)
    }

    /// Idle timeout, or `None` when eviction is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    /// Period of the background idle check, or `None` when eviction is disabled.
    pub fn idle_check_interval(&self) -> Option<Duration> {
        let timeout = self.idle_timeout()?;
        let interval = match self.idle_check_interval_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => timeout.min(MAX_IDLE_CHECK_INTERVAL),
        };
        Some(interval)
    }
}
