//! Hardware acceleration layer count.
//!
//! Controls how much of a model's computation is offloaded to an
//! accelerator. `Count(0)` keeps everything on the CPU, `Auto` lets the
//! runtime decide.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

/// Number of model layers to offload to an accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuLayers {
    /// Let the inference runtime pick
    Auto,
    /// Offload exactly this many layers (0 = CPU only)
    Count(u32),
}

impl GpuLayers {
    /// CPU-only inference.
    pub const CPU: GpuLayers = GpuLayers::Count(0);

    /// Default for the host platform when nothing is configured.
    ///
    /// macOS hosts run Metal on unified memory, so offloading is left to the
    /// runtime. Everywhere else defaults to CPU-only.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            GpuLayers::Auto
        } else {
            GpuLayers::CPU
        }
    }

    /// True when any offloading is requested.
    pub fn wants_accelerator(&self) -> bool {
        !matches!(self, GpuLayers::Count(0))
    }
}

impl fmt::Display for GpuLayers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuLayers::Auto => f.write_str("auto"),
            GpuLayers::Count(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for GpuLayers {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("auto") {
            return Ok(GpuLayers::Auto);
        }
        trimmed
            .parse::<u32>()
            .map(GpuLayers::Count)
            .map_err(|_| ConfigError::GpuLayers(s.to_string()))
    }
}

impl Serialize for GpuLayers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            GpuLayers::Auto => serializer.serialize_str("auto"),
            GpuLayers::Count(n) => serializer.serialize_u32(*n),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GpuLayersRepr {
    Count(u32),
    Text(String),
}

impl<'de> Deserialize<'de> for GpuLayers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match GpuLayersRepr::deserialize(deserializer)? {
            GpuLayersRepr::Count(n) => Ok(GpuLayers::Count(n)),
            GpuLayersRepr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
