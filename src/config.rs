//! Export configuration.
//!
//! [`ExportConfig`] holds the knobs that shape every export an [`Exporter`]
//! runs: chunk size, the silence threshold used when skipping leading silence,
//! the default downmix policy and how output-name collisions are handled. It is
//! plain data, loadable from TOML:
//!
//! ```toml
//! chunk_frames = 16384
//! silence_threshold = 0.0001
//! allow_overwrite = false
//! default_file_name = "mixdown"
//!
//! [downmix]
//! above_stereo = "stereo"
//! ```
//!
//! [`Exporter`]: crate::exporter::Exporter

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, ExportResult};
use crate::mixdown::DownMixPolicy;

/// Configuration for export behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Frames pulled, routed and handed to the plugin per chunk.
    pub chunk_frames: usize,

    /// Absolute sample value at or below which audio counts as silent.
    pub silence_threshold: f32,

    /// Downmix mode used when there is no override and the format leaves the
    /// channel count open.
    pub downmix: DownMixPolicy,

    /// Overwrite an existing output file instead of picking a free name.
    pub allow_overwrite: bool,

    /// Output directory used when no preference is stored.
    pub default_directory: PathBuf,

    /// Output file stem used when no preference is stored.
    pub default_file_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 65_536,
            silence_threshold: 0.0,
            downmix: DownMixPolicy::default(),
            allow_overwrite: false,
            default_directory: PathBuf::from("."),
            default_file_name: "untitled".to_string(),
        }
    }
}

impl ExportConfig {
    /// Create configuration for constrained environments: small chunks keep
    /// the per-export buffers short and make cancellation more responsive.
    pub fn low_memory() -> Self {
        Self {
            chunk_frames: 4096,
            ..Self::default()
        }
    }

    /// Parse configuration from a TOML document. Missing fields keep their
    /// defaults.
    pub fn from_toml_str(content: &str) -> ExportResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ExportError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ExportResult<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ExportError::filesystem(path, e))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded export configuration");
        Ok(config)
    }

    /// Serialize the configuration to TOML.
    pub fn to_toml_string(&self) -> ExportResult<String> {
        toml::to_string(self).map_err(|e| ExportError::Config(e.to_string()))
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> ExportResult<()> {
        if self.chunk_frames == 0 {
            return Err(ExportError::Config("chunk_frames must be at least 1".into()));
        }
        if !self.silence_threshold.is_finite() || self.silence_threshold < 0.0 {
            return Err(ExportError::Config(format!(
                "silence_threshold must be finite and non-negative, got {}",
                self.silence_threshold
            )));
        }
        if self.default_file_name.trim().is_empty() {
            return Err(ExportError::Config("default_file_name must not be empty".into()));
        }
        Ok(())
    }
}
