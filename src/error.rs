//! Error types and result utilities for export operations.
//!
//! Errors fall into three groups:
//!
//! - **Configuration-time** errors (`InvalidPluginIndex`, `InvalidRange`,
//!   `UnsupportedChannelMapping`, ...) are returned synchronously from the
//!   configuring call and never start an export.
//! - **Run-time** errors (`InsufficientDiskSpace`, `PluginEncodeFailure`,
//!   `FilesystemFailure`, `SampleReadFailure`) end a running export in the
//!   `Failed` state and are reported exactly once through the progress listener.
//! - **Recoverable** conditions never surface as errors at all. They degrade to a
//!   safe default and are reported as a [`Notice`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::exporter::ExportState;
use crate::mixdown::{ChannelConstraint, DownMixMode};

/// Convenience type alias for results that may contain an [`ExportError`].
pub type ExportResult<T> = Result<T, ExportError>;

/// Error types that can occur while configuring or running an export.
#[derive(Error, Debug)]
pub enum ExportError {
    /// The plugin index does not exist in the resolved registry order.
    #[error("Invalid plugin index {index}: {count} plugins are registered")]
    InvalidPluginIndex {
        /// Requested index.
        index: usize,
        /// Number of plugins available.
        count: usize,
    },

    /// The sub-format index does not exist for the chosen plugin.
    #[error("Invalid sub-format index {index} for plugin '{plugin}': it offers {count} sub-formats")]
    InvalidSubFormatIndex {
        /// Identifier of the chosen plugin.
        plugin: String,
        /// Requested index.
        index: usize,
        /// Number of sub-formats the plugin offers.
        count: usize,
    },

    /// No registered plugin accepts the requested file extension.
    #[error("No export plugin accepts extension '{0}'")]
    UnsupportedExtension(String),

    /// The export range is empty, inverted, or entirely silent.
    #[error("Invalid export range [{t0}, {t1}): {reason}")]
    InvalidRange {
        /// Requested start time in seconds.
        t0: f64,
        /// Requested end time in seconds.
        t1: f64,
        /// Why the range was rejected.
        reason: String,
    },

    /// The requested routing cannot be produced for the chosen format.
    #[error("Unsupported channel mapping {inputs} -> {outputs}: {reason}")]
    UnsupportedChannelMapping {
        /// Number of input channels.
        inputs: usize,
        /// Number of requested output channels.
        outputs: usize,
        /// Why the mapping was rejected.
        reason: String,
    },

    /// An operation was called out of sequence.
    #[error("Operation '{operation}' is not allowed in state {state:?}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the exporter was in.
        state: ExportState,
    },

    /// A plugin identifier was registered twice.
    #[error("Export plugin '{0}' is already registered")]
    DuplicateIdentifier(String),

    /// A plugin tried to register after the registry order was resolved.
    #[error("Registry is closed, cannot register export plugin '{0}'")]
    RegistryClosed(String),

    /// Placement hints form a cycle. Recovered internally by the registry.
    #[error("Placement hints form a cycle between: {}", .0.join(", "))]
    CyclicPlacement(Vec<String>),

    /// Every selected track is muted, so there is nothing to export.
    #[error("All selected audio is muted")]
    NoAudibleTracks,

    /// The destination cannot hold the encoded output.
    #[error("Insufficient disk space: {required} bytes required, {available} bytes available")]
    InsufficientDiskSpace {
        /// Estimated size of the output.
        required: u64,
        /// Space reported by the file system.
        available: u64,
    },

    /// The format plugin failed to encode.
    #[error("Plugin '{plugin}' failed to encode: {detail}")]
    PluginEncodeFailure {
        /// Identifier of the failing plugin.
        plugin: String,
        /// Plugin-provided failure description.
        detail: String,
    },

    /// Creating, writing, or removing the output file failed.
    #[error("File system error on {}: {source}", .path.display())]
    FilesystemFailure {
        /// Path being operated on.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The sample-data collaborator failed to deliver samples.
    #[error("Failed to read samples: {0}")]
    SampleReadFailure(String),

    /// The persisted-preference store could not be read or written.
    #[error("Preference store error: {0}")]
    Preferences(String),

    /// An export configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExportError {
    /// Create an invalid range error.
    pub fn invalid_range(t0: f64, t1: f64, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            t0,
            t1,
            reason: reason.into(),
        }
    }

    /// Create an unsupported channel mapping error.
    pub fn unsupported_mapping(inputs: usize, outputs: usize, reason: impl Into<String>) -> Self {
        Self::UnsupportedChannelMapping {
            inputs,
            outputs,
            reason: reason.into(),
        }
    }

    /// Create an invalid state error.
    pub const fn invalid_state(operation: &'static str, state: ExportState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Create a plugin encode failure.
    pub fn encode_failure(plugin: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::PluginEncodeFailure {
            plugin: plugin.into(),
            detail: detail.into(),
        }
    }

    /// Create a file system failure for `path`.
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FilesystemFailure {
            path: path.into(),
            source,
        }
    }

    /// The kind of this error, as reported to progress listeners.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPluginIndex { .. } => ErrorKind::InvalidPluginIndex,
            Self::InvalidSubFormatIndex { .. } => ErrorKind::InvalidSubFormatIndex,
            Self::UnsupportedExtension(_) => ErrorKind::UnsupportedExtension,
            Self::InvalidRange { .. } => ErrorKind::InvalidRange,
            Self::UnsupportedChannelMapping { .. } => ErrorKind::UnsupportedChannelMapping,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::DuplicateIdentifier(_) => ErrorKind::DuplicateIdentifier,
            Self::RegistryClosed(_) => ErrorKind::RegistryClosed,
            Self::CyclicPlacement(_) => ErrorKind::CyclicPlacement,
            Self::NoAudibleTracks => ErrorKind::NoAudibleTracks,
            Self::InsufficientDiskSpace { .. } => ErrorKind::InsufficientDiskSpace,
            Self::PluginEncodeFailure { .. } => ErrorKind::PluginEncodeFailure,
            Self::FilesystemFailure { .. } => ErrorKind::FilesystemFailure,
            Self::SampleReadFailure(_) => ErrorKind::SampleReadFailure,
            Self::Preferences(_) => ErrorKind::Preferences,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Check if this error ends a running export.
    pub const fn is_runtime(&self) -> bool {
        self.kind().is_runtime()
    }
}

/// Flat classification of [`ExportError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`ExportError::InvalidPluginIndex`].
    InvalidPluginIndex,
    /// See [`ExportError::InvalidSubFormatIndex`].
    InvalidSubFormatIndex,
    /// See [`ExportError::UnsupportedExtension`].
    UnsupportedExtension,
    /// See [`ExportError::InvalidRange`].
    InvalidRange,
    /// See [`ExportError::UnsupportedChannelMapping`].
    UnsupportedChannelMapping,
    /// See [`ExportError::InvalidState`].
    InvalidState,
    /// See [`ExportError::DuplicateIdentifier`].
    DuplicateIdentifier,
    /// See [`ExportError::RegistryClosed`].
    RegistryClosed,
    /// See [`ExportError::CyclicPlacement`].
    CyclicPlacement,
    /// See [`Notice::PreferenceStale`]. Only ever reported as a notice.
    PreferenceStale,
    /// See [`ExportError::NoAudibleTracks`].
    NoAudibleTracks,
    /// See [`ExportError::InsufficientDiskSpace`].
    InsufficientDiskSpace,
    /// See [`ExportError::PluginEncodeFailure`].
    PluginEncodeFailure,
    /// See [`ExportError::FilesystemFailure`].
    FilesystemFailure,
    /// See [`ExportError::SampleReadFailure`].
    SampleReadFailure,
    /// See [`ExportError::Preferences`].
    Preferences,
    /// See [`ExportError::Config`].
    Config,
}

impl ErrorKind {
    /// Check if errors of this kind occur while an export is running.
    pub const fn is_runtime(self) -> bool {
        matches!(
            self,
            Self::InsufficientDiskSpace
                | Self::PluginEncodeFailure
                | Self::FilesystemFailure
                | Self::SampleReadFailure
        )
    }

    /// Check if errors of this kind are recovered internally.
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::CyclicPlacement | Self::PreferenceStale)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A non-fatal condition that was recovered with a safe default.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Registry placement hints formed a cycle; insertion order was used instead.
    CyclicPlacement {
        /// Identifiers caught in the cycle.
        members: Vec<String>,
    },

    /// A persisted preference is no longer valid and a fallback was used.
    PreferenceStale {
        /// Preference key.
        key: String,
        /// Persisted value.
        value: String,
        /// Value used instead.
        fallback: String,
    },

    /// A user downmix override conflicts with a format's fixed channel count.
    ChannelConflict {
        /// The override that was requested.
        requested: DownMixMode,
        /// The constraint imposed by the chosen sub-format.
        constraint: ChannelConstraint,
    },
}

impl Notice {
    /// The error kind this notice corresponds to.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CyclicPlacement { .. } => ErrorKind::CyclicPlacement,
            Self::PreferenceStale { .. } => ErrorKind::PreferenceStale,
            Self::ChannelConflict { .. } => ErrorKind::UnsupportedChannelMapping,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CyclicPlacement { members } => write!(
                f,
                "placement hints form a cycle ({}), using registration order",
                members.join(", ")
            ),
            Self::PreferenceStale {
                key,
                value,
                fallback,
            } => write!(f, "preference {key}='{value}' is stale, using '{fallback}'"),
            Self::ChannelConflict {
                requested,
                constraint,
            } => write!(
                f,
                "downmix {requested:?} conflicts with format channels {constraint}, format wins"
            ),
        }
    }
}
