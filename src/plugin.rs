//! The capability every export format implements.
//!
//! A format plugin declares its sub-formats (extension, channel limits,
//! metadata support) and encodes one export when handed an [`ExportJob`]. The
//! job carries the routed sample stream, the destination and the progress
//! channel back to the caller. Plugins never see tracks or routing; they pull
//! `frames x channels` blocks that are already mixed down.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use ndarray::{Array2, ArrayView1};
use thiserror::Error;

use crate::error::ExportError;
use crate::fs::OutputSink;
use crate::mixdown::{ChannelConstraint, RoutingMatrix};
use crate::progress::{ProgressChannel, ProgressResult};
use crate::source::{InputLayout, TrackProvider};

/// A parameterized variant of an output format.
#[derive(Debug, Clone, PartialEq)]
pub struct SubFormat {
    /// Short name, e.g. `"WAV 16-bit PCM"`.
    pub name: String,
    /// Longer description shown to users.
    pub description: String,
    /// Accepted file extensions, canonical one first, without the dot.
    pub extensions: Vec<String>,
    /// Output channel counts this sub-format accepts.
    pub channels: ChannelConstraint,
    /// Whether metadata tags can be embedded.
    pub metadata: bool,
}

impl SubFormat {
    /// Create a sub-format with a single extension and no metadata support.
    pub fn new(name: impl Into<String>, extension: impl Into<String>, channels: ChannelConstraint) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            extensions: vec![extension.into()],
            channels,
            metadata: false,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add an accepted extension.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extensions.push(extension.into());
        self
    }

    /// Mark the sub-format as able to embed metadata.
    pub fn with_metadata(mut self) -> Self {
        self.metadata = true;
        self
    }

    /// Canonical file extension.
    pub fn extension(&self) -> &str {
        self.extensions.first().map(String::as_str).unwrap_or_default()
    }

    /// Check if `extension` is accepted, ignoring case and a leading dot.
    pub fn accepts_extension(&self, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.');
        self.extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }
}

/// Failures reported by a format plugin.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The encoder rejected the data or its own state.
    #[error("Encoder error: {0}")]
    Encode(String),

    /// Writing to the output sink failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The sample stream could not be read.
    #[error("Sample source error: {0}")]
    Source(String),
}

impl PluginError {
    /// Create an encoder error.
    pub fn encode(details: impl Into<String>) -> Self {
        Self::Encode(details.into())
    }

    /// Translate into the exporter's error taxonomy.
    pub(crate) fn into_export_error(self, plugin: &str, path: &Path) -> ExportError {
        match self {
            Self::Encode(detail) => ExportError::encode_failure(plugin, detail),
            Self::Io(e) if e.kind() == io::ErrorKind::StorageFull => {
                ExportError::InsufficientDiskSpace {
                    required: 0,
                    available: 0,
                }
            }
            Self::Io(e) => ExportError::filesystem(path, e),
            Self::Source(detail) => ExportError::SampleReadFailure(detail),
        }
    }
}

/// An output format.
///
/// Instances are created fresh for every export session by the factory
/// registered in the [`Registry`](crate::registry::Registry), so any state a
/// plugin keeps lives only as long as one session.
pub trait ExportPlugin: Send {
    /// Sub-formats offered by this plugin, in display order.
    fn sub_formats(&self) -> &[SubFormat];

    /// Encode the job's sample stream into its sink.
    ///
    /// Plugins should stop pulling chunks once the stream ends; cancellation is
    /// signalled by the stream ending early.
    fn export(&mut self, job: &mut ExportJob<'_>) -> Result<(), PluginError>;

    /// Approximate encoded size of one sample, used for disk-space checks.
    fn estimated_bytes_per_sample(&self, sub_format: usize) -> u64 {
        let _ = sub_format;
        4
    }
}

/// Static facts about an export, handed to plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobInfo {
    /// Index of the chosen sub-format.
    pub sub_format: usize,
    /// Number of output channels in every chunk.
    pub channels: usize,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Total number of frames the stream will deliver if not cancelled.
    pub total_frames: u64,
}

/// One export as seen by a format plugin.
pub struct ExportJob<'a> {
    info: JobInfo,
    path: &'a Path,
    metadata: &'a BTreeMap<String, String>,
    sink: &'a mut dyn OutputSink,
    chunks: MixedChunks<'a>,
}

impl<'a> ExportJob<'a> {
    pub(crate) fn new(
        info: JobInfo,
        path: &'a Path,
        metadata: &'a BTreeMap<String, String>,
        sink: &'a mut dyn OutputSink,
        chunks: MixedChunks<'a>,
    ) -> Self {
        Self {
            info,
            path,
            metadata,
            sink,
            chunks,
        }
    }

    /// Static facts about this export.
    pub const fn info(&self) -> JobInfo {
        self.info
    }

    /// Path the output is written to.
    pub const fn output_path(&self) -> &Path {
        self.path
    }

    /// Metadata tags to embed, if the sub-format supports them.
    pub const fn metadata(&self) -> &BTreeMap<String, String> {
        self.metadata
    }

    /// Borrow the output sink and the sample stream at the same time.
    pub fn split(&mut self) -> (&mut dyn OutputSink, &mut MixedChunks<'a>) {
        (&mut *self.sink, &mut self.chunks)
    }

    /// Check if the export has been cancelled.
    pub fn is_cancelled(&mut self) -> bool {
        self.chunks.relay.is_cancelled()
    }
}

/// The routed sample stream of an export.
///
/// Yields `frames x channels` blocks in time order and reports progress after
/// each one. Once cancellation is requested the stream ends at the next chunk
/// boundary.
pub struct MixedChunks<'a> {
    source: &'a dyn TrackProvider,
    layout: &'a InputLayout,
    matrix: &'a RoutingMatrix,
    relay: &'a mut dyn ProgressChannel,
    start_frame: u64,
    next_frame: u64,
    end_frame: u64,
    chunk_frames: usize,
    scratch: Vec<f32>,
}

impl<'a> MixedChunks<'a> {
    pub(crate) fn new(
        source: &'a dyn TrackProvider,
        layout: &'a InputLayout,
        matrix: &'a RoutingMatrix,
        relay: &'a mut dyn ProgressChannel,
        frames: std::ops::Range<u64>,
        chunk_frames: usize,
    ) -> Self {
        let chunk_frames = chunk_frames.max(1);
        Self {
            source,
            layout,
            matrix,
            relay,
            start_frame: frames.start,
            next_frame: frames.start,
            end_frame: frames.end,
            chunk_frames,
            scratch: vec![0.0; chunk_frames],
        }
    }

    /// Report plugin-side progress, e.g. while flushing an encoder.
    pub fn report_progress(&mut self, fraction: f64) -> ProgressResult {
        self.relay.progress(fraction)
    }

    /// Frames still to be delivered.
    pub const fn remaining_frames(&self) -> u64 {
        self.end_frame - self.next_frame
    }

    fn read_block(&mut self, frames: usize) -> Result<Array2<f32>, PluginError> {
        let mut block = Array2::<f32>::zeros((frames, self.layout.len()));
        let scratch = &mut self.scratch[..frames];
        for (column, input) in self.layout.channels().iter().enumerate() {
            if input.muted {
                continue;
            }
            self.source
                .read(input.track, input.channel, self.next_frame, scratch)
                .map_err(|e| {
                    PluginError::Source(format!(
                        "track {} channel {}: {e}",
                        input.track, input.channel
                    ))
                })?;
            block
                .column_mut(column)
                .assign(&ArrayView1::from(&*scratch));
        }
        Ok(self.matrix.apply(block.view()))
    }
}

impl Iterator for MixedChunks<'_> {
    type Item = Result<Array2<f32>, PluginError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_frame >= self.end_frame || self.relay.is_cancelled() {
            return None;
        }

        let frames = (self.end_frame - self.next_frame).min(self.chunk_frames as u64) as usize;
        let block = match self.read_block(frames) {
            Ok(block) => block,
            Err(e) => return Some(Err(e)),
        };
        self.next_frame += frames as u64;

        let total = (self.end_frame - self.start_frame) as f64;
        let done = (self.next_frame - self.start_frame) as f64;
        self.relay.progress(done / total);

        Some(Ok(block))
    }
}
