// Correctness and logic
#![warn(clippy::unit_cmp)] // Detects comparing unit types
#![warn(clippy::match_same_arms)]
// Duplicate match arms

// Performance-focused
#![warn(clippy::inefficient_to_string)] // `format!("{}", x)` vs `x.to_string()`
#![warn(clippy::map_clone)] // Cloning inside `map()` unnecessarily
#![warn(clippy::unnecessary_to_owned)] // Detects redundant `.to_owned()` or `.clone()`
#![warn(clippy::large_stack_arrays)] // Helps avoid stack overflows
#![warn(clippy::box_collection)] // Warns on boxed `Vec`, `String`, etc.
#![warn(clippy::needless_collect)] // Avoids `.collect().iter()` chains

// Style and idiomatic Rust
#![warn(clippy::redundant_clone)] // Detects unnecessary `.clone()`
#![warn(clippy::identity_op)] // e.g., `x + 0`, `x * 1`
#![warn(clippy::needless_return)] // Avoids `return` at the end of functions
#![warn(clippy::let_unit_value)] // Avoids binding `()` to variables
#![warn(clippy::manual_map)] // Use `.map()` instead of manual `match`
#![cfg_attr(not(test), warn(clippy::unwrap_used))] // Avoids using `unwrap()`

// Maintainability
#![warn(clippy::missing_panics_doc)] // Docs for functions that might panic
#![warn(clippy::missing_safety_doc)] // Docs for `unsafe` functions
#![warn(missing_docs)]

//! # audio_export
//!
//! The export core of an audio editor: it turns a selection of tracks into one
//! encoded output file.
//!
//! ## Overview
//!
//! - [`registry`]: a process-wide, ordered collection of format plugin
//!   *factories*. Plugins register from anywhere, in any order; the order is
//!   resolved once by placement hints.
//! - [`mixdown`]: decides how many channels to write and builds the
//!   [`RoutingMatrix`] that maps input channels onto them.
//! - [`exporter`]: the [`Exporter`] session state machine. It validates the
//!   configuration, resolves the output path and drives the chosen plugin chunk
//!   by chunk.
//! - [`progress`]: the [`ExportProgressListener`] contract for progress,
//!   cancellation and outcome.
//! - [`formats`]: built-in WAV (via `hound`) and raw float formats.
//!
//! Tracks, the file system and persisted preferences are collaborators behind
//! the [`TrackProvider`], [`OutputFileSystem`] and [`PreferenceStore`] traits.
//!
//! ## Features
//!
//! - `progress-tracking`: adds [`progress::ProgressBarListener`], an `indicatif`
//!   progress bar.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use audio_export::{Exporter, ExportOutcome, MemoryTracks, Registry, TracingProgressListener};
//! use ndarray::Array2;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let registry = Registry::new();
//! audio_export::formats::register_builtin(&registry).unwrap();
//!
//! // two mono tracks, one second each at 48 kHz
//! let tracks = MemoryTracks::new(48_000)
//!     .with_track("left", 0.0, Array2::from_elem((1, 48_000), 0.1))
//!     .with_track("right", 0.0, Array2::from_elem((1, 48_000), -0.1));
//!
//! let mut exporter = Exporter::builder(Arc::new(tracks)).registry(&registry).build();
//! let (plugin, sub_format) = exporter.find_plugin_by_extension("wav").unwrap();
//! exporter.configure(dir.path().join("mixdown"), plugin, sub_format).unwrap();
//! exporter.set_export_range(0.0, 1.0, false, false).unwrap();
//!
//! match exporter.process(&mut TracingProgressListener::new()).unwrap() {
//!     ExportOutcome::Completed { path, channels } => {
//!         assert_eq!(channels, 2);
//!         assert!(path.ends_with("mixdown.wav"));
//!     }
//!     other => panic!("export did not complete: {other:?}"),
//! }
//! ```
//!
//! ## Error Handling
//!
//! Configuration calls return [`ExportResult`]. A running export never returns
//! its failure as `Err`: the failure is reported once to the listener and comes
//! back as [`ExportOutcome::Failed`]. Conditions that are recovered with a safe
//! default (a placement cycle, a stale preference, a channel override the
//! format cannot honour) are collected as [`Notice`]s.

pub mod config;
pub mod error;
pub mod exporter;
pub mod formats;
pub mod fs;
pub mod mixdown;
pub mod plugin;
pub mod preferences;
pub mod progress;
pub mod registry;
pub mod source;

pub use config::ExportConfig;
pub use error::{ErrorKind, ExportError, ExportResult, Notice};
pub use exporter::{
    ExportControl, ExportOutcome, ExportRequest, ExportSession, ExportState, Exporter,
    ExporterBuilder, MixerSpec,
};
pub use fs::{LocalFileSystem, OutputFileSystem, OutputSink};
pub use mixdown::{ChannelConstraint, DownMixMode, DownMixPolicy, RoutingMatrix};
pub use plugin::{ExportJob, ExportPlugin, JobInfo, MixedChunks, PluginError, SubFormat};
pub use preferences::{MemoryPreferences, PreferenceStore, TomlPreferences};
pub use progress::{ExportProgressListener, ProgressResult, TracingProgressListener};
pub use registry::{
    Placement, PlacementOrder, PluginDescriptor, Registry, global_registry, register_plugin,
};
pub use source::{MemoryTracks, TrackInfo, TrackProvider};
