//! The export orchestrator.
//!
//! An [`Exporter`] owns one export session at a time: the time selection, the
//! chosen plugin and sub-format, the routing matrix and the output path. It
//! drives the chosen plugin through [`process`](Exporter::process), relaying
//! progress to the caller and translating plugin failures into
//! [`ExportError`]s.
//!
//! # Example
//! ```rust
//! use std::sync::Arc;
//! use audio_export::exporter::{ExportOutcome, Exporter};
//! use audio_export::formats;
//! use audio_export::progress::TracingProgressListener;
//! use audio_export::registry::Registry;
//! use audio_export::source::MemoryTracks;
//! use ndarray::Array2;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let registry = Registry::new();
//! formats::register_builtin(&registry).unwrap();
//!
//! let tracks = MemoryTracks::new(8_000).with_track("voice", 0.0, Array2::from_elem((1, 8_000), 0.25));
//! let mut exporter = Exporter::builder(Arc::new(tracks)).registry(&registry).build();
//!
//! let wav = exporter.find_plugin_by_extension("wav").unwrap();
//! exporter.configure(dir.path().join("voice"), wav.0, wav.1).unwrap();
//! exporter.set_export_range(0.0, 1.0, false, false).unwrap();
//!
//! let outcome = exporter.process(&mut TracingProgressListener::new()).unwrap();
//! assert!(matches!(outcome, ExportOutcome::Completed { channels: 1, .. }));
//! ```

mod path;
mod session;
mod state;

#[cfg(test)]
mod tests;

pub use session::{ExportRange, ExportSession, MixerSpec};
pub use state::{ExportControl, ExportState};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ExportConfig;
use crate::error::{ExportError, ExportResult, Notice};
use crate::fs::{LocalFileSystem, OutputFileSystem, PartialOutput};
use crate::mixdown::{self, ChannelConstraint, DownMixMode, RoutingMatrix};
use crate::plugin::{ExportJob, ExportPlugin, JobInfo, MixedChunks, SubFormat};
use crate::preferences::{self, MemoryPreferences, PreferenceStore};
use crate::progress::{ExportProgressListener, ProgressRelay};
use crate::registry::{PluginDescriptor, Registry, ResolvedOrder, global_registry};
use crate::source::{InputLayout, TrackProvider};

/// How a [`process`](Exporter::process) call ended.
#[derive(Debug)]
pub enum ExportOutcome {
    /// The output file is complete.
    Completed {
        /// Where the output was written.
        path: PathBuf,
        /// Number of channels written.
        channels: usize,
    },
    /// The export was cancelled and its partial output removed.
    Cancelled,
    /// The export failed and its partial output was removed.
    Failed(ExportError),
}

impl ExportOutcome {
    /// The terminal state this outcome corresponds to.
    pub const fn state(&self) -> ExportState {
        match self {
            Self::Completed { .. } => ExportState::Completed,
            Self::Cancelled => ExportState::Cancelled,
            Self::Failed(_) => ExportState::Failed,
        }
    }

    /// Check if the export completed.
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// A fully specified export, as issued by a command layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    /// Output channel count.
    pub channels: usize,
    /// File extension selecting the format, e.g. `"wav"`.
    pub extension: String,
    /// Output path.
    pub file_name: PathBuf,
    /// Only export tracks marked as selected.
    pub selected_only: bool,
    /// Start in seconds.
    pub t0: f64,
    /// End in seconds, exclusive.
    pub t1: f64,
}

/// Builder for [`Exporter`].
pub struct ExporterBuilder {
    tracks: Arc<dyn TrackProvider>,
    resolved: Option<ResolvedOrder>,
    preferences: Option<Arc<dyn PreferenceStore>>,
    file_system: Option<Arc<dyn OutputFileSystem>>,
    config: ExportConfig,
}

impl ExporterBuilder {
    /// Start building an exporter that reads from `tracks`.
    pub fn new(tracks: Arc<dyn TrackProvider>) -> Self {
        Self {
            tracks,
            resolved: None,
            preferences: None,
            file_system: None,
            config: ExportConfig::default(),
        }
    }

    /// Take plugins from `registry` instead of the process-wide one.
    ///
    /// Resolves (and so closes) the registry.
    pub fn registry(mut self, registry: &Registry) -> Self {
        self.resolved = Some(registry.resolve());
        self
    }

    /// Persisted preference store. Defaults to an empty in-memory store.
    pub fn preferences(mut self, preferences: Arc<dyn PreferenceStore>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    /// Output file system. Defaults to [`LocalFileSystem`].
    pub fn file_system(mut self, file_system: Arc<dyn OutputFileSystem>) -> Self {
        self.file_system = Some(file_system);
        self
    }

    /// Export configuration.
    pub fn config(mut self, config: ExportConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the exporter.
    pub fn build(self) -> Exporter {
        let resolved = self
            .resolved
            .unwrap_or_else(|| global_registry().resolve());
        let mut exporter = Exporter {
            tracks: self.tracks,
            plugins: Vec::new(),
            descriptors: resolved.descriptors,
            preferences: self
                .preferences
                .unwrap_or_else(|| Arc::new(MemoryPreferences::new())),
            fs: self.file_system.unwrap_or_else(|| Arc::new(LocalFileSystem)),
            config: self.config,
            session: ExportSession::default(),
            state: ExportState::Unconfigured,
            control: ExportControl::new(),
            notices: resolved.notices,
        };
        exporter.instantiate_plugins();
        exporter
    }
}

/// Orchestrates export sessions.
pub struct Exporter {
    tracks: Arc<dyn TrackProvider>,
    descriptors: Arc<[PluginDescriptor]>,
    plugins: Vec<Box<dyn ExportPlugin>>,
    preferences: Arc<dyn PreferenceStore>,
    fs: Arc<dyn OutputFileSystem>,
    config: ExportConfig,
    session: ExportSession,
    state: ExportState,
    control: ExportControl,
    notices: Vec<Notice>,
}

impl fmt::Debug for Exporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exporter")
            .field("plugins", &self.descriptors.iter().map(|d| d.id()).collect::<Vec<_>>())
            .field("config", &self.config)
            .field("session", &self.session)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Exporter {
    /// Start building an exporter that reads from `tracks`.
    pub fn builder(tracks: Arc<dyn TrackProvider>) -> ExporterBuilder {
        ExporterBuilder::new(tracks)
    }

    /// Current state.
    pub const fn state(&self) -> ExportState {
        self.state
    }

    /// Handle for observing and cancelling this exporter from another thread.
    pub fn control(&self) -> ExportControl {
        self.control.clone()
    }

    /// The current session.
    pub const fn session(&self) -> &ExportSession {
        &self.session
    }

    /// The export configuration.
    pub const fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Notices recovered since they were last taken. Pending notices are also
    /// relayed to the listener at the start of the next `process`.
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Take the pending notices.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // ---------------------------------------------------------------------
    // Plugin lookup
    // ---------------------------------------------------------------------

    /// Number of available plugins.
    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Available plugins with their identifiers, in registry order.
    pub fn plugins(&self) -> impl Iterator<Item = (&str, &dyn ExportPlugin)> + '_ {
        self.descriptors
            .iter()
            .zip(&self.plugins)
            .map(|(d, p)| (d.id(), p.as_ref()))
    }

    /// The plugin at `index`.
    pub fn plugin(&self, index: usize) -> Option<&dyn ExportPlugin> {
        self.plugins.get(index).map(|p| p.as_ref())
    }

    /// Identifier of the plugin at `index`.
    pub fn plugin_id(&self, index: usize) -> Option<&str> {
        self.descriptors.get(index).map(PluginDescriptor::id)
    }

    /// The chosen plugin and its index.
    pub fn current_plugin(&self) -> Option<(usize, &dyn ExportPlugin)> {
        let index = self.session.plugin?;
        self.plugin(index).map(|p| (index, p))
    }

    /// The chosen sub-format.
    pub fn current_sub_format(&self) -> Option<&SubFormat> {
        let (_, plugin) = self.current_plugin()?;
        plugin.sub_formats().get(self.session.sub_format?)
    }

    /// First `(plugin, sub-format)` whose extensions include `extension`,
    /// ignoring case.
    pub fn find_plugin_by_extension(&self, extension: &str) -> Option<(usize, usize)> {
        self.plugins.iter().enumerate().find_map(|(p, plugin)| {
            plugin
                .sub_formats()
                .iter()
                .position(|s| s.accepts_extension(extension))
                .map(|s| (p, s))
        })
    }

    /// Check if the chosen sub-format can embed metadata.
    pub fn can_metadata(&self) -> bool {
        self.current_sub_format().is_some_and(|s| s.metadata)
    }

    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------

    /// Choose the output path, plugin and sub-format.
    ///
    /// Resets the resolved routing, which is rebuilt on demand.
    pub fn configure(
        &mut self,
        path: impl Into<PathBuf>,
        plugin: usize,
        sub_format: usize,
    ) -> ExportResult<()> {
        self.begin_edit("configure")?;
        let count = self.plugins.len();
        let instance = self
            .plugins
            .get(plugin)
            .ok_or(ExportError::InvalidPluginIndex {
                index: plugin,
                count,
            })?;
        let subs = instance.sub_formats().len();
        if sub_format >= subs {
            return Err(ExportError::InvalidSubFormatIndex {
                plugin: self.descriptors[plugin].id().to_string(),
                index: sub_format,
                count: subs,
            });
        }

        let path = path.into();
        tracing::debug!(
            plugin = %self.descriptors[plugin].id(),
            sub_format,
            path = %path.display(),
            "Configured export"
        );
        self.session.plugin = Some(plugin);
        self.session.sub_format = Some(sub_format);
        self.session.requested_path = Some(path);
        self.session.invalidate_routing();
        self.set_state(ExportState::Configured);
        Ok(())
    }

    /// Set the time selection `[t0, t1)` in seconds.
    ///
    /// With `skip_leading_silence` the effective start moves to the first
    /// sample louder than the configured threshold; a selection that is silent
    /// throughout is rejected.
    pub fn set_export_range(
        &mut self,
        t0: f64,
        t1: f64,
        selected_only: bool,
        skip_leading_silence: bool,
    ) -> ExportResult<()> {
        self.begin_edit("set_export_range")?;
        if !t0.is_finite() || !t1.is_finite() {
            return Err(ExportError::invalid_range(t0, t1, "bounds must be finite"));
        }
        if t1 <= t0 {
            return Err(ExportError::invalid_range(t0, t1, "end must be after start"));
        }
        if t0 < 0.0 {
            return Err(ExportError::invalid_range(t0, t1, "start must not be negative"));
        }

        let rate = self.tracks.sample_rate();
        let frames = session::to_frames(t0, t1, rate);
        if frames.is_empty() {
            return Err(ExportError::invalid_range(t0, t1, "shorter than one sample"));
        }

        let mut effective_t0 = t0;
        if skip_leading_silence {
            let tracks =
                session::included_tracks(self.tracks.tracks(), selected_only, Some((t0, t1)));
            let first = session::first_audible_frame(
                &*self.tracks,
                &tracks,
                frames,
                self.config.chunk_frames,
                self.config.silence_threshold,
            )?;
            let Some(first) = first else {
                return Err(ExportError::invalid_range(t0, t1, "selection is silent"));
            };
            effective_t0 = (first as f64 / f64::from(rate)).max(t0);
            tracing::debug!(t0, effective_t0, "Skipped leading silence");
        }

        self.session.range = Some(ExportRange {
            t0: effective_t0,
            t1,
            requested_t0: t0,
            selected_only,
        });
        self.session.invalidate_routing();
        Ok(())
    }

    /// Override the downmix mode, or clear the override with `None`.
    pub fn set_downmix_override(&mut self, mode: Option<DownMixMode>) -> ExportResult<()> {
        self.begin_edit("set_downmix_override")?;
        self.session.downmix_override = mode;
        self.session.invalidate_routing();
        Ok(())
    }

    /// Force the number of output channels, or clear it with `None`.
    pub fn set_channel_count(&mut self, channels: Option<usize>) -> ExportResult<()> {
        self.begin_edit("set_channel_count")?;
        self.session.channel_count = channels;
        self.session.invalidate_routing();
        Ok(())
    }

    /// Use `matrix` instead of the resolved routing.
    ///
    /// It is checked against the track snapshot when the mixer spec is built.
    pub fn set_custom_routing(&mut self, matrix: RoutingMatrix) -> ExportResult<()> {
        self.begin_edit("set_custom_routing")?;
        self.session.custom_routing = Some(matrix);
        self.session.invalidate_routing();
        Ok(())
    }

    /// Go back to the resolved routing.
    pub fn clear_custom_routing(&mut self) -> ExportResult<()> {
        self.begin_edit("clear_custom_routing")?;
        self.session.custom_routing = None;
        self.session.invalidate_routing();
        Ok(())
    }

    /// Metadata tags handed to plugins that can embed them.
    pub fn set_metadata(&mut self, tags: BTreeMap<String, String>) -> ExportResult<()> {
        self.begin_edit("set_metadata")?;
        self.session.metadata = tags;
        Ok(())
    }

    /// Snapshot the tracks and resolve the routing matrix.
    ///
    /// Calling it again without changing the selection or format yields the
    /// same matrix.
    pub fn create_mixer_spec(&mut self) -> ExportResult<&MixerSpec> {
        self.begin_edit("create_mixer_spec")?;
        let constraint = self
            .current_sub_format()
            .map(|s| s.channels)
            .ok_or(ExportError::invalid_state("create_mixer_spec", self.state))?;

        let range = self.session.range;
        let tracks = session::included_tracks(
            self.tracks.tracks(),
            range.is_some_and(|r| r.selected_only),
            range.map(|r| (r.t0, r.t1)),
        );
        let layout = InputLayout::from_tracks(&tracks);
        let audible = layout.audible_count();
        if audible == 0 {
            return Err(ExportError::NoAudibleTracks);
        }

        let (mode, custom, matrix) = if let Some(matrix) = &self.session.custom_routing {
            check_custom_routing(matrix, &layout, &constraint)?;
            let mode = mode_for_count(matrix.output_channels(), audible);
            (mode, true, matrix.clone())
        } else if let Some(outputs) = self.session.channel_count {
            let matrix = mixdown::build_matrix(&layout.muted_mask(), outputs, &constraint)?;
            (mode_for_count(outputs, audible), false, matrix)
        } else {
            let decision = mixdown::decide_mode(
                audible,
                &constraint,
                self.session.downmix_override,
                &self.config.downmix,
            );
            if let Some(notice) = decision.notice {
                self.push_notice(notice);
            }
            let outputs = mixdown::output_channels(decision.mode, audible, &constraint);
            let matrix = mixdown::build_matrix(&layout.muted_mask(), outputs, &constraint)?;
            (decision.mode, false, matrix)
        };

        tracing::debug!(
            inputs = layout.len(),
            audible,
            outputs = matrix.output_channels(),
            ?mode,
            custom,
            "Created mixer spec"
        );
        Ok(self.session.mixer.insert(MixerSpec {
            tracks,
            layout,
            mode,
            custom,
            matrix,
        }))
    }

    /// Resolve the actual output path.
    ///
    /// The requested name gets the sub-format's extension unless it already
    /// has an accepted one. If the path exists and overwriting is disabled,
    /// `-1`, `-2`, ... is appended to the stem, taking the lowest free number.
    pub fn resolve_output_path(&mut self) -> ExportResult<PathBuf> {
        self.begin_edit("resolve_output_path")?;
        let (Some(sub), Some(requested)) =
            (self.current_sub_format(), self.session.requested_path.as_deref())
        else {
            return Err(ExportError::invalid_state("resolve_output_path", self.state));
        };

        let path = path::with_format_extension(requested, sub, &self.config.default_file_name);
        let path = if self.config.allow_overwrite {
            path
        } else {
            path::first_free_path(&*self.fs, &path)
        };
        tracing::debug!(path = %path.display(), "Resolved export output path");
        self.session.actual_path = Some(path.clone());
        Ok(path)
    }

    // ---------------------------------------------------------------------
    // Processing
    // ---------------------------------------------------------------------

    /// Run the configured export.
    ///
    /// Configuration problems are returned as `Err` before anything runs. Once
    /// the export starts, its end is reported exactly once through `listener`
    /// and returned as an [`ExportOutcome`]; a cancelled or failed export
    /// leaves no file behind.
    pub fn process(
        &mut self,
        listener: &mut dyn ExportProgressListener,
    ) -> ExportResult<ExportOutcome> {
        if !self.state.can_process() {
            return Err(ExportError::invalid_state("process", self.state));
        }
        let range = self
            .session
            .range
            .ok_or(ExportError::invalid_state("process", self.state))?;
        if self.session.mixer.is_none() {
            self.create_mixer_spec()?;
        }
        let path = self.resolve_output_path()?;

        self.control.reset_cancel();
        self.set_state(ExportState::Running);
        tracing::info!(path = %path.display(), t0 = range.t0, t1 = range.t1, "Starting export");

        let mut relay = ProgressRelay::new(listener, self.control.cancel_flag());
        for notice in self.notices.drain(..) {
            relay.notice(&notice);
        }

        let frames = range.frames(self.tracks.sample_rate());
        match self.run(&mut relay, &path, frames) {
            Ok(true) => {
                let channels = self.session.output_channels().unwrap_or_default();
                relay.completed();
                self.set_state(ExportState::Completed);
                self.remember_preferences(&path);
                tracing::info!(path = %path.display(), channels, "Export completed");
                Ok(ExportOutcome::Completed { path, channels })
            }
            Ok(false) => {
                relay.cancelled();
                self.set_state(ExportState::Cancelled);
                tracing::info!("Export cancelled");
                Ok(ExportOutcome::Cancelled)
            }
            Err(e) => {
                tracing::error!("Export failed: {e}");
                relay.failed(e.kind(), &e.to_string());
                self.set_state(ExportState::Failed);
                Ok(ExportOutcome::Failed(e))
            }
        }
    }

    /// Configure and run a fully specified export in one call.
    pub fn export_with(
        &mut self,
        listener: &mut dyn ExportProgressListener,
        request: ExportRequest,
    ) -> ExportResult<ExportOutcome> {
        let (plugin, sub_format) = self
            .find_plugin_by_extension(&request.extension)
            .ok_or_else(|| ExportError::UnsupportedExtension(request.extension.clone()))?;

        let mut path = request.file_name;
        if path.extension().is_none() {
            path.set_extension(request.extension.trim_start_matches('.'));
        }

        self.configure(path, plugin, sub_format)?;
        self.set_export_range(request.t0, request.t1, request.selected_only, false)?;
        self.set_channel_count(Some(request.channels))?;
        self.create_mixer_spec()?;
        self.process(listener)
    }

    /// Returns `Ok(true)` on completion and `Ok(false)` on cancellation. The
    /// output file is removed on every path except completion.
    fn run(
        &mut self,
        relay: &mut ProgressRelay<'_>,
        path: &Path,
        frames: std::ops::Range<u64>,
    ) -> ExportResult<bool> {
        let (Some(plugin_index), Some(sub_format)) = (self.session.plugin, self.session.sub_format)
        else {
            return Err(ExportError::invalid_state("process", self.state));
        };
        let Some(mixer) = self.session.mixer.as_ref() else {
            return Err(ExportError::invalid_state("process", self.state));
        };
        let plugin_id = self.descriptors[plugin_index].id();
        let plugin = &mut self.plugins[plugin_index];
        let channels = mixer.output_channels();
        let total_frames = frames.end - frames.start;

        let required = total_frames
            .saturating_mul(channels as u64)
            .saturating_mul(plugin.estimated_bytes_per_sample(sub_format));
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        if let Some(available) = self.fs.available_space(dir) {
            if available < required {
                return Err(ExportError::InsufficientDiskSpace {
                    required,
                    available,
                });
            }
        }

        let mut sink = self
            .fs
            .create(path)
            .map_err(|e| ExportError::filesystem(path, e))?;
        let output = PartialOutput::new(&*self.fs, path);

        let info = JobInfo {
            sub_format,
            channels,
            sample_rate: self.tracks.sample_rate(),
            total_frames,
        };
        let result = {
            let chunks = MixedChunks::new(
                &*self.tracks,
                &mixer.layout,
                &mixer.matrix,
                relay,
                frames,
                self.config.chunk_frames,
            );
            let mut job = ExportJob::new(info, path, &self.session.metadata, &mut *sink, chunks);
            plugin.export(&mut job)
        };
        let result = result
            .map_err(|e| e.into_export_error(plugin_id, path))
            .and_then(|()| sink.flush().map_err(|e| ExportError::filesystem(path, e)));
        drop(sink);

        result?;
        if relay.is_cancelled() {
            return Ok(false);
        }
        output.commit();
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Auto export
    // ---------------------------------------------------------------------

    /// Index of the last used plugin, or of the first plugin when the stored
    /// one is no longer registered.
    pub fn get_auto_export_format(&mut self) -> ExportResult<usize> {
        self.auto_export_format().map(|(index, _)| index)
    }

    /// Index of the last used sub-format for the auto export plugin, or 0 when
    /// the stored one is not valid for it.
    ///
    /// A stored sub-format only applies to the plugin it was saved with, so it
    /// is ignored whenever the stored plugin is missing or stale.
    pub fn get_auto_export_sub_format(&mut self) -> ExportResult<usize> {
        let (plugin, from_preferences) = self.auto_export_format()?;
        let Some(stored) = self.preferences.get(preferences::KEY_SUB_FORMAT) else {
            return Ok(0);
        };
        let count = self.plugins[plugin].sub_formats().len();
        match stored.trim().parse::<usize>() {
            Ok(index) if from_preferences && index < count => Ok(index),
            _ => {
                self.stale_preference(preferences::KEY_SUB_FORMAT, stored, "0".to_string());
                Ok(0)
            }
        }
    }

    /// Suggested output path: the last used directory and file name, with the
    /// auto export sub-format's extension unless the name already carries it.
    pub fn get_auto_export_file_name(&mut self) -> ExportResult<PathBuf> {
        let plugin = self.get_auto_export_format()?;
        let sub_format = self.get_auto_export_sub_format()?;

        let dir = self
            .preferences
            .get(preferences::KEY_DIRECTORY)
            .map_or_else(|| self.config.default_directory.clone(), PathBuf::from);
        let name = self
            .preferences
            .get(preferences::KEY_FILE_NAME)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.config.default_file_name.clone());

        let requested = dir.join(name);
        Ok(match self.plugins[plugin].sub_formats().get(sub_format) {
            Some(sub) => {
                path::with_format_extension(&requested, sub, &self.config.default_file_name)
            }
            None => requested,
        })
    }

    /// The auto export plugin index, and whether it came from the stored
    /// preference rather than the first-plugin fallback.
    fn auto_export_format(&mut self) -> ExportResult<(usize, bool)> {
        let Some(first) = self.descriptors.first().map(|d| d.id().to_string()) else {
            return Err(ExportError::InvalidPluginIndex { index: 0, count: 0 });
        };
        let Some(stored) = self.preferences.get(preferences::KEY_FORMAT) else {
            return Ok((0, false));
        };
        match self.descriptors.iter().position(|d| d.id() == stored) {
            Some(index) => Ok((index, true)),
            None => {
                self.stale_preference(preferences::KEY_FORMAT, stored, first);
                Ok((0, false))
            }
        }
    }

    /// Configure the session from the stored preferences.
    pub fn auto_configure(&mut self) -> ExportResult<()> {
        let path = self.get_auto_export_file_name()?;
        let plugin = self.get_auto_export_format()?;
        let sub_format = self.get_auto_export_sub_format()?;
        self.configure(path, plugin, sub_format)
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn set_state(&mut self, state: ExportState) {
        self.state = state;
        self.control.set_state(state);
    }

    /// Gate for operations that change the session. A finished session is
    /// replaced by a fresh one with fresh plugin instances.
    fn begin_edit(&mut self, operation: &'static str) -> ExportResult<()> {
        if self.state.is_running() {
            return Err(ExportError::invalid_state(operation, self.state));
        }
        if self.state.is_terminal() {
            tracing::debug!(previous = ?self.state, "Starting a new export session");
            self.session = ExportSession::default();
            self.instantiate_plugins();
            self.set_state(ExportState::Unconfigured);
        }
        Ok(())
    }

    fn instantiate_plugins(&mut self) {
        self.plugins = self.descriptors.iter().map(PluginDescriptor::instantiate).collect();
    }

    fn push_notice(&mut self, notice: Notice) {
        if !self.notices.contains(&notice) {
            self.notices.push(notice);
        }
    }

    fn stale_preference(&mut self, key: &str, value: String, fallback: String) {
        tracing::warn!(key, %value, %fallback, "Stored export preference is stale");
        self.push_notice(Notice::PreferenceStale {
            key: key.to_string(),
            value,
            fallback,
        });
    }

    fn remember_preferences(&self, path: &Path) {
        let (Some(plugin), Some(sub_format)) = (self.session.plugin, self.session.sub_format) else {
            return;
        };
        let file_name = self
            .session
            .requested_path
            .as_deref()
            .and_then(Path::file_name)
            .or_else(|| path.file_name())
            .map(|s| s.to_string_lossy().into_owned());
        let dir = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut entries = vec![
            (preferences::KEY_FORMAT, self.descriptors[plugin].id().to_string()),
            (preferences::KEY_SUB_FORMAT, sub_format.to_string()),
            (preferences::KEY_DIRECTORY, dir),
        ];
        if let Some(file_name) = file_name {
            entries.push((preferences::KEY_FILE_NAME, file_name));
        }
        for (key, value) in entries {
            if let Err(e) = self.preferences.set(key, &value) {
                tracing::warn!(key, "Failed to store export preference: {e}");
            }
        }
    }
}

fn check_custom_routing(
    matrix: &RoutingMatrix,
    layout: &InputLayout,
    constraint: &ChannelConstraint,
) -> ExportResult<()> {
    if matrix.input_channels() != layout.len() {
        return Err(ExportError::unsupported_mapping(
            layout.len(),
            matrix.output_channels(),
            format!("custom routing expects {} inputs", matrix.input_channels()),
        ));
    }
    if !constraint.allows(matrix.output_channels()) {
        return Err(ExportError::unsupported_mapping(
            layout.len(),
            matrix.output_channels(),
            format!("format accepts {constraint} channels"),
        ));
    }
    Ok(())
}

const fn mode_for_count(outputs: usize, audible: usize) -> DownMixMode {
    match outputs {
        1 if audible > 1 => DownMixMode::Mono,
        2 if audible != 2 => DownMixMode::Stereo,
        n if n == audible => DownMixMode::None,
        _ => DownMixMode::FormatDefined,
    }
}
