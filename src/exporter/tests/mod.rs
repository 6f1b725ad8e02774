//! Scenario tests for the export orchestrator.
//!
//! Fixtures shared by the test modules live here: an in-memory track set, a
//! scriptable format plugin, a recording progress listener and file systems
//! and track sources that fail on demand.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::Array2;
use parking_lot::Mutex;

use super::{Exporter, ExporterBuilder};
use crate::error::{ErrorKind, Notice};
use crate::fs::{LocalFileSystem, OutputFileSystem, OutputSink};
use crate::mixdown::ChannelConstraint;
use crate::plugin::{ExportJob, ExportPlugin, PluginError, SubFormat};
use crate::progress::{ExportProgressListener, ProgressResult};
use crate::registry::{PluginDescriptor, Registry};
use crate::source::{MemoryTracks, TrackId, TrackInfo, TrackProvider};

mod configuration_tests;

pub(crate) const RATE: u32 = 100;

/// Tracks of constant value, `seconds` long, one per entry of `channels`.
pub(crate) fn constant_tracks(channels: &[usize], seconds: f64, value: f32) -> MemoryTracks {
    let frames = (seconds * RATE as f64).round() as usize;
    channels
        .iter()
        .enumerate()
        .fold(MemoryTracks::new(RATE), |tracks, (i, &c)| {
            tracks.with_track(format!("track {i}"), 0.0, Array2::from_elem((c, frames), value))
        })
}

/// What the scripted plugin saw during its exports.
#[derive(Debug, Default)]
pub(crate) struct PluginLog {
    pub instances: usize,
    pub exports: usize,
    pub channels: Vec<usize>,
    pub frames: u64,
    pub first_sample: Option<f32>,
    pub metadata: Vec<(String, String)>,
}

/// Format plugin writing raw `f32` and recording what it receives.
pub(crate) struct ScriptedPlugin {
    subs: Vec<SubFormat>,
    fail_after_chunks: Option<usize>,
    log: Arc<Mutex<PluginLog>>,
}

impl ExportPlugin for ScriptedPlugin {
    fn sub_formats(&self) -> &[SubFormat] {
        &self.subs
    }

    fn export(&mut self, job: &mut ExportJob<'_>) -> Result<(), PluginError> {
        let info = job.info();
        {
            let mut log = self.log.lock();
            log.exports += 1;
            log.channels.push(info.channels);
            log.metadata = job
                .metadata()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
        }

        let (sink, chunks) = job.split();
        for (i, chunk) in chunks.enumerate() {
            if self.fail_after_chunks == Some(i) {
                return Err(PluginError::encode("scripted failure"));
            }
            let chunk = chunk?;
            let mut log = self.log.lock();
            log.frames += chunk.nrows() as u64;
            if log.first_sample.is_none() {
                log.first_sample = chunk.iter().next().copied();
            }
            for &s in chunk.iter() {
                sink.write_all(&s.to_ne_bytes())?;
            }
        }
        Ok(())
    }
}

/// Builds descriptors for [`ScriptedPlugin`] sharing one log.
#[derive(Clone)]
pub(crate) struct ScriptedFormat {
    pub id: &'static str,
    pub subs: Vec<SubFormat>,
    pub fail_after_chunks: Option<usize>,
    pub log: Arc<Mutex<PluginLog>>,
}

impl ScriptedFormat {
    pub fn new(id: &'static str, subs: Vec<SubFormat>) -> Self {
        Self {
            id,
            subs,
            fail_after_chunks: None,
            log: Arc::new(Mutex::new(PluginLog::default())),
        }
    }

    /// A format that only writes mono.
    pub fn mono(id: &'static str) -> Self {
        Self::new(
            id,
            vec![SubFormat::new("Mono", id, ChannelConstraint::Fixed(1))],
        )
    }

    /// A format accepting 1 to 8 channels, with a metadata-capable second
    /// sub-format.
    pub fn flexible(id: &'static str) -> Self {
        let channels = ChannelConstraint::Range { min: 1, max: 8 };
        Self::new(
            id,
            vec![
                SubFormat::new("Plain", id, channels),
                SubFormat::new("Tagged", id, channels).with_metadata(),
            ],
        )
    }

    pub fn failing_after(mut self, chunks: usize) -> Self {
        self.fail_after_chunks = Some(chunks);
        self
    }

    pub fn descriptor(&self) -> PluginDescriptor {
        let this = self.clone();
        PluginDescriptor::new(self.id, move || {
            this.log.lock().instances += 1;
            Box::new(ScriptedPlugin {
                subs: this.subs.clone(),
                fail_after_chunks: this.fail_after_chunks,
                log: Arc::clone(&this.log),
            })
        })
    }
}

pub(crate) fn registry_with(formats: &[&ScriptedFormat]) -> Registry {
    let registry = Registry::new();
    for format in formats {
        registry.register(format.descriptor()).unwrap();
    }
    registry
}

pub(crate) fn exporter_for(
    tracks: impl TrackProvider + 'static,
    registry: &Registry,
) -> ExporterBuilder {
    Exporter::builder(Arc::new(tracks)).registry(registry)
}

/// Listener recording every callback, optionally cancelling at a fraction.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    pub fractions: Vec<f64>,
    pub completed: usize,
    pub cancelled: usize,
    pub failed: Vec<ErrorKind>,
    pub notices: Vec<Notice>,
    pub cancel_at: Option<f64>,
}

impl Recorder {
    pub fn cancelling_at(fraction: f64) -> Self {
        Self {
            cancel_at: Some(fraction),
            ..Self::default()
        }
    }

    pub fn terminal_events(&self) -> usize {
        self.completed + self.cancelled + self.failed.len()
    }
}

impl ExportProgressListener for Recorder {
    fn on_progress(&mut self, fraction: f64) -> ProgressResult {
        self.fractions.push(fraction);
        match self.cancel_at {
            Some(at) if fraction >= at => ProgressResult::Cancel,
            _ => ProgressResult::Continue,
        }
    }

    fn on_completed(&mut self) {
        self.completed += 1;
    }

    fn on_cancelled(&mut self) {
        self.cancelled += 1;
    }

    fn on_failed(&mut self, kind: ErrorKind, _detail: &str) {
        self.failed.push(kind);
    }

    fn on_notice(&mut self, notice: &Notice) {
        self.notices.push(notice.clone());
    }
}

/// Local file system reporting a fixed amount of free space.
pub(crate) struct LimitedSpace {
    pub available: u64,
}

impl OutputFileSystem for LimitedSpace {
    fn exists(&self, path: &Path) -> bool {
        LocalFileSystem.exists(path)
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn OutputSink>> {
        LocalFileSystem.create(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        LocalFileSystem.remove(path)
    }

    fn available_space(&self, _dir: &Path) -> Option<u64> {
        Some(self.available)
    }
}

/// File system whose `create` always fails.
pub(crate) struct ReadOnlyFs;

impl OutputFileSystem for ReadOnlyFs {
    fn exists(&self, _path: &Path) -> bool {
        false
    }

    fn create(&self, _path: &Path) -> io::Result<Box<dyn OutputSink>> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
    }

    fn remove(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// Track source that serves `reads` channel reads, then fails every read.
pub(crate) struct FailingTracks {
    inner: MemoryTracks,
    reads_left: AtomicUsize,
}

impl FailingTracks {
    pub fn after(reads: usize, inner: MemoryTracks) -> Self {
        Self {
            inner,
            reads_left: AtomicUsize::new(reads),
        }
    }
}

impl TrackProvider for FailingTracks {
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        self.inner.tracks()
    }

    fn read(
        &self,
        track: TrackId,
        channel: usize,
        start_frame: u64,
        out: &mut [f32],
    ) -> io::Result<()> {
        let served = self
            .reads_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if served.is_err() {
            return Err(io::Error::other("device unplugged"));
        }
        self.inner.read(track, channel, start_frame, out)
    }
}

/// File sink that accepts `remaining` bytes, then reports a full disk.
pub(crate) struct FillingSink {
    file: File,
    remaining: usize,
}

impl Write for FillingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::from(io::ErrorKind::StorageFull));
        }
        let len = buf.len().min(self.remaining);
        let written = self.file.write(&buf[..len])?;
        self.remaining -= written;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for FillingSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Local file system whose files fill up after `capacity` bytes, without
/// reporting free space up front.
pub(crate) struct FillingFs {
    pub capacity: usize,
}

impl OutputFileSystem for FillingFs {
    fn exists(&self, path: &Path) -> bool {
        LocalFileSystem.exists(path)
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn OutputSink>> {
        Ok(Box::new(FillingSink {
            file: File::create(path)?,
            remaining: self.capacity,
        }))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        LocalFileSystem.remove(path)
    }
}
