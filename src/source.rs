//! Sample-data collaborator: the tracks an export reads from.
//!
//! The exporter never owns audio. It asks a [`TrackProvider`] for a snapshot of
//! the track list (channel counts, time extents, selection, mute and solo) and
//! later pulls samples channel by channel. [`MemoryTracks`] is a simple
//! in-memory provider for hosts that keep whole tracks in `ndarray` buffers.

use std::io;

use ndarray::Array2;

/// Identifier of a track inside a [`TrackProvider`].
pub type TrackId = usize;

/// Snapshot of one track's export-relevant properties.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    /// Provider-assigned identifier.
    pub id: TrackId,
    /// Display name.
    pub name: String,
    /// Number of channels (1 for mono, 2 for stereo, ...).
    pub channels: usize,
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
    /// Whether the track is part of the user's selection.
    pub selected: bool,
    /// Whether the track is muted.
    pub muted: bool,
    /// Whether the track is soloed.
    pub solo: bool,
}

impl TrackInfo {
    /// Check if the track overlaps `[t0, t1)`.
    pub fn overlaps(&self, t0: f64, t1: f64) -> bool {
        self.start < t1 && self.end > t0
    }
}

/// Source of track metadata and samples.
pub trait TrackProvider: Send + Sync {
    /// Sample rate shared by every track, in Hz.
    fn sample_rate(&self) -> u32;

    /// Current track list.
    fn tracks(&self) -> Vec<TrackInfo>;

    /// Fill `out` with samples of `channel` of `track`, starting at project
    /// frame `start_frame`.
    ///
    /// Frames outside the track's extent read as silence.
    fn read(
        &self,
        track: TrackId,
        channel: usize,
        start_frame: u64,
        out: &mut [f32],
    ) -> io::Result<()>;
}

/// One input channel of an export, in routing-matrix column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputChannel {
    /// Track the channel belongs to.
    pub track: TrackId,
    /// Channel index within the track.
    pub channel: usize,
    /// Whether the channel is excluded from the mix.
    pub muted: bool,
}

/// The ordered input channels of an export, frozen when the mixer spec is built.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputLayout {
    channels: Vec<InputChannel>,
}

impl InputLayout {
    /// Build a layout from the tracks taking part in an export.
    ///
    /// A track is audible when it is not muted and either no track is soloed or
    /// it is soloed itself.
    pub fn from_tracks(tracks: &[TrackInfo]) -> Self {
        let any_solo = tracks.iter().any(|t| t.solo);
        let channels = tracks
            .iter()
            .flat_map(|track| {
                let muted = track.muted || (any_solo && !track.solo);
                (0..track.channels).map(move |channel| InputChannel {
                    track: track.id,
                    channel,
                    muted,
                })
            })
            .collect();
        Self { channels }
    }

    /// All input channels.
    pub fn channels(&self) -> &[InputChannel] {
        &self.channels
    }

    /// Total number of input channels, muted ones included.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if the layout has no channels at all.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Number of channels that take part in the mix.
    pub fn audible_count(&self) -> usize {
        self.channels.iter().filter(|c| !c.muted).count()
    }

    /// Mute flag per input channel, in column order.
    pub fn muted_mask(&self) -> Vec<bool> {
        self.channels.iter().map(|c| c.muted).collect()
    }
}

struct MemoryTrack {
    info: TrackInfo,
    // channels x frames
    data: Array2<f32>,
}

/// In-memory [`TrackProvider`].
pub struct MemoryTracks {
    sample_rate: u32,
    tracks: Vec<MemoryTrack>,
}

impl MemoryTracks {
    /// Create an empty provider.
    pub const fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            tracks: Vec::new(),
        }
    }

    /// Add a track whose `data` is laid out `channels x frames` and starts at
    /// `start` seconds. Returns the new track's id.
    pub fn add_track(&mut self, name: impl Into<String>, start: f64, data: Array2<f32>) -> TrackId {
        let id = self.tracks.len();
        let (channels, frames) = data.dim();
        let info = TrackInfo {
            id,
            name: name.into(),
            channels,
            start,
            end: start + frames as f64 / self.sample_rate as f64,
            selected: true,
            muted: false,
            solo: false,
        };
        self.tracks.push(MemoryTrack { info, data });
        id
    }

    /// Builder-style [`add_track`](Self::add_track).
    pub fn with_track(mut self, name: impl Into<String>, start: f64, data: Array2<f32>) -> Self {
        self.add_track(name, start, data);
        self
    }

    /// Change a track's selection flag.
    pub fn set_selected(&mut self, track: TrackId, selected: bool) {
        if let Some(t) = self.tracks.get_mut(track) {
            t.info.selected = selected;
        }
    }

    /// Change a track's mute flag.
    pub fn set_muted(&mut self, track: TrackId, muted: bool) {
        if let Some(t) = self.tracks.get_mut(track) {
            t.info.muted = muted;
        }
    }

    /// Change a track's solo flag.
    pub fn set_solo(&mut self, track: TrackId, solo: bool) {
        if let Some(t) = self.tracks.get_mut(track) {
            t.info.solo = solo;
        }
    }
}

impl TrackProvider for MemoryTracks {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks.iter().map(|t| t.info.clone()).collect()
    }

    fn read(
        &self,
        track: TrackId,
        channel: usize,
        start_frame: u64,
        out: &mut [f32],
    ) -> io::Result<()> {
        let t = self.tracks.get(track).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no track with id {track}"))
        })?;
        if channel >= t.info.channels {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("track {track} has no channel {channel}"),
            ));
        }

        out.fill(0.0);
        let offset = (t.info.start * self.sample_rate as f64).round() as i64;
        let samples = t.data.row(channel);
        for (i, slot) in out.iter_mut().enumerate() {
            let index = start_frame as i64 + i as i64 - offset;
            if index >= 0 && (index as usize) < samples.len() {
                *slot = samples[index as usize];
            }
        }
        Ok(())
    }
}
