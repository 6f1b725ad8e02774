use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::error::{ExportError, ExportResult};
use crate::mixdown::{DownMixMode, RoutingMatrix};
use crate::source::{InputLayout, TrackInfo, TrackProvider};

/// The time selection of an export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportRange {
    /// Effective start in seconds, after skipping leading silence.
    pub t0: f64,
    /// End in seconds, exclusive.
    pub t1: f64,
    /// Start as requested by the caller.
    pub requested_t0: f64,
    /// Only tracks marked as selected take part.
    pub selected_only: bool,
}

impl ExportRange {
    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.t1 - self.t0
    }

    /// The range in frames at `sample_rate`.
    pub fn frames(&self, sample_rate: u32) -> Range<u64> {
        to_frames(self.t0, self.t1, sample_rate)
    }
}

pub(crate) fn to_frames(t0: f64, t1: f64, sample_rate: u32) -> Range<u64> {
    let rate = f64::from(sample_rate);
    let start = (t0 * rate).round().max(0.0) as u64;
    let end = (t1 * rate).round().max(0.0) as u64;
    start..end.max(start)
}

/// Channel routing frozen for one export.
#[derive(Debug, Clone, PartialEq)]
pub struct MixerSpec {
    /// Track snapshot taken when the spec was built.
    pub tracks: Vec<TrackInfo>,
    /// Input channels in matrix column order.
    pub layout: InputLayout,
    /// The resolved downmix mode.
    pub mode: DownMixMode,
    /// Whether the matrix was supplied by the caller.
    pub custom: bool,
    /// Output x input routing weights.
    pub matrix: RoutingMatrix,
}

impl MixerSpec {
    /// Total input channels, muted ones included.
    pub fn input_channels(&self) -> usize {
        self.layout.len()
    }

    /// Number of output channels.
    pub fn output_channels(&self) -> usize {
        self.matrix.output_channels()
    }
}

/// Mutable state of one export session.
#[derive(Debug, Clone, Default)]
pub struct ExportSession {
    pub(crate) range: Option<ExportRange>,
    pub(crate) plugin: Option<usize>,
    pub(crate) sub_format: Option<usize>,
    pub(crate) requested_path: Option<PathBuf>,
    pub(crate) actual_path: Option<PathBuf>,
    pub(crate) downmix_override: Option<DownMixMode>,
    pub(crate) channel_count: Option<usize>,
    pub(crate) custom_routing: Option<RoutingMatrix>,
    pub(crate) metadata: BTreeMap<String, String>,
    pub(crate) mixer: Option<MixerSpec>,
}

impl ExportSession {
    /// The selection, if set.
    pub const fn range(&self) -> Option<&ExportRange> {
        self.range.as_ref()
    }

    /// Index of the chosen plugin.
    pub const fn plugin_index(&self) -> Option<usize> {
        self.plugin
    }

    /// Index of the chosen sub-format.
    pub const fn sub_format_index(&self) -> Option<usize> {
        self.sub_format
    }

    /// Output path as requested by the caller.
    pub fn requested_path(&self) -> Option<&Path> {
        self.requested_path.as_deref()
    }

    /// Output path after extension and collision resolution.
    pub fn actual_path(&self) -> Option<&Path> {
        self.actual_path.as_deref()
    }

    /// User downmix override.
    pub const fn downmix_override(&self) -> Option<DownMixMode> {
        self.downmix_override
    }

    /// Forced output channel count.
    pub const fn channel_count(&self) -> Option<usize> {
        self.channel_count
    }

    /// Caller-supplied routing matrix.
    pub const fn custom_routing(&self) -> Option<&RoutingMatrix> {
        self.custom_routing.as_ref()
    }

    /// Metadata tags handed to the plugin.
    pub const fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// The resolved routing, if built.
    pub const fn mixer_spec(&self) -> Option<&MixerSpec> {
        self.mixer.as_ref()
    }

    /// Total input channel count of the resolved routing.
    pub fn input_channels(&self) -> Option<usize> {
        self.mixer.as_ref().map(MixerSpec::input_channels)
    }

    /// Output channel count of the resolved routing.
    pub fn output_channels(&self) -> Option<usize> {
        self.mixer.as_ref().map(MixerSpec::output_channels)
    }

    pub(crate) fn invalidate_routing(&mut self) {
        self.mixer = None;
        self.actual_path = None;
    }
}

/// The tracks taking part in an export over `[t0, t1)`.
pub(crate) fn included_tracks(
    tracks: Vec<TrackInfo>,
    selected_only: bool,
    range: Option<(f64, f64)>,
) -> Vec<TrackInfo> {
    tracks
        .into_iter()
        .filter(|t| !selected_only || t.selected)
        .filter(|t| range.is_none_or(|(t0, t1)| t.overlaps(t0, t1)))
        .collect()
}

/// First frame in `frames` where any channel of `tracks` exceeds `threshold`.
///
/// Muted tracks are scanned too: their time extent still counts towards the
/// selection.
pub(crate) fn first_audible_frame(
    source: &dyn TrackProvider,
    tracks: &[TrackInfo],
    frames: Range<u64>,
    chunk_frames: usize,
    threshold: f32,
) -> ExportResult<Option<u64>> {
    let chunk_frames = chunk_frames.max(1);
    let mut buffer = vec![0.0f32; chunk_frames];
    let mut start = frames.start;

    while start < frames.end {
        let len = (frames.end - start).min(chunk_frames as u64) as usize;
        let scratch = &mut buffer[..len];
        let mut first: Option<usize> = None;

        for track in tracks {
            for channel in 0..track.channels {
                source
                    .read(track.id, channel, start, scratch)
                    .map_err(|e| {
                        ExportError::SampleReadFailure(format!(
                            "track {} channel {channel}: {e}",
                            track.id
                        ))
                    })?;
                let limit = first.unwrap_or(len);
                if let Some(i) = scratch[..limit].iter().position(|s| s.abs() > threshold) {
                    first = Some(i);
                }
            }
        }

        if let Some(i) = first {
            return Ok(Some(start + i as u64));
        }
        start += len as u64;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryTracks;
    use ndarray::Array2;

    #[test]
    fn test_frames_round_to_nearest() {
        assert_eq!(to_frames(0.0, 10.0, 100), 0..1000);
        assert_eq!(to_frames(0.004, 0.016, 100), 0..2);
    }

    #[test]
    fn test_first_audible_frame_across_chunks() {
        let mut a = Array2::<f32>::zeros((1, 40));
        a[[0, 25]] = 0.5;
        let mut b = Array2::<f32>::zeros((2, 40));
        b[[1, 30]] = -0.5;
        let source = MemoryTracks::new(10)
            .with_track("a", 0.0, a)
            .with_track("b", 0.0, b);
        let tracks = source.tracks();

        let found = first_audible_frame(&source, &tracks, 0..40, 8, 0.0).unwrap();
        assert_eq!(found, Some(25));
        let found = first_audible_frame(&source, &tracks, 26..40, 8, 0.0).unwrap();
        assert_eq!(found, Some(30));
        let found = first_audible_frame(&source, &tracks, 31..40, 8, 0.0).unwrap();
        assert_eq!(found, None);
        let found = first_audible_frame(&source, &tracks, 0..40, 8, 0.6).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_included_tracks_filters_selection_and_range() {
        let mut source = MemoryTracks::new(10)
            .with_track("a", 0.0, Array2::zeros((1, 10)))
            .with_track("b", 5.0, Array2::zeros((1, 10)));
        source.set_selected(0, false);

        let all = included_tracks(source.tracks(), false, None);
        assert_eq!(all.len(), 2);
        let selected = included_tracks(source.tracks(), true, None);
        assert_eq!(selected.len(), 1);
        let early = included_tracks(source.tracks(), false, Some((0.0, 2.0)));
        assert_eq!(early.iter().map(|t| t.id).collect::<Vec<_>>(), vec![0]);
    }
}
