//! WAV output via `hound`.

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::mixdown::ChannelConstraint;
use crate::plugin::{ExportJob, ExportPlugin, PluginError, SubFormat};

const MAX_CHANNELS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Pcm16,
    Pcm24,
    Float32,
}

impl Encoding {
    const ALL: [Self; 3] = [Self::Pcm16, Self::Pcm24, Self::Float32];

    const fn bits(self) -> u16 {
        match self {
            Self::Pcm16 => 16,
            Self::Pcm24 => 24,
            Self::Float32 => 32,
        }
    }

    const fn sample_format(self) -> SampleFormat {
        match self {
            Self::Float32 => SampleFormat::Float,
            Self::Pcm16 | Self::Pcm24 => SampleFormat::Int,
        }
    }

    fn sub_format(self) -> SubFormat {
        let channels = ChannelConstraint::Range {
            min: 1,
            max: MAX_CHANNELS,
        };
        let (name, description) = match self {
            Self::Pcm16 => ("WAV 16-bit PCM", "WAV (Microsoft) signed 16-bit PCM"),
            Self::Pcm24 => ("WAV 24-bit PCM", "WAV (Microsoft) signed 24-bit PCM"),
            Self::Float32 => ("WAV 32-bit float", "WAV (Microsoft) 32-bit float"),
        };
        SubFormat::new(name, "wav", channels).with_description(description)
    }
}

/// Writes RIFF/WAVE files.
#[derive(Debug)]
pub struct WavPlugin {
    sub_formats: Vec<SubFormat>,
}

impl WavPlugin {
    /// Plugin identifier.
    pub const ID: &'static str = "wav";

    /// Create a plugin instance.
    pub fn new() -> Self {
        Self {
            sub_formats: Encoding::ALL.iter().map(|e| e.sub_format()).collect(),
        }
    }
}

impl Default for WavPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn map_hound(e: hound::Error) -> PluginError {
    match e {
        hound::Error::IoError(io) => PluginError::Io(io),
        other => PluginError::encode(other.to_string()),
    }
}

#[inline]
fn to_int(sample: f32, scale: f32) -> i32 {
    (sample.clamp(-1.0, 1.0) * scale).round() as i32
}

impl ExportPlugin for WavPlugin {
    fn sub_formats(&self) -> &[SubFormat] {
        &self.sub_formats
    }

    fn export(&mut self, job: &mut ExportJob<'_>) -> Result<(), PluginError> {
        let info = job.info();
        let encoding = *Encoding::ALL
            .get(info.sub_format)
            .ok_or_else(|| PluginError::encode(format!("no WAV sub-format {}", info.sub_format)))?;
        let channels = u16::try_from(info.channels)
            .map_err(|_| PluginError::encode(format!("{} channels", info.channels)))?;

        let spec = WavSpec {
            channels,
            sample_rate: info.sample_rate,
            bits_per_sample: encoding.bits(),
            sample_format: encoding.sample_format(),
        };

        let (sink, chunks) = job.split();
        let mut writer = WavWriter::new(sink, spec).map_err(map_hound)?;
        for chunk in chunks {
            let chunk = chunk?;
            // row-major frames x channels iterates interleaved
            for &sample in chunk.iter() {
                match encoding {
                    Encoding::Pcm16 => writer.write_sample(to_int(sample, 32_767.0) as i16),
                    Encoding::Pcm24 => writer.write_sample(to_int(sample, 8_388_607.0)),
                    Encoding::Float32 => writer.write_sample(sample),
                }
                .map_err(map_hound)?;
            }
        }
        writer.finalize().map_err(map_hound)
    }

    fn estimated_bytes_per_sample(&self, sub_format: usize) -> u64 {
        Encoding::ALL
            .get(sub_format)
            .map_or(4, |e| u64::from(e.bits() / 8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_formats() {
        let plugin = WavPlugin::new();
        let subs = plugin.sub_formats();
        assert_eq!(subs.len(), 3);
        assert!(subs.iter().all(|s| s.extension() == "wav" && !s.metadata));
        assert!(subs[0].channels.allows(1));
        assert!(subs[0].channels.allows(MAX_CHANNELS));
        assert!(!subs[0].channels.allows(MAX_CHANNELS + 1));
        assert_eq!(plugin.estimated_bytes_per_sample(0), 2);
        assert_eq!(plugin.estimated_bytes_per_sample(1), 3);
        assert_eq!(plugin.estimated_bytes_per_sample(2), 4);
    }

    #[test]
    fn test_int_conversion_clamps() {
        assert_eq!(to_int(1.5, 32_767.0), 32_767);
        assert_eq!(to_int(-2.0, 32_767.0), -32_767);
        assert_eq!(to_int(0.5, 32_767.0), 16_384);
    }
}
