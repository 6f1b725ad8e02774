//! Header-less interleaved 32-bit float output.

use crate::mixdown::ChannelConstraint;
use crate::plugin::{ExportJob, ExportPlugin, PluginError, SubFormat};

/// Writes native-endian `f32` samples, interleaved, with no header.
#[derive(Debug)]
pub struct RawPlugin {
    sub_formats: Vec<SubFormat>,
}

impl RawPlugin {
    /// Plugin identifier.
    pub const ID: &'static str = "raw";

    /// Create a plugin instance.
    pub fn new() -> Self {
        let sub = SubFormat::new(
            "Raw 32-bit float",
            "raw",
            ChannelConstraint::Range { min: 1, max: 32 },
        )
        .with_description("Header-less native-endian 32-bit float")
        .with_extension("pcm");
        Self {
            sub_formats: vec![sub],
        }
    }
}

impl Default for RawPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportPlugin for RawPlugin {
    fn sub_formats(&self) -> &[SubFormat] {
        &self.sub_formats
    }

    fn export(&mut self, job: &mut ExportJob<'_>) -> Result<(), PluginError> {
        let (sink, chunks) = job.split();
        for chunk in chunks {
            let chunk = chunk?;
            let chunk = chunk.as_standard_layout();
            let samples = chunk
                .as_slice()
                .ok_or_else(|| PluginError::encode("chunk is not contiguous"))?;
            sink.write_all(bytemuck::cast_slice(samples))?;
        }
        sink.flush()?;
        Ok(())
    }
}
