//! Built-in export formats.
//!
//! - [`WavPlugin`] (`"wav"`): 16-bit, 24-bit and float WAV through `hound`.
//! - [`RawPlugin`] (`"raw"`): header-less interleaved `f32`, placed after WAV.
//!
//! Hosts with their own encoders register additional plugins next to these.

mod raw;
mod wav;

pub use raw::RawPlugin;
pub use wav::WavPlugin;

use crate::error::{ExportError, ExportResult};
use crate::registry::{Placement, PluginDescriptor, Registry};

/// Descriptors of the built-in formats.
pub fn builtin_descriptors() -> Vec<PluginDescriptor> {
    vec![
        PluginDescriptor::new(WavPlugin::ID, || Box::new(WavPlugin::new())),
        PluginDescriptor::new(RawPlugin::ID, || Box::new(RawPlugin::new()))
            .with_placement(Placement::after(WavPlugin::ID)),
    ]
}

/// Register the built-in formats with `registry`.
///
/// Safe to call from several initialization sites: identifiers that are
/// already registered are skipped.
pub fn register_builtin(registry: &Registry) -> ExportResult<()> {
    for descriptor in builtin_descriptors() {
        if registry.contains(descriptor.id()) {
            continue;
        }
        match registry.register(descriptor) {
            Ok(()) | Err(ExportError::DuplicateIdentifier(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
