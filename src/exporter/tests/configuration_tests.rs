//! Configuring a session: indices, ranges, routing and output paths.

use std::sync::Arc;

use approx_eq::assert_approx_eq;
use ndarray::{Array2, array};

use super::*;
use crate::config::ExportConfig;
use crate::error::ExportError;
use crate::exporter::ExportState;
use crate::mixdown::{DownMixMode, DownMixPolicy, RoutingMatrix};

#[test]
fn test_configure_validates_indices() {
    let format = ScriptedFormat::flexible("flex");
    let registry = registry_with(&[&format]);
    let mut exporter = exporter_for(constant_tracks(&[1], 1.0, 0.5), &registry).build();
    assert_eq!(exporter.state(), ExportState::Unconfigured);

    assert!(matches!(
        exporter.configure("out", 1, 0),
        Err(ExportError::InvalidPluginIndex { index: 1, count: 1 })
    ));
    assert!(matches!(
        exporter.configure("out", 0, 2),
        Err(ExportError::InvalidSubFormatIndex { index: 2, count: 2, .. })
    ));
    assert_eq!(exporter.state(), ExportState::Unconfigured);

    exporter.configure("out", 0, 1).unwrap();
    assert_eq!(exporter.state(), ExportState::Configured);
    assert_eq!(exporter.control().state(), ExportState::Configured);
    assert!(exporter.can_metadata());

    exporter.configure("out", 0, 0).unwrap();
    assert_eq!(exporter.state(), ExportState::Configured);
    assert!(!exporter.can_metadata());
}

#[test]
fn test_inverted_range_is_rejected() {
    let format = ScriptedFormat::mono("mono");
    let registry = registry_with(&[&format]);
    let mut exporter = exporter_for(constant_tracks(&[1], 10.0, 0.5), &registry).build();

    let err = exporter.set_export_range(5.0, 2.0, false, false).unwrap_err();
    assert!(matches!(err, ExportError::InvalidRange { .. }));
    assert!(exporter.set_export_range(2.0, 2.0, false, false).is_err());
    assert!(exporter.set_export_range(-1.0, 2.0, false, false).is_err());
    assert!(exporter.set_export_range(0.0, f64::INFINITY, false, false).is_err());
    assert!(exporter.session().range().is_none());
}

#[test]
fn test_process_requires_configuration() {
    let format = ScriptedFormat::mono("mono");
    let registry = registry_with(&[&format]);
    let mut exporter = exporter_for(constant_tracks(&[1], 1.0, 0.5), &registry).build();
    let mut recorder = Recorder::default();

    assert!(matches!(
        exporter.process(&mut recorder),
        Err(ExportError::InvalidState { operation: "process", .. })
    ));
    assert!(matches!(
        exporter.create_mixer_spec(),
        Err(ExportError::InvalidState { .. })
    ));

    // configured but no range yet
    exporter.configure("out", 0, 0).unwrap();
    assert!(matches!(
        exporter.process(&mut recorder),
        Err(ExportError::InvalidState { .. })
    ));
    assert_eq!(recorder.terminal_events(), 0);
}

#[test]
fn test_fixed_mono_format_overrides_stereo_request() {
    let format = ScriptedFormat::mono("mono");
    let registry = registry_with(&[&format]);
    let mut exporter = exporter_for(constant_tracks(&[2], 1.0, 0.5), &registry).build();
    exporter.configure("out", 0, 0).unwrap();
    exporter.set_downmix_override(Some(DownMixMode::Stereo)).unwrap();

    let spec = exporter.create_mixer_spec().unwrap();
    assert_eq!(spec.mode, DownMixMode::FormatDefined);
    assert_eq!(spec.output_channels(), 1);
    assert_approx_eq!(spec.matrix.weight(0, 0) as f64, 0.5, 1e-6);
    assert_approx_eq!(spec.matrix.weight(0, 1) as f64, 0.5, 1e-6);

    assert!(matches!(
        exporter.notices(),
        [Notice::ChannelConflict {
            requested: DownMixMode::Stereo,
            ..
        }]
    ));
}

#[test]
fn test_create_mixer_spec_is_idempotent() {
    let format = ScriptedFormat::mono("mono");
    let registry = registry_with(&[&format]);
    let mut exporter = exporter_for(constant_tracks(&[2, 1], 1.0, 0.5), &registry).build();
    exporter.configure("out", 0, 0).unwrap();
    exporter.set_downmix_override(Some(DownMixMode::Stereo)).unwrap();
    exporter.set_export_range(0.0, 1.0, false, false).unwrap();

    let first = exporter.create_mixer_spec().unwrap().clone();
    let second = exporter.create_mixer_spec().unwrap().clone();
    assert_eq!(first, second);
    assert_eq!(first.input_channels(), 3);
    assert_eq!(exporter.notices().len(), 1);
}

#[test]
fn test_default_policy_collapses_surround_to_stereo() {
    let format = ScriptedFormat::flexible("flex");
    let registry = registry_with(&[&format]);

    let mut exporter = exporter_for(constant_tracks(&[6], 1.0, 0.5), &registry).build();
    exporter.configure("out", 0, 0).unwrap();
    let spec = exporter.create_mixer_spec().unwrap();
    assert_eq!(spec.mode, DownMixMode::Stereo);
    assert_eq!(spec.output_channels(), 2);

    let config = ExportConfig {
        downmix: DownMixPolicy::pass_through(),
        ..ExportConfig::default()
    };
    let mut exporter = Exporter::builder(Arc::new(constant_tracks(&[6], 1.0, 0.5)))
        .registry(&registry)
        .config(config)
        .build();
    exporter.configure("out", 0, 0).unwrap();
    assert_eq!(exporter.create_mixer_spec().unwrap().output_channels(), 6);
}

#[test]
fn test_muted_and_soloed_tracks() {
    let format = ScriptedFormat::flexible("flex");
    let registry = registry_with(&[&format]);

    let mut tracks = constant_tracks(&[1, 1, 1], 1.0, 0.5);
    tracks.set_muted(1, true);
    let mut exporter = exporter_for(tracks, &registry).build();
    exporter.configure("out", 0, 0).unwrap();
    exporter.set_downmix_override(Some(DownMixMode::Mono)).unwrap();
    let spec = exporter.create_mixer_spec().unwrap();
    assert_eq!(spec.input_channels(), 3);
    assert_eq!(spec.matrix.weight(0, 1), 0.0);
    assert_approx_eq!(spec.matrix.weight(0, 0) as f64, 0.5, 1e-6);
    assert_approx_eq!(spec.matrix.weight(0, 2) as f64, 0.5, 1e-6);

    let mut tracks = constant_tracks(&[1, 1, 1], 1.0, 0.5);
    tracks.set_solo(2, true);
    let mut exporter = exporter_for(tracks, &registry).build();
    exporter.configure("out", 0, 0).unwrap();
    let spec = exporter.create_mixer_spec().unwrap();
    assert_eq!(spec.layout.audible_count(), 1);
    assert_eq!(spec.output_channels(), 1);
    assert_eq!(spec.matrix.weight(0, 2), 1.0);
}

#[test]
fn test_all_muted_selection_has_nothing_to_export() {
    let format = ScriptedFormat::flexible("flex");
    let registry = registry_with(&[&format]);
    let mut tracks = constant_tracks(&[2], 1.0, 0.5);
    tracks.set_muted(0, true);
    let mut exporter = exporter_for(tracks, &registry).build();
    exporter.configure("out", 0, 0).unwrap();
    assert!(matches!(
        exporter.create_mixer_spec(),
        Err(ExportError::NoAudibleTracks)
    ));
}

#[test]
fn test_selected_only_and_range_filter_tracks() {
    let format = ScriptedFormat::flexible("flex");
    let registry = registry_with(&[&format]);
    let mut tracks = constant_tracks(&[1, 2], 1.0, 0.5)
        .with_track("late", 5.0, Array2::from_elem((1, 100), 0.5));
    tracks.set_selected(1, false);
    let mut exporter = exporter_for(tracks, &registry).build();
    exporter.configure("out", 0, 0).unwrap();

    exporter.set_export_range(0.0, 1.0, true, false).unwrap();
    assert_eq!(exporter.create_mixer_spec().unwrap().input_channels(), 1);

    exporter.set_export_range(0.0, 1.0, false, false).unwrap();
    assert_eq!(exporter.create_mixer_spec().unwrap().input_channels(), 3);

    exporter.set_export_range(0.0, 10.0, false, false).unwrap();
    assert_eq!(exporter.create_mixer_spec().unwrap().input_channels(), 4);
}

#[test]
fn test_custom_routing_is_checked_against_snapshot() {
    let format = ScriptedFormat::flexible("flex");
    let registry = registry_with(&[&format]);
    let mut exporter = exporter_for(constant_tracks(&[2], 1.0, 0.5), &registry).build();
    exporter.configure("out", 0, 0).unwrap();

    exporter
        .set_custom_routing(RoutingMatrix::from_weights(array![[1.0f32, 0.0, 0.0]]).unwrap())
        .unwrap();
    assert!(matches!(
        exporter.create_mixer_spec(),
        Err(ExportError::UnsupportedChannelMapping { .. })
    ));

    let swap = RoutingMatrix::from_weights(array![[0.0f32, 1.0], [1.0, 0.0]]).unwrap();
    exporter.set_custom_routing(swap.clone()).unwrap();
    let spec = exporter.create_mixer_spec().unwrap();
    assert!(spec.custom);
    assert_eq!(spec.matrix, swap);

    exporter.clear_custom_routing().unwrap();
    assert!(!exporter.create_mixer_spec().unwrap().custom);
}

#[test]
fn test_channel_count_outside_format_is_rejected() {
    let format = ScriptedFormat::mono("mono");
    let registry = registry_with(&[&format]);
    let mut exporter = exporter_for(constant_tracks(&[2], 1.0, 0.5), &registry).build();
    exporter.configure("out", 0, 0).unwrap();
    exporter.set_channel_count(Some(2)).unwrap();
    assert!(matches!(
        exporter.create_mixer_spec(),
        Err(ExportError::UnsupportedChannelMapping { outputs: 2, .. })
    ));
}

#[test]
fn test_skip_leading_silence_moves_start() {
    let format = ScriptedFormat::mono("mono");
    let registry = registry_with(&[&format]);
    let mut data = Array2::<f32>::zeros((1, 1000));
    data.slice_mut(ndarray::s![.., 250..]).fill(0.25);
    let tracks = MemoryTracks::new(RATE).with_track("a", 0.0, data);
    let mut exporter = exporter_for(tracks, &registry).build();

    exporter.set_export_range(1.0, 10.0, false, true).unwrap();
    let range = *exporter.session().range().unwrap();
    assert_approx_eq!(range.t0, 2.5, 1e-9);
    assert_approx_eq!(range.requested_t0, 1.0, 1e-9);
    assert_approx_eq!(range.t1, 10.0, 1e-9);

    exporter.set_export_range(3.0, 10.0, false, true).unwrap();
    assert_approx_eq!(exporter.session().range().unwrap().t0, 3.0, 1e-9);

    assert!(matches!(
        exporter.set_export_range(0.0, 2.0, false, true),
        Err(ExportError::InvalidRange { .. })
    ));
}

#[test]
fn test_skip_leading_silence_scans_muted_tracks() {
    let format = ScriptedFormat::mono("mono");
    let registry = registry_with(&[&format]);
    let mut data = Array2::<f32>::zeros((1, 1000));
    data[[0, 100]] = 0.5;
    let mut tracks = MemoryTracks::new(RATE).with_track("a", 0.0, data);
    tracks.set_muted(0, true);
    let mut exporter = exporter_for(tracks, &registry).build();

    exporter.set_export_range(0.0, 10.0, false, true).unwrap();
    assert_approx_eq!(exporter.session().range().unwrap().t0, 1.0, 1e-9);
}

#[test]
fn test_output_path_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let format = ScriptedFormat::flexible("flex");
    let registry = registry_with(&[&format]);
    let mut exporter = exporter_for(constant_tracks(&[1], 1.0, 0.5), &registry).build();

    exporter.configure(dir.path().join("take"), 0, 0).unwrap();
    assert_eq!(
        exporter.resolve_output_path().unwrap(),
        dir.path().join("take.flex")
    );

    std::fs::write(dir.path().join("take.flex"), b"").unwrap();
    assert_eq!(
        exporter.resolve_output_path().unwrap(),
        dir.path().join("take-1.flex")
    );
    assert_eq!(
        exporter.session().actual_path(),
        Some(dir.path().join("take-1.flex").as_path())
    );

    let config = ExportConfig {
        allow_overwrite: true,
        ..ExportConfig::default()
    };
    let mut exporter = exporter_for(constant_tracks(&[1], 1.0, 0.5), &registry)
        .config(config)
        .build();
    exporter.configure(dir.path().join("take"), 0, 0).unwrap();
    assert_eq!(
        exporter.resolve_output_path().unwrap(),
        dir.path().join("take.flex")
    );
}

#[test]
fn test_plugin_lookup() {
    let mono = ScriptedFormat::mono("mono");
    let flex = ScriptedFormat::flexible("flex");
    let registry = registry_with(&[&mono, &flex]);
    let exporter = exporter_for(constant_tracks(&[1], 1.0, 0.5), &registry).build();

    let ids: Vec<&str> = exporter.plugins().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["flex", "mono"]);
    assert_eq!(exporter.plugin_count(), 2);
    assert_eq!(exporter.plugin_id(1), Some("mono"));
    assert_eq!(exporter.find_plugin_by_extension("MONO"), Some((1, 0)));
    assert_eq!(exporter.find_plugin_by_extension(".flex"), Some((0, 0)));
    assert_eq!(exporter.find_plugin_by_extension("ogg"), None);
    assert!(exporter.current_plugin().is_none());
    assert_eq!(exporter.plugin(0).unwrap().sub_formats().len(), 2);
}

#[test]
fn test_cyclic_registry_notice_reaches_exporter() {
    use crate::registry::Placement;

    let a = ScriptedFormat::mono("a");
    let b = ScriptedFormat::mono("b");
    let registry = Registry::new();
    registry
        .register(a.descriptor().with_placement(Placement::after("b")))
        .unwrap();
    registry
        .register(b.descriptor().with_placement(Placement::after("a")))
        .unwrap();

    let exporter = exporter_for(constant_tracks(&[1], 1.0, 0.5), &registry).build();
    assert_eq!(exporter.plugin_count(), 2);
    assert!(matches!(
        exporter.notices(),
        [Notice::CyclicPlacement { .. }]
    ));
}
