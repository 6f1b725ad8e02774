//! Channel mixdown decisions and routing matrices.
//!
//! The resolver works in two steps. [`decide_mode`] picks a [`DownMixMode`] from
//! the number of audible input channels, the chosen sub-format's
//! [`ChannelConstraint`] and an optional user override. [`build_matrix`] then
//! turns the resulting output channel count into a [`RoutingMatrix`], the
//! per-output weighted combination of input channels that the export pipeline
//! applies to every chunk.
//!
//! ## Routing rules
//!
//! - `N -> N`: identity.
//! - `N -> 1`: every audible input at weight `1/N`.
//! - `N -> M` with `M < N`: input `i` feeds output `i % M`, each output averages
//!   the inputs assigned to it.
//! - `1 -> M`: the single input is duplicated to every output at weight 1.0.
//! - `N -> M` with `1 < N < M`: output `j` copies input `j % N` at weight 1.0.
//!
//! Muted inputs keep an all-zero column so the matrix always spans the full
//! input layout.

use std::fmt;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ExportError, ExportResult, Notice};

/// How the exporter collapses or expands input channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownMixMode {
    /// Input channels pass through unchanged.
    None,
    /// Collapse to a single channel.
    Mono,
    /// Collapse or expand to two channels.
    Stereo,
    /// The chosen sub-format dictates the channel count.
    FormatDefined,
}

/// The output channel counts a sub-format accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelConstraint {
    /// Exactly this many channels.
    Fixed(usize),
    /// Any count in `min..=max`.
    Range {
        /// Smallest accepted channel count.
        min: usize,
        /// Largest accepted channel count.
        max: usize,
    },
}

impl ChannelConstraint {
    /// The fixed channel count, if the constraint allows only one value.
    pub const fn fixed(&self) -> Option<usize> {
        match *self {
            Self::Fixed(n) => Some(n),
            Self::Range { min, max } if min == max => Some(min),
            Self::Range { .. } => None,
        }
    }

    /// Check if `channels` is an accepted output count.
    pub const fn allows(&self, channels: usize) -> bool {
        match *self {
            Self::Fixed(n) => channels == n,
            Self::Range { min, max } => channels >= min && channels <= max,
        }
    }

    /// The accepted count closest to `channels`.
    pub fn clamp(&self, channels: usize) -> usize {
        match *self {
            Self::Fixed(n) => n,
            Self::Range { min, max } => channels.clamp(min, max.max(min)),
        }
    }
}

impl fmt::Display for ChannelConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "{n}"),
            Self::Range { min, max } => write!(f, "{min}..={max}"),
        }
    }
}

/// Default modes used when the user gives no override and the format leaves
/// the channel count open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownMixPolicy {
    /// Mode for one- and two-channel input.
    pub stereo_or_less: DownMixMode,
    /// Mode for input with more than two channels.
    pub above_stereo: DownMixMode,
}

impl Default for DownMixPolicy {
    fn default() -> Self {
        Self {
            stereo_or_less: DownMixMode::None,
            above_stereo: DownMixMode::Stereo,
        }
    }
}

impl DownMixPolicy {
    /// Keep every channel regardless of count.
    pub const fn pass_through() -> Self {
        Self {
            stereo_or_less: DownMixMode::None,
            above_stereo: DownMixMode::None,
        }
    }
}

/// Result of [`decide_mode`].
#[derive(Debug, Clone, PartialEq)]
pub struct ModeDecision {
    /// The chosen mode.
    pub mode: DownMixMode,
    /// Set when a user override had to be ignored.
    pub notice: Option<Notice>,
}

/// Number of output channels a mode produces.
pub fn output_channels(mode: DownMixMode, inputs: usize, constraint: &ChannelConstraint) -> usize {
    match mode {
        DownMixMode::None => inputs,
        DownMixMode::Mono => 1,
        DownMixMode::Stereo => 2,
        DownMixMode::FormatDefined => constraint.clamp(inputs),
    }
}

/// Decide how to map `inputs` audible channels onto the chosen sub-format.
///
/// A user override is honoured unless it conflicts with a fixed channel count,
/// in which case `FormatDefined` wins and the conflict is returned as a notice.
/// Without an override, a fixed format gives `FormatDefined`, mono input passes
/// through, and everything else follows `policy`. A policy choice the format
/// cannot accept also falls back to `FormatDefined`.
pub fn decide_mode(
    inputs: usize,
    constraint: &ChannelConstraint,
    user_override: Option<DownMixMode>,
    policy: &DownMixPolicy,
) -> ModeDecision {
    if let Some(requested) = user_override {
        if let Some(fixed) = constraint.fixed() {
            if requested != DownMixMode::FormatDefined
                && output_channels(requested, inputs, constraint) != fixed
            {
                tracing::warn!(
                    ?requested,
                    fixed,
                    "downmix override conflicts with fixed format channel count"
                );
                return ModeDecision {
                    mode: DownMixMode::FormatDefined,
                    notice: Some(Notice::ChannelConflict {
                        requested,
                        constraint: *constraint,
                    }),
                };
            }
        }
        return ModeDecision {
            mode: requested,
            notice: None,
        };
    }

    let mode = if constraint.fixed().is_some() {
        DownMixMode::FormatDefined
    } else if inputs == 1 {
        DownMixMode::None
    } else if inputs <= 2 {
        policy.stereo_or_less
    } else {
        policy.above_stereo
    };

    let mode = if constraint.allows(output_channels(mode, inputs, constraint)) {
        mode
    } else {
        DownMixMode::FormatDefined
    };

    ModeDecision { mode, notice: None }
}

/// Build the routing matrix for `muted.len()` inputs onto `outputs` channels,
/// rejecting counts the sub-format does not accept.
pub fn build_matrix(
    muted: &[bool],
    outputs: usize,
    constraint: &ChannelConstraint,
) -> ExportResult<RoutingMatrix> {
    if !constraint.allows(outputs) {
        return Err(ExportError::unsupported_mapping(
            muted.len(),
            outputs,
            format!("format accepts {constraint} channels"),
        ));
    }
    RoutingMatrix::for_layout(muted, outputs)
}

/// Per-output weighted combination of input channels.
///
/// Weights are stored as an `outputs x inputs` array of linear gains. Every
/// weight is finite and non-negative, and every input that is not muted feeds
/// at least one output.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingMatrix {
    weights: Array2<f32>,
    muted: Vec<bool>,
}

impl RoutingMatrix {
    /// One-to-one routing of `channels` channels.
    pub fn identity(channels: usize) -> Self {
        Self {
            weights: Array2::eye(channels),
            muted: vec![false; channels],
        }
    }

    /// Routing of `inputs` audible channels onto `outputs` channels.
    pub fn build(inputs: usize, outputs: usize) -> ExportResult<Self> {
        Self::for_layout(&vec![false; inputs], outputs)
    }

    /// Routing of a layout in which some inputs are muted.
    ///
    /// The audible inputs are routed as if they were the only inputs, muted
    /// ones get an all-zero column.
    pub fn for_layout(muted: &[bool], outputs: usize) -> ExportResult<Self> {
        let audible: Vec<usize> = (0..muted.len()).filter(|&i| !muted[i]).collect();
        if audible.is_empty() {
            return Err(ExportError::unsupported_mapping(
                muted.len(),
                outputs,
                "no audible input channels",
            ));
        }
        if outputs == 0 {
            return Err(ExportError::unsupported_mapping(
                muted.len(),
                outputs,
                "at least one output channel is required",
            ));
        }

        let n = audible.len();
        let mut weights = Array2::<f32>::zeros((outputs, muted.len()));

        if outputs >= n {
            for out in 0..outputs {
                weights[[out, audible[out % n]]] = 1.0;
            }
        } else {
            let mut per_output = vec![0usize; outputs];
            for slot in 0..n {
                per_output[slot % outputs] += 1;
            }
            for (slot, &input) in audible.iter().enumerate() {
                let out = slot % outputs;
                weights[[out, input]] = 1.0 / per_output[out] as f32;
            }
        }

        Ok(Self {
            weights,
            muted: muted.to_vec(),
        })
    }

    /// Wrap a user-supplied `outputs x inputs` weight array.
    ///
    /// Inputs whose column is entirely zero are treated as muted.
    pub fn from_weights(weights: Array2<f32>) -> ExportResult<Self> {
        let (outputs, inputs) = weights.dim();
        if outputs == 0 || inputs == 0 {
            return Err(ExportError::unsupported_mapping(
                inputs,
                outputs,
                "routing matrix must not be empty",
            ));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ExportError::unsupported_mapping(
                inputs,
                outputs,
                "weights must be finite and non-negative",
            ));
        }
        let muted = weights
            .axis_iter(Axis(1))
            .map(|column| column.iter().all(|w| *w == 0.0))
            .collect();
        Ok(Self { weights, muted })
    }

    /// Number of input channels.
    pub fn input_channels(&self) -> usize {
        self.weights.ncols()
    }

    /// Number of output channels.
    pub fn output_channels(&self) -> usize {
        self.weights.nrows()
    }

    /// Gain applied from `input` into `output`.
    pub fn weight(&self, output: usize, input: usize) -> f32 {
        self.weights[[output, input]]
    }

    /// Gains of every input into `output`.
    pub fn output_weights(&self, output: usize) -> ArrayView1<'_, f32> {
        self.weights.row(output)
    }

    /// The full `outputs x inputs` weight array.
    pub fn weights(&self) -> ArrayView2<'_, f32> {
        self.weights.view()
    }

    /// Check if `input` is muted.
    pub fn is_muted(&self, input: usize) -> bool {
        self.muted[input]
    }

    /// Mix a `frames x inputs` block into a `frames x outputs` block.
    pub fn apply(&self, block: ArrayView2<'_, f32>) -> Array2<f32> {
        block.dot(&self.weights.t())
    }
}
