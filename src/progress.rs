//! Progress and outcome reporting for running exports.
//!
//! Callers pass an [`ExportProgressListener`] to `Exporter::process`. The
//! exporter calls it synchronously from the export context: progress fractions
//! are clamped to `[0, 1]` and never decrease, and exactly one of
//! `on_completed`, `on_cancelled` or `on_failed` is called per export.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "progress-tracking")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{ErrorKind, Notice};

/// Whether an export should keep going after a progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressResult {
    /// Keep exporting.
    #[default]
    Continue,
    /// Stop at the next chunk boundary and discard the output.
    Cancel,
}

/// Receiver of export progress and outcome.
pub trait ExportProgressListener {
    /// Report the fraction of the selection exported so far.
    fn on_progress(&mut self, fraction: f64) -> ProgressResult;

    /// The export finished and the output file is complete.
    fn on_completed(&mut self);

    /// The export was cancelled and no output file was left behind.
    fn on_cancelled(&mut self);

    /// The export failed and no output file was left behind.
    fn on_failed(&mut self, kind: ErrorKind, detail: &str);

    /// A non-fatal condition was recovered during the export.
    fn on_notice(&mut self, notice: &Notice) {
        let _ = notice;
    }
}

/// Listener that logs through `tracing` and never cancels.
#[derive(Debug, Default)]
pub struct TracingProgressListener {
    last_logged: Option<u32>,
}

impl TracingProgressListener {
    /// Create a new tracing listener.
    pub const fn new() -> Self {
        Self { last_logged: None }
    }
}

impl ExportProgressListener for TracingProgressListener {
    fn on_progress(&mut self, fraction: f64) -> ProgressResult {
        let step = (fraction * 10.0).floor() as u32;
        if self.last_logged != Some(step) {
            self.last_logged = Some(step);
            tracing::info!("Export {:.0}% complete", fraction * 100.0);
        }
        ProgressResult::Continue
    }

    fn on_completed(&mut self) {
        tracing::info!("Export completed");
    }

    fn on_cancelled(&mut self) {
        tracing::info!("Export cancelled");
    }

    fn on_failed(&mut self, kind: ErrorKind, detail: &str) {
        tracing::error!(%kind, "Export failed: {detail}");
    }

    fn on_notice(&mut self, notice: &Notice) {
        tracing::warn!("{notice}");
    }
}

/// Progress bar listener using indicatif.
#[cfg(feature = "progress-tracking")]
#[derive(Debug)]
pub struct ProgressBarListener {
    bar: ProgressBar,
}

#[cfg(feature = "progress-tracking")]
impl ProgressBarListener {
    const RESOLUTION: u64 = 1000;

    /// Create a new progress bar listener.
    pub fn new() -> Self {
        let bar = ProgressBar::new(Self::RESOLUTION);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }

    /// Create a new progress bar listener with a custom style.
    pub fn with_style(style: ProgressStyle) -> Self {
        let bar = ProgressBar::new(Self::RESOLUTION);
        bar.set_style(style);
        Self { bar }
    }
}

#[cfg(feature = "progress-tracking")]
impl Default for ProgressBarListener {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "progress-tracking")]
impl ExportProgressListener for ProgressBarListener {
    fn on_progress(&mut self, fraction: f64) -> ProgressResult {
        self.bar
            .set_position((fraction * Self::RESOLUTION as f64).round() as u64);
        ProgressResult::Continue
    }

    fn on_completed(&mut self) {
        self.bar.finish_with_message("export complete");
    }

    fn on_cancelled(&mut self) {
        self.bar.abandon_with_message("export cancelled");
    }

    fn on_failed(&mut self, kind: ErrorKind, detail: &str) {
        self.bar.abandon_with_message(format!("{kind}: {detail}"));
    }

    fn on_notice(&mut self, notice: &Notice) {
        self.bar.println(notice.to_string());
    }
}

/// Progress path from the sample stream back to the caller.
pub(crate) trait ProgressChannel {
    fn progress(&mut self, fraction: f64) -> ProgressResult;

    fn is_cancelled(&mut self) -> bool;
}

/// Wraps a caller's listener and enforces the reporting contract.
pub(crate) struct ProgressRelay<'a> {
    listener: &'a mut dyn ExportProgressListener,
    cancel_requested: Arc<AtomicBool>,
    last_fraction: f64,
    cancelled: bool,
    finished: bool,
}

impl<'a> ProgressRelay<'a> {
    pub(crate) fn new(
        listener: &'a mut dyn ExportProgressListener,
        cancel_requested: Arc<AtomicBool>,
    ) -> Self {
        Self {
            listener,
            cancel_requested,
            last_fraction: 0.0,
            cancelled: false,
            finished: false,
        }
    }

    /// Forward a progress fraction. Once cancellation has been seen it stays latched.
    pub(crate) fn progress(&mut self, fraction: f64) -> ProgressResult {
        if self.cancelled {
            return ProgressResult::Cancel;
        }
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            self.last_fraction
        };
        self.last_fraction = self.last_fraction.max(fraction);

        let requested = self.listener.on_progress(self.last_fraction);
        if requested == ProgressResult::Cancel || self.cancel_requested.load(Ordering::SeqCst) {
            self.cancelled = true;
            return ProgressResult::Cancel;
        }
        ProgressResult::Continue
    }

    /// Check if cancellation was requested by the listener or a control handle.
    pub(crate) fn is_cancelled(&mut self) -> bool {
        if !self.cancelled && self.cancel_requested.load(Ordering::SeqCst) {
            self.cancelled = true;
        }
        self.cancelled
    }

    pub(crate) fn notice(&mut self, notice: &Notice) {
        self.listener.on_notice(notice);
    }

    pub(crate) fn completed(&mut self) {
        if !std::mem::replace(&mut self.finished, true) {
            if self.last_fraction < 1.0 {
                self.last_fraction = 1.0;
                let _ = self.listener.on_progress(1.0);
            }
            self.listener.on_completed();
        }
    }

    pub(crate) fn cancelled(&mut self) {
        if !std::mem::replace(&mut self.finished, true) {
            self.listener.on_cancelled();
        }
    }

    pub(crate) fn failed(&mut self, kind: ErrorKind, detail: &str) {
        if !std::mem::replace(&mut self.finished, true) {
            self.listener.on_failed(kind, detail);
        }
    }
}

impl ProgressChannel for ProgressRelay<'_> {
    fn progress(&mut self, fraction: f64) -> ProgressResult {
        ProgressRelay::progress(self, fraction)
    }

    fn is_cancelled(&mut self) -> bool {
        ProgressRelay::is_cancelled(self)
    }
}
