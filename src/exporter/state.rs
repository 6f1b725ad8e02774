use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Lifecycle of an export session.
///
/// ```text
/// Unconfigured -> Configured -> Running -> Completed | Cancelled | Failed
/// ```
///
/// `Configured` is re-enterable: changing the range, format or routing keeps
/// the session configured. Editing a finished session starts a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportState {
    /// No format has been chosen yet
    Unconfigured,
    /// Ready to process
    Configured,
    /// An export is in flight
    Running,
    /// The last export finished and its output is complete
    Completed,
    /// The last export was cancelled
    Cancelled,
    /// The last export failed
    Failed,
}

impl ExportState {
    /// Check if the session has ended.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Check if an export is in flight.
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if `process` may be called.
    pub const fn can_process(self) -> bool {
        matches!(self, Self::Configured)
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Unconfigured => 0,
            Self::Configured => 1,
            Self::Running => 2,
            Self::Completed => 3,
            Self::Cancelled => 4,
            Self::Failed => 5,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Configured,
            2 => Self::Running,
            3 => Self::Completed,
            4 => Self::Cancelled,
            5 => Self::Failed,
            _ => Self::Unconfigured,
        }
    }
}

/// Cloneable handle for observing and cancelling an exporter from another thread.
///
/// A cancel request is honored at the next chunk boundary, exactly like a
/// listener returning [`ProgressResult::Cancel`](crate::progress::ProgressResult::Cancel).
/// Requests made while no export is running are discarded when the next one
/// starts.
#[derive(Debug, Clone)]
pub struct ExportControl {
    state: Arc<AtomicU8>,
    cancel: Arc<AtomicBool>,
}

impl ExportControl {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ExportState::Unconfigured.to_u8())),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current state of the exporter.
    pub fn state(&self) -> ExportState {
        ExportState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Ask the running export to stop.
    pub fn request_cancel(&self) {
        tracing::debug!("Export cancellation requested");
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Check if a cancel request is pending.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub(crate) fn set_state(&self, state: ExportState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    pub(crate) fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(ExportState::Configured.can_process());
        assert!(!ExportState::Running.can_process());
        assert!(ExportState::Running.is_running());
        for state in [ExportState::Completed, ExportState::Cancelled, ExportState::Failed] {
            assert!(state.is_terminal());
            assert_eq!(ExportState::from_u8(state.to_u8()), state);
        }
    }

    #[test]
    fn test_control_is_shared_between_clones() {
        let control = ExportControl::new();
        let other = control.clone();
        control.set_state(ExportState::Running);
        assert_eq!(other.state(), ExportState::Running);

        other.request_cancel();
        assert!(control.is_cancel_requested());
        control.reset_cancel();
        assert!(!other.is_cancel_requested());
    }
}
