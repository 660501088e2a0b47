//! Controller-level errors and command outcomes.

use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::LinkError;

/// Errors surfaced by dome operations.
///
/// None of these are fatal: the controller keeps polling and the next tick
/// re-reads whatever state the failure left in doubt.
#[derive(Error, Debug)]
pub enum DomeError {
    /// Motion requested before the dome knows where it is.
    #[error("Dome is not calibrated, please run calibration first")]
    NotCalibrated,

    /// Azimuth or offset that is NaN or infinite.
    #[error("Invalid angle: {value}")]
    InvalidAngle { value: f64 },

    /// A calibration stage could not be started.
    #[error("Calibration failed: {reason}")]
    CalibrationFailure { reason: String },

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type DomeResult<T> = Result<T, DomeError>;

/// Result of issuing one action command.
///
/// `Accepted` only means the controller acknowledged the request; completion
/// is observed later by polling.
#[derive(Debug)]
#[must_use]
pub enum CommandOutcome {
    /// Controller answered `d#gotmess`.
    Accepted,
    /// Controller answered something else.
    Rejected,
    /// The transaction itself failed.
    Error(LinkError),
}

impl CommandOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CommandOutcome::Accepted)
    }

    /// Short label for logs and operator feedback.
    pub fn label(&self) -> &'static str {
        match self {
            CommandOutcome::Accepted => "accepted",
            CommandOutcome::Rejected => "rejected",
            CommandOutcome::Error(_) => "failed",
        }
    }
}

impl std::fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandOutcome::Error(e) => write!(f, "failed: {e}"),
            other => f.write_str(other.label()),
        }
    }
}
