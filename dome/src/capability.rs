//! Device-facing dome interface.

use crate::actuator::ActuatorState;
use crate::calibration::{CalibrationStage, DomeStatus};
use crate::controller::{CalibrationRequest, TickReport};
use crate::error::{CommandOutcome, DomeResult};
use crate::motion::Direction;

/// Interface for dome control
///
/// Abstracts the dome for the poll loop, the request dispatcher and anything
/// else that drives a dome without caring about the transport underneath.
/// Motion and actuator calls only issue the command; progress is observed
/// through [`poll`](Dome::poll).
pub trait Dome {
    /// Last known azimuth, mount frame, degrees.
    fn azimuth(&self) -> f64;

    /// Azimuth of the most recent move request.
    fn target_azimuth(&self) -> f64;

    fn status(&self) -> DomeStatus;

    fn calibration_stage(&self) -> CalibrationStage;

    fn shutter_state(&self) -> ActuatorState;

    fn flap_state(&self) -> ActuatorState;

    /// A move has been accepted and has not arrived yet.
    fn is_moving(&self) -> bool;

    /// Goto an absolute azimuth.
    fn move_to(&mut self, azimuth: f64) -> DomeResult<CommandOutcome>;

    /// Move relative to the current azimuth.
    fn move_by(&mut self, direction: Direction, delta: f64) -> DomeResult<CommandOutcome>;

    fn park(&mut self) -> DomeResult<CommandOutcome>;

    fn home(&mut self) -> DomeResult<CommandOutcome>;

    /// Stop at the current position.
    fn abort(&mut self) -> DomeResult<CommandOutcome>;

    fn open_shutter(&mut self) -> CommandOutcome;

    fn close_shutter(&mut self) -> CommandOutcome;

    fn open_flap(&mut self) -> CommandOutcome;

    fn close_flap(&mut self) -> CommandOutcome;

    /// Start calibration, or abort it when already running.
    fn start_calibration(&mut self) -> DomeResult<CalibrationRequest>;

    /// Run one poll cycle.
    fn poll(&mut self) -> TickReport;
}
