//! Azimuth motion tracking.
//!
//! Moves are fire-and-forget at the protocol level: `d#aziNNNN` is acknowledged
//! immediately and the dome keeps rotating. Arrival is detected by the poll
//! loop comparing the last position reading to the target.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::azimuth::{separation, to_device, wrap_degrees};
use crate::calibration::DomeStatus;
use crate::channel::ByteChannel;
use crate::error::{CommandOutcome, DomeError};
use crate::protocol::{AzimuthReading, Command, DomeLink, LinkError};

/// Rotation sense for relative moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum Direction {
    Clockwise,
    CounterClockwise,
}

/// Why the dome is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum MotionKind {
    Goto,
    Relative,
    Park,
    Home,
    Abort,
    Calibration,
}

/// Target/current azimuth bookkeeping.
#[derive(Debug, Clone)]
pub struct MotionController {
    current: f64,
    target: f64,
    tolerance: f64,
    park_azimuth: f64,
    home_azimuth: f64,
    in_progress: Option<MotionKind>,
}

impl MotionController {
    pub fn new(tolerance: f64, park_azimuth: f64, home_azimuth: f64) -> Self {
        Self {
            current: 0.0,
            target: 0.0,
            tolerance,
            park_azimuth: wrap_degrees(park_azimuth),
            home_azimuth: wrap_degrees(home_azimuth),
            in_progress: None,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn in_progress(&self) -> Option<MotionKind> {
        self.in_progress
    }

    pub fn is_busy(&self) -> bool {
        self.in_progress.is_some()
    }

    /// Send the dome to `azimuth` (mount frame, degrees).
    ///
    /// Fails with [`DomeError::NotCalibrated`] before any byte is sent when
    /// the dome position is unknown, and with [`DomeError::InvalidAngle`]
    /// for a non-finite azimuth.
    pub fn move_absolute<C: ByteChannel>(
        &mut self,
        status: DomeStatus,
        link: &mut DomeLink<C>,
        azimuth: f64,
        kind: MotionKind,
    ) -> Result<CommandOutcome, DomeError> {
        if status == DomeStatus::Unknown {
            warn!("Dome is not calibrated. Please calibrate dome before attempting to move.");
            return Err(DomeError::NotCalibrated);
        }
        if !azimuth.is_finite() {
            warn!("Refusing to move to azimuth {azimuth}");
            return Err(DomeError::InvalidAngle { value: azimuth });
        }

        let azimuth = wrap_degrees(azimuth);
        self.target = azimuth;
        let units = to_device(azimuth);

        let outcome = link.execute(Command::GotoAzimuth(units));
        match &outcome {
            CommandOutcome::Accepted => {
                info!("Dome is moving to {azimuth:.1} degrees ({kind})...");
                self.in_progress = Some(kind);
            }
            CommandOutcome::Rejected => {
                warn!("Dome rejected move to {azimuth:.1} degrees");
                self.in_progress = None;
            }
            CommandOutcome::Error(e) => {
                warn!("Move to {azimuth:.1} degrees failed: {e}");
                self.in_progress = None;
            }
        }
        Ok(outcome)
    }

    /// Move `delta` degrees from the current position.
    pub fn move_relative<C: ByteChannel>(
        &mut self,
        status: DomeStatus,
        link: &mut DomeLink<C>,
        direction: Direction,
        delta: f64,
    ) -> Result<CommandOutcome, DomeError> {
        if !delta.is_finite() {
            warn!("Refusing to move by {delta} degrees");
            return Err(DomeError::InvalidAngle { value: delta });
        }
        let target = match direction {
            Direction::Clockwise => self.current + delta,
            Direction::CounterClockwise => self.current - delta,
        };
        self.move_absolute(status, link, wrap_degrees(target), MotionKind::Relative)
    }

    pub fn park<C: ByteChannel>(
        &mut self,
        status: DomeStatus,
        link: &mut DomeLink<C>,
    ) -> Result<CommandOutcome, DomeError> {
        self.move_absolute(status, link, self.park_azimuth, MotionKind::Park)
    }

    pub fn home<C: ByteChannel>(
        &mut self,
        status: DomeStatus,
        link: &mut DomeLink<C>,
    ) -> Result<CommandOutcome, DomeError> {
        self.move_absolute(status, link, self.home_azimuth, MotionKind::Home)
    }

    /// Stop by commanding a move to where the dome is now.
    pub fn abort<C: ByteChannel>(
        &mut self,
        status: DomeStatus,
        link: &mut DomeLink<C>,
    ) -> Result<CommandOutcome, DomeError> {
        self.move_absolute(status, link, self.current, MotionKind::Abort)
    }

    /// Record a position reading.
    pub fn observe(&mut self, azimuth: f64) {
        self.current = wrap_degrees(azimuth);
    }

    /// Query the controller for the current position.
    pub fn refresh<C: ByteChannel>(
        &mut self,
        link: &mut DomeLink<C>,
    ) -> Result<AzimuthReading, LinkError> {
        let reading = link.query_azimuth()?;
        self.observe(reading.mount_degrees());
        Ok(reading)
    }

    /// Complete the motion in progress if the dome is within tolerance.
    ///
    /// On arrival the current position snaps to the target and the finished
    /// motion kind is returned.
    pub fn check_arrival(&mut self) -> Option<MotionKind> {
        let kind = self.in_progress?;
        if separation(self.target, self.current) < self.tolerance {
            self.current = self.target;
            self.in_progress = None;
            Some(kind)
        } else {
            None
        }
    }

    /// Forget the motion in progress without touching the hardware.
    pub fn clear(&mut self) {
        self.in_progress = None;
    }
}
