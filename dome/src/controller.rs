//! Baader dome controller driver.
//!
//! [`DomeController`] owns the link to the controller and every piece of
//! tracked state: position and motion, calibration progress, shutter and flap.
//! All calls run on the caller's thread and each one holds the link for at
//! most one transaction per command, so ticks and operator commands simply
//! take turns.
//!
//! # Example
//!
//! ```
//! use dome::{DomeConfig, DomeController, DomeStatus};
//!
//! let mut dome = DomeController::simulated(DomeConfig::default())?;
//! assert_eq!(dome.status(), DomeStatus::Unknown);
//!
//! dome.start_calibration()?;
//! while dome.status() != DomeStatus::Ready {
//!     dome.tick();
//! }
//! let outcome = dome.move_to(90.0)?;
//! assert!(outcome.is_accepted());
//! # Ok::<(), dome::DomeError>(())
//! ```

use serde::Serialize;
use tracing::{error, info, warn};

use crate::actuator::{Actuator, ActuatorKind, ActuatorState, ActuatorTarget};
use crate::calibration::{Calibration, CalibrationStage, CalibrationStep, DomeStatus};
use crate::capability::Dome;
use crate::channel::ByteChannel;
use crate::config::DomeConfig;
use crate::error::{CommandOutcome, DomeError, DomeResult};
use crate::motion::{Direction, MotionController, MotionKind};
use crate::protocol::{DomeLink, LinkError};
use crate::sim::SimulatedDome;

/// What `start_calibration` did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationRequest {
    /// Dome was already Ready; nothing moved.
    AlreadyCalibrated,
    /// Stage 1 move accepted towards `target`.
    Started { target: f64 },
    /// A running calibration was aborted.
    Aborted,
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Motion that arrived during this tick.
    pub arrived: Option<MotionKind>,
    /// Calibration finished during this tick.
    pub calibration_complete: bool,
    /// Status queries that failed during this tick.
    pub failed_queries: u32,
}

/// Point-in-time view of the dome for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomeSnapshot {
    pub azimuth: f64,
    pub target_azimuth: f64,
    pub status: DomeStatus,
    pub calibration_stage: CalibrationStage,
    pub synced: bool,
    pub position_faulted: bool,
    pub moving: bool,
    pub shutter: ActuatorState,
    pub flap: ActuatorState,
}

/// Driver for one dome controller.
pub struct DomeController<C: ByteChannel> {
    link: DomeLink<C>,
    config: DomeConfig,
    status: DomeStatus,
    motion: MotionController,
    calibration: Calibration,
    shutter: Actuator,
    flap: Actuator,
    synced: bool,
    position_faulted: bool,
    shut_down: bool,
}

impl DomeController<SimulatedDome> {
    /// Connect to a simulated dome built from `config.simulation`.
    pub fn simulated(config: DomeConfig) -> DomeResult<Self> {
        let sim = SimulatedDome::new(config.simulation.clone());
        Self::connect(config, sim)
    }
}

impl<C: ByteChannel> DomeController<C> {
    /// Handshake with the controller and read its initial state.
    ///
    /// # Arguments
    ///
    /// * `config` - Dome configuration; validated before anything is sent
    /// * `channel` - Byte channel to the controller
    pub fn connect(config: DomeConfig, channel: C) -> DomeResult<Self> {
        config.validate()?;

        let mut link = DomeLink::new(channel, config.command_timeout());
        if let Err(e) = link.ack() {
            error!("Error communicating with the dome controller: {e}");
            return Err(e.into());
        }
        info!("Dome is online.");

        let mut dome = Self {
            link,
            motion: MotionController::new(
                config.autosync_tolerance,
                config.park_azimuth,
                config.home_azimuth,
            ),
            config,
            status: DomeStatus::Unknown,
            calibration: Calibration::new(),
            shutter: Actuator::new(ActuatorKind::Shutter),
            flap: Actuator::new(ActuatorKind::Flap),
            synced: false,
            position_faulted: false,
            shut_down: false,
        };

        // Initial state; failures are picked up again by the first tick.
        let _ = dome.refresh_position();
        let _ = dome.shutter.refresh(&mut dome.link);
        let _ = dome.flap.refresh(&mut dome.link);

        Ok(dome)
    }

    /// Persist calibration and release the channel.
    pub fn disconnect(mut self) -> Option<CommandOutcome> {
        let outcome = self.shutdown();
        info!("Dome is offline.");
        outcome
    }

    // ==================== State ====================

    pub fn config(&self) -> &DomeConfig {
        &self.config
    }

    pub fn status(&self) -> DomeStatus {
        self.status
    }

    pub fn calibration_stage(&self) -> CalibrationStage {
        self.calibration.stage()
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn azimuth(&self) -> f64 {
        self.motion.current()
    }

    pub fn target_azimuth(&self) -> f64 {
        self.motion.target()
    }

    /// Last position reading carried the reference flag.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Last position reply was not understood.
    pub fn is_position_faulted(&self) -> bool {
        self.position_faulted
    }

    pub fn motion(&self) -> &MotionController {
        &self.motion
    }

    pub fn shutter(&self) -> &Actuator {
        &self.shutter
    }

    pub fn flap(&self) -> &Actuator {
        &self.flap
    }

    pub fn snapshot(&self) -> DomeSnapshot {
        DomeSnapshot {
            azimuth: self.motion.current(),
            target_azimuth: self.motion.target(),
            status: self.status,
            calibration_stage: self.calibration.stage(),
            synced: self.synced,
            position_faulted: self.position_faulted,
            moving: self.motion.is_busy(),
            shutter: self.shutter.state(),
            flap: self.flap.state(),
        }
    }

    pub fn channel(&self) -> &C {
        self.link.channel()
    }

    pub fn channel_mut(&mut self) -> &mut C {
        self.link.channel_mut()
    }

    // ==================== Motion ====================

    /// Goto an absolute azimuth, mount frame.
    pub fn move_to(&mut self, azimuth: f64) -> DomeResult<CommandOutcome> {
        self.motion
            .move_absolute(self.status, &mut self.link, azimuth, MotionKind::Goto)
    }

    pub fn move_by(&mut self, direction: Direction, delta: f64) -> DomeResult<CommandOutcome> {
        self.motion
            .move_relative(self.status, &mut self.link, direction, delta)
    }

    pub fn park(&mut self) -> DomeResult<CommandOutcome> {
        self.motion.park(self.status, &mut self.link)
    }

    pub fn home(&mut self) -> DomeResult<CommandOutcome> {
        self.motion.home(self.status, &mut self.link)
    }

    pub fn abort(&mut self) -> DomeResult<CommandOutcome> {
        self.motion.abort(self.status, &mut self.link)
    }

    // ==================== Shutter / Flap ====================

    pub fn control_shutter(&mut self, target: ActuatorTarget) -> CommandOutcome {
        self.shutter.control(&mut self.link, target)
    }

    pub fn control_flap(&mut self, target: ActuatorTarget) -> CommandOutcome {
        self.flap.control(&mut self.link, target)
    }

    // ==================== Calibration ====================

    /// Start calibration from the current position.
    ///
    /// Calling this while a calibration is running aborts it instead.
    pub fn start_calibration(&mut self) -> DomeResult<CalibrationRequest> {
        match self.status {
            DomeStatus::Ready => {
                info!("Dome is already calibrated.");
                Ok(CalibrationRequest::AlreadyCalibrated)
            }
            DomeStatus::Calibrating => {
                self.abort_calibration();
                Ok(CalibrationRequest::Aborted)
            }
            DomeStatus::Unknown => {
                let target = self.calibration.begin(self.motion.current());
                self.status = DomeStatus::Calibrating;
                info!("Starting calibration procedure...");

                let outcome = self.motion.move_absolute(
                    self.status,
                    &mut self.link,
                    target,
                    MotionKind::Calibration,
                )?;
                if outcome.is_accepted() {
                    Ok(CalibrationRequest::Started { target })
                } else {
                    let reason = format!("stage 1 move {outcome}");
                    self.fail_calibration(&reason);
                    Err(DomeError::CalibrationFailure { reason })
                }
            }
        }
    }

    fn abort_calibration(&mut self) {
        info!("Aborting calibration...");
        match self.abort() {
            Ok(CommandOutcome::Accepted) => {}
            Ok(outcome) => warn!("Abort move {outcome}"),
            Err(e) => warn!("Abort move failed: {e}"),
        }
        self.calibration.cancel();
        self.status = DomeStatus::Unknown;
        info!("Calibration aborted.");
    }

    fn fail_calibration(&mut self, reason: &str) {
        error!("Calibration failed: {reason}");
        self.motion.clear();
        self.calibration.cancel();
        self.status = DomeStatus::Unknown;
    }

    /// Feed an arrival into the calibration sequence.
    ///
    /// Returns true once the sequence completes.
    fn advance_calibration(&mut self) -> bool {
        match self.calibration.on_arrival(self.motion.current()) {
            CalibrationStep::MoveTo { stage, target } => {
                match stage {
                    CalibrationStage::Stage2 => {
                        info!("Calibration stage 1 complete. Starting stage 2...")
                    }
                    CalibrationStage::Stage3 => info!(
                        "Calibration stage 2 complete. Returning to initial position {target:.1}..."
                    ),
                    _ => {}
                }

                match self.motion.move_absolute(
                    self.status,
                    &mut self.link,
                    target,
                    MotionKind::Calibration,
                ) {
                    Ok(CommandOutcome::Accepted) => {}
                    Ok(outcome) => self.fail_calibration(&format!("{stage} move {outcome}")),
                    Err(e) => self.fail_calibration(&format!("{stage} move failed: {e}")),
                }
                false
            }
            CalibrationStep::Complete => {
                info!("Dome reached initial position.");
                self.status = DomeStatus::Ready;
                info!("Calibration complete.");
                true
            }
            CalibrationStep::Idle => false,
        }
    }

    // ==================== Polling ====================

    fn refresh_position(&mut self) -> Result<(), LinkError> {
        let reading = match self.motion.refresh(&mut self.link) {
            Ok(reading) => reading,
            Err(e) => {
                if e.is_protocol() {
                    self.position_faulted = true;
                }
                error!("Failed to read dome azimuth: {e}");
                return Err(e);
            }
        };
        self.position_faulted = false;
        self.synced = reading.synced;

        if reading.synced && self.calibration.stage() == CalibrationStage::Unknown {
            info!("Dome reference is synced, calibration not required.");
            self.calibration.mark_reference_locked();
            self.status = DomeStatus::Ready;
        }
        Ok(())
    }

    /// One poll cycle: position and arrival, then shutter, then flap.
    ///
    /// Failures are counted and logged; the next tick simply tries again.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        // Simulated rotation keeps going whether or not a motion is tracked.
        if let Some(sim) = self.link.channel_mut().simulator() {
            sim.advance_position();
        }

        if self.refresh_position().is_err() {
            report.failed_queries += 1;
        }

        if let Some(kind) = self.motion.check_arrival() {
            info!("Dome reached requested azimuth angle.");
            report.arrived = Some(kind);
            if let Some(sim) = self.link.channel_mut().simulator() {
                sim.settle();
            }
            if self.status == DomeStatus::Calibrating {
                report.calibration_complete = self.advance_calibration();
            }
        }

        for kind in [ActuatorKind::Shutter, ActuatorKind::Flap] {
            let actuator = match kind {
                ActuatorKind::Shutter => &mut self.shutter,
                ActuatorKind::Flap => &mut self.flap,
            };
            if actuator.refresh(&mut self.link).is_err() {
                report.failed_queries += 1;
            }
            if let Some(sim) = self.link.channel_mut().simulator() {
                sim.advance_actuator(kind);
            }
        }

        report
    }

    /// Save the encoder position if calibration completed.
    ///
    /// Runs at most once; also called on drop.
    pub fn shutdown(&mut self) -> Option<CommandOutcome> {
        if self.shut_down {
            return None;
        }
        self.shut_down = true;

        if self.calibration.stage() != CalibrationStage::Complete {
            return None;
        }

        let outcome = self.link.save_encoder();
        match &outcome {
            CommandOutcome::Accepted => info!("Dome encoder position saved."),
            CommandOutcome::Rejected => error!("Dome rejected encoder save."),
            CommandOutcome::Error(e) => error!("Encoder save failed: {e}"),
        }
        Some(outcome)
    }
}

impl<C: ByteChannel> Drop for DomeController<C> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl<C: ByteChannel> Dome for DomeController<C> {
    fn azimuth(&self) -> f64 {
        self.motion.current()
    }

    fn target_azimuth(&self) -> f64 {
        self.motion.target()
    }

    fn status(&self) -> DomeStatus {
        self.status
    }

    fn calibration_stage(&self) -> CalibrationStage {
        self.calibration.stage()
    }

    fn shutter_state(&self) -> ActuatorState {
        self.shutter.state()
    }

    fn flap_state(&self) -> ActuatorState {
        self.flap.state()
    }

    fn is_moving(&self) -> bool {
        self.motion.is_busy()
    }

    fn move_to(&mut self, azimuth: f64) -> DomeResult<CommandOutcome> {
        DomeController::move_to(self, azimuth)
    }

    fn move_by(&mut self, direction: Direction, delta: f64) -> DomeResult<CommandOutcome> {
        DomeController::move_by(self, direction, delta)
    }

    fn park(&mut self) -> DomeResult<CommandOutcome> {
        DomeController::park(self)
    }

    fn home(&mut self) -> DomeResult<CommandOutcome> {
        DomeController::home(self)
    }

    fn abort(&mut self) -> DomeResult<CommandOutcome> {
        DomeController::abort(self)
    }

    fn open_shutter(&mut self) -> CommandOutcome {
        self.control_shutter(ActuatorTarget::Open)
    }

    fn close_shutter(&mut self) -> CommandOutcome {
        self.control_shutter(ActuatorTarget::Close)
    }

    fn open_flap(&mut self) -> CommandOutcome {
        self.control_flap(ActuatorTarget::Open)
    }

    fn close_flap(&mut self) -> CommandOutcome {
        self.control_flap(ActuatorTarget::Close)
    }

    fn start_calibration(&mut self) -> DomeResult<CalibrationRequest> {
        DomeController::start_calibration(self)
    }

    fn poll(&mut self) -> TickReport {
        self.tick()
    }
}
