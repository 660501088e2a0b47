//! Dome self-calibration sequence.
//!
//! The controller only learns its absolute position after the rotating
//! structure passes the reference sensor. Calibration guarantees that by
//! driving almost half a turn away from the start, nudging two degrees further,
//! and then returning to where it began:
//!
//! ```text
//! Unknown --begin--> Stage1 (start + 179)
//!         --arrive-> Stage2 (arrival + 2)
//!         --arrive-> Stage3 (start)
//!         --arrive-> Complete
//! ```
//!
//! This type is pure bookkeeping. The controller issues the moves it asks for
//! and feeds back arrival positions.

use serde::{Deserialize, Serialize};

use crate::azimuth::wrap_degrees;

/// Overall dome readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
pub enum DomeStatus {
    /// Position not trusted; motion commands are refused.
    #[default]
    Unknown,
    Calibrating,
    Ready,
}

/// Progress through the calibration sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
pub enum CalibrationStage {
    #[default]
    Unknown,
    Stage1,
    Stage2,
    Stage3,
    Complete,
}

/// Positions remembered for a single calibration run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationAnchors {
    pub start: f64,
    pub target1: f64,
    pub target2: Option<f64>,
}

/// What the controller should do after an arrival.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationStep {
    /// Issue the move for the next stage.
    MoveTo {
        stage: CalibrationStage,
        target: f64,
    },
    /// Sequence finished.
    Complete,
    /// No calibration running.
    Idle,
}

/// Degrees travelled away from the start in stage 1.
pub const STAGE1_OFFSET: f64 = 179.0;
/// Degrees nudged past the stage 1 arrival in stage 2.
pub const STAGE2_OFFSET: f64 = 2.0;

#[derive(Debug, Clone, Default)]
pub struct Calibration {
    stage: CalibrationStage,
    anchors: Option<CalibrationAnchors>,
}

impl Calibration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> CalibrationStage {
        self.stage
    }

    pub fn anchors(&self) -> Option<&CalibrationAnchors> {
        self.anchors.as_ref()
    }

    /// True while a stage move is outstanding.
    pub fn is_running(&self) -> bool {
        matches!(
            self.stage,
            CalibrationStage::Stage1 | CalibrationStage::Stage2 | CalibrationStage::Stage3
        )
    }

    /// Start stage 1 from `start`; returns the stage 1 target.
    pub fn begin(&mut self, start: f64) -> f64 {
        let start = wrap_degrees(start);
        let target1 = wrap_degrees(start + STAGE1_OFFSET);
        self.stage = CalibrationStage::Stage1;
        self.anchors = Some(CalibrationAnchors {
            start,
            target1,
            target2: None,
        });
        target1
    }

    /// Advance after the dome arrived at `current`.
    pub fn on_arrival(&mut self, current: f64) -> CalibrationStep {
        let Some(anchors) = self.anchors.as_mut() else {
            return CalibrationStep::Idle;
        };

        match self.stage {
            CalibrationStage::Stage1 => {
                let target2 = wrap_degrees(current + STAGE2_OFFSET);
                anchors.target2 = Some(target2);
                self.stage = CalibrationStage::Stage2;
                CalibrationStep::MoveTo {
                    stage: CalibrationStage::Stage2,
                    target: target2,
                }
            }
            CalibrationStage::Stage2 => {
                self.stage = CalibrationStage::Stage3;
                CalibrationStep::MoveTo {
                    stage: CalibrationStage::Stage3,
                    target: anchors.start,
                }
            }
            CalibrationStage::Stage3 => {
                self.stage = CalibrationStage::Complete;
                self.anchors = None;
                CalibrationStep::Complete
            }
            CalibrationStage::Unknown | CalibrationStage::Complete => CalibrationStep::Idle,
        }
    }

    /// Drop the run and return to Unknown.
    pub fn cancel(&mut self) {
        self.stage = CalibrationStage::Unknown;
        self.anchors = None;
    }

    /// Controller reported a synced position without a calibration run.
    pub fn mark_reference_locked(&mut self) {
        self.stage = CalibrationStage::Complete;
        self.anchors = None;
    }
}
