//! End-to-end runs against the simulated controller.

use approx::assert_relative_eq;
use dome::{
    ActuatorKind, ActuatorState, ActuatorTarget, CalibrationRequest, CalibrationStage,
    CommandOutcome, ConfigStore, Dome, DomeConfig, DomeController, DomeError, DomeStatus,
    SimConfig, SimulatedDome,
};
use tempfile::TempDir;

fn config_at(azimuth: f64) -> DomeConfig {
    DomeConfig {
        simulation: SimConfig {
            initial_azimuth: azimuth,
            ..SimConfig::default()
        },
        ..DomeConfig::default()
    }
}

/// Tick until `done` or panic after `max_ticks`.
fn tick_until(
    dome: &mut DomeController<SimulatedDome>,
    max_ticks: usize,
    mut done: impl FnMut(&DomeController<SimulatedDome>) -> bool,
) -> usize {
    for tick in 1..=max_ticks {
        dome.tick();
        if done(dome) {
            return tick;
        }
    }
    panic!("condition not reached after {max_ticks} ticks");
}

#[test]
fn test_full_calibration_from_ten_degrees() {
    let mut dome = DomeController::simulated(config_at(10.0)).unwrap();
    assert_eq!(dome.status(), DomeStatus::Unknown);
    assert_relative_eq!(dome.azimuth(), 10.0);

    let request = dome.start_calibration().unwrap();
    assert_eq!(request, CalibrationRequest::Started { target: 189.0 });
    assert_eq!(dome.calibration().anchors().unwrap().start, 10.0);

    tick_until(&mut dome, 500, |d| d.calibration_stage() == CalibrationStage::Stage2);
    // Stage 1 arrival snaps onto its target, so stage 2 is two degrees on.
    assert_relative_eq!(dome.target_azimuth(), 191.0);
    assert_eq!(dome.status(), DomeStatus::Calibrating);

    tick_until(&mut dome, 500, |d| d.calibration_stage() == CalibrationStage::Stage3);
    assert_relative_eq!(dome.target_azimuth(), 10.0);

    tick_until(&mut dome, 500, |d| d.status() == DomeStatus::Ready);
    assert_eq!(dome.calibration_stage(), CalibrationStage::Complete);
    assert!(dome.channel().is_synced());
    assert!(dome.calibration().anchors().is_none());
    assert_relative_eq!(dome.azimuth(), 10.0);

    // The next poll reads the settled controller, not a position short of it.
    dome.tick();
    assert_relative_eq!(dome.azimuth(), 10.0);
    assert_relative_eq!(dome.channel().position(), 10.0);

    // Ready domes accept motion and report arrival.
    assert!(dome.move_to(45.0).unwrap().is_accepted());
    tick_until(&mut dome, 500, |d| !d.motion().is_busy());
    assert_relative_eq!(dome.azimuth(), 45.0);
    dome.tick();
    assert_relative_eq!(dome.azimuth(), 45.0);

    assert!(dome.disconnect().unwrap().is_accepted());
}

#[test]
fn test_encoder_saved_on_shutdown_after_calibration() {
    let mut dome = DomeController::simulated(config_at(300.0)).unwrap();
    let _ = dome.start_calibration().unwrap();
    tick_until(&mut dome, 1500, |d| d.status() == DomeStatus::Ready);

    assert_eq!(dome.channel().encoder_saves(), 0);
    assert!(dome.shutdown().unwrap().is_accepted());
    assert_eq!(dome.channel().encoder_saves(), 1);
}

#[test]
fn test_synced_controller_is_ready_immediately() {
    let config = DomeConfig {
        simulation: SimConfig {
            start_synced: true,
            initial_azimuth: 90.0,
            ..SimConfig::default()
        },
        ..DomeConfig::default()
    };
    let mut dome = DomeController::simulated(config).unwrap();
    assert_eq!(dome.status(), DomeStatus::Ready);
    assert_eq!(dome.calibration_stage(), CalibrationStage::Complete);
    assert_eq!(
        dome.start_calibration().unwrap(),
        CalibrationRequest::AlreadyCalibrated
    );
    assert!(dome.channel().goto_target().is_none());
}

#[test]
fn test_motion_rejected_until_calibrated() {
    let mut dome = DomeController::simulated(config_at(0.0)).unwrap();
    assert!(matches!(dome.move_to(120.0), Err(DomeError::NotCalibrated)));
    assert!(matches!(dome.home(), Err(DomeError::NotCalibrated)));
    assert!(dome.channel().goto_target().is_none());
}

#[test]
fn test_shutter_and_flap_cycle() {
    let config = DomeConfig {
        simulation: SimConfig {
            shutter_ticks: 5,
            flap_ticks: 3,
            ..SimConfig::default()
        },
        ..DomeConfig::default()
    };
    let mut dome = DomeController::simulated(config).unwrap();
    assert_eq!(dome.shutter_state(), ActuatorState::Closed);

    assert!(dome.open_shutter().is_accepted());
    assert!(dome.control_flap(ActuatorTarget::Open).is_accepted());

    // Polled before the timer runs out: still moving.
    dome.tick();
    assert_eq!(dome.shutter_state(), ActuatorState::Moving);
    assert_eq!(dome.flap_state(), ActuatorState::Moving);

    let ticks = tick_until(&mut dome, 20, |d| d.flap_state() == ActuatorState::Open);
    assert_eq!(ticks, 3);
    assert_eq!(dome.shutter_state(), ActuatorState::Moving);

    let ticks = tick_until(&mut dome, 20, |d| d.shutter_state() == ActuatorState::Open);
    assert_eq!(ticks, 2);

    assert!(dome.close_shutter().is_accepted());
    tick_until(&mut dome, 20, |d| d.shutter_state() == ActuatorState::Closed);
    assert_eq!(
        dome.channel().actuator_state(ActuatorKind::Shutter),
        ActuatorState::Closed
    );
}

#[test]
fn test_abort_during_calibration() {
    let mut dome = DomeController::simulated(config_at(10.0)).unwrap();
    let _ = dome.start_calibration().unwrap();
    for _ in 0..5 {
        dome.tick();
    }

    assert_eq!(dome.start_calibration().unwrap(), CalibrationRequest::Aborted);
    assert_eq!(dome.status(), DomeStatus::Unknown);
    assert_eq!(dome.calibration_stage(), CalibrationStage::Unknown);

    // Abort commanded a goto to where the dome was, not to the stage 1 target.
    let sim_target = dome.channel().goto_target().unwrap();
    assert!(sim_target < 189.0, "target {sim_target}");
}

#[test]
fn test_config_file_drives_simulation() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::with_path(dir.path().to_path_buf());

    let config = DomeConfig {
        park_azimuth: 270.0,
        simulation: SimConfig {
            initial_azimuth: 200.0,
            start_synced: true,
            ..SimConfig::default()
        },
        ..DomeConfig::default()
    };
    store.save(&config).unwrap();

    let loaded = store.load().unwrap().unwrap();
    let mut dome = DomeController::simulated(loaded).unwrap();
    assert_relative_eq!(dome.azimuth(), 200.0);

    assert!(matches!(dome.park(), Ok(CommandOutcome::Accepted)));
    assert_relative_eq!(dome.channel().goto_target().unwrap(), 270.0);
}

#[test]
fn test_non_finite_goto_is_refused() {
    let config = DomeConfig {
        simulation: SimConfig {
            start_synced: true,
            initial_azimuth: 90.0,
            ..SimConfig::default()
        },
        ..DomeConfig::default()
    };
    let mut dome = DomeController::simulated(config).unwrap();
    let surface: &mut dyn Dome = &mut dome;

    assert!(matches!(
        surface.move_to(f64::NAN),
        Err(DomeError::InvalidAngle { .. })
    ));
    assert!(matches!(
        surface.move_by(dome::Direction::Clockwise, f64::INFINITY),
        Err(DomeError::InvalidAngle { .. })
    ));
    assert!(!surface.is_moving());
    assert!(dome.channel().goto_target().is_none());
    assert_relative_eq!(dome.azimuth(), 90.0);
}
