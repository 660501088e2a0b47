//! Operator requests, one per line.
//!
//! ```text
//! goto <deg>            absolute move
//! move <deg>            relative move, negative turns counter-clockwise
//! park | home | abort
//! calibrate             start, or abort a running calibration
//! shutter open|close
//! flap open|close
//! status
//! quit
//! ```

use std::str::FromStr;

use thiserror::Error;

use crate::actuator::{describe, ActuatorKind, ActuatorTarget};
use crate::capability::Dome;
use crate::controller::CalibrationRequest;
use crate::error::{CommandOutcome, DomeResult};
use crate::motion::Direction;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestParseError {
    #[error("Empty request")]
    Empty,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command} needs {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },

    #[error("Invalid argument for {command}: {value}")]
    InvalidArgument { command: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request {
    Goto(f64),
    Move { direction: Direction, delta: f64 },
    Park,
    Home,
    Abort,
    Calibrate,
    Shutter(ActuatorTarget),
    Flap(ActuatorTarget),
    Status,
    Quit,
}

fn parse_degrees(command: &'static str, arg: Option<&str>) -> Result<f64, RequestParseError> {
    let value = arg.ok_or(RequestParseError::MissingArgument {
        command,
        expected: "an angle in degrees",
    })?;
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| RequestParseError::InvalidArgument {
            command,
            value: value.to_string(),
        })
}

fn parse_target(command: &'static str, arg: Option<&str>) -> Result<ActuatorTarget, RequestParseError> {
    match arg {
        Some("open") => Ok(ActuatorTarget::Open),
        Some("close") => Ok(ActuatorTarget::Close),
        Some(other) => Err(RequestParseError::InvalidArgument {
            command,
            value: other.to_string(),
        }),
        None => Err(RequestParseError::MissingArgument {
            command,
            expected: "open or close",
        }),
    }
}

impl FromStr for Request {
    type Err = RequestParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let lowered = line.trim().to_ascii_lowercase();
        let mut words = lowered.split_whitespace();
        let command = words.next().ok_or(RequestParseError::Empty)?;
        let arg = words.next();

        match command {
            "goto" => Ok(Request::Goto(parse_degrees("goto", arg)?)),
            "move" => {
                let delta = parse_degrees("move", arg)?;
                let direction = if delta < 0.0 {
                    Direction::CounterClockwise
                } else {
                    Direction::Clockwise
                };
                Ok(Request::Move {
                    direction,
                    delta: delta.abs(),
                })
            }
            "park" => Ok(Request::Park),
            "home" => Ok(Request::Home),
            "abort" | "stop" => Ok(Request::Abort),
            "calibrate" => Ok(Request::Calibrate),
            "shutter" => Ok(Request::Shutter(parse_target("shutter", arg)?)),
            "flap" => Ok(Request::Flap(parse_target("flap", arg)?)),
            "status" => Ok(Request::Status),
            "quit" | "exit" => Ok(Request::Quit),
            other => Err(RequestParseError::UnknownCommand(other.to_string())),
        }
    }
}

fn motion_reply(what: String, result: DomeResult<CommandOutcome>) -> String {
    match result {
        Ok(outcome) => format!("{what}: {outcome}"),
        Err(e) => format!("{what}: {e}"),
    }
}

/// One-line status description.
pub fn status_line<D: Dome + ?Sized>(dome: &D) -> String {
    format!(
        "azimuth {:.1} (target {:.1}{}) | {} / {} | {} {}",
        dome.azimuth(),
        dome.target_azimuth(),
        if dome.is_moving() { ", moving" } else { "" },
        dome.status(),
        dome.calibration_stage(),
        describe(ActuatorKind::Shutter, dome.shutter_state()),
        describe(ActuatorKind::Flap, dome.flap_state()),
    )
}

impl Request {
    /// Run the request against `dome` and describe the result.
    pub fn apply<D: Dome + ?Sized>(self, dome: &mut D) -> String {
        match self {
            Request::Goto(azimuth) => motion_reply(format!("goto {azimuth:.1}"), dome.move_to(azimuth)),
            Request::Move { direction, delta } => motion_reply(
                format!("move {delta:.1} {direction}"),
                dome.move_by(direction, delta),
            ),
            Request::Park => motion_reply("park".to_string(), dome.park()),
            Request::Home => motion_reply("home".to_string(), dome.home()),
            Request::Abort => motion_reply("abort".to_string(), dome.abort()),
            Request::Calibrate => match dome.start_calibration() {
                Ok(CalibrationRequest::AlreadyCalibrated) => "Dome is already calibrated.".to_string(),
                Ok(CalibrationRequest::Started { target }) => {
                    format!("calibration started, stage 1 target {target:.1}")
                }
                Ok(CalibrationRequest::Aborted) => "calibration aborted".to_string(),
                Err(e) => format!("calibrate: {e}"),
            },
            Request::Shutter(target) => {
                let outcome = match target {
                    ActuatorTarget::Open => dome.open_shutter(),
                    ActuatorTarget::Close => dome.close_shutter(),
                };
                format!("shutter {target}: {outcome}")
            }
            Request::Flap(target) => {
                let outcome = match target {
                    ActuatorTarget::Open => dome.open_flap(),
                    ActuatorTarget::Close => dome.close_flap(),
                };
                format!("flap {target}: {outcome}")
            }
            Request::Status => status_line(dome),
            Request::Quit => "bye".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DomeConfig, SimConfig};
    use crate::controller::DomeController;

    #[test]
    fn test_parse_requests() {
        assert_eq!("goto 90".parse::<Request>(), Ok(Request::Goto(90.0)));
        assert_eq!(
            "  MOVE -12.5 ".parse::<Request>(),
            Ok(Request::Move {
                direction: Direction::CounterClockwise,
                delta: 12.5
            })
        );
        assert_eq!("shutter open".parse::<Request>(), Ok(Request::Shutter(ActuatorTarget::Open)));
        assert_eq!("flap close".parse::<Request>(), Ok(Request::Flap(ActuatorTarget::Close)));
        assert_eq!("exit".parse::<Request>(), Ok(Request::Quit));
        assert_eq!("stop".parse::<Request>(), Ok(Request::Abort));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Request>(), Err(RequestParseError::Empty));
        assert!(matches!(
            "spin".parse::<Request>(),
            Err(RequestParseError::UnknownCommand(_))
        ));
        assert!(matches!(
            "goto".parse::<Request>(),
            Err(RequestParseError::MissingArgument { command: "goto", .. })
        ));
        assert!(matches!(
            "goto north".parse::<Request>(),
            Err(RequestParseError::InvalidArgument { .. })
        ));
        assert!(matches!(
            "flap ajar".parse::<Request>(),
            Err(RequestParseError::InvalidArgument { command: "flap", .. })
        ));
    }

    #[test]
    fn test_apply_against_simulated_dome() {
        let mut dome = DomeController::simulated(DomeConfig::default()).unwrap();

        let reply = Request::Goto(90.0).apply(&mut dome);
        assert!(reply.contains("not calibrated"), "{reply}");

        let reply = Request::Shutter(ActuatorTarget::Open).apply(&mut dome);
        assert_eq!(reply, "shutter Open: accepted");

        let reply = Request::Calibrate.apply(&mut dome);
        assert!(reply.starts_with("calibration started"), "{reply}");
        assert_eq!(Request::Calibrate.apply(&mut dome), "calibration aborted");

        let status = Request::Status.apply(&mut dome);
        assert!(status.contains("Shutter is in motion."), "{status}");
    }

    #[test]
    fn test_apply_when_synced() {
        let config = DomeConfig {
            simulation: SimConfig {
                start_synced: true,
                ..SimConfig::default()
            },
            ..DomeConfig::default()
        };
        let mut dome = DomeController::simulated(config).unwrap();
        assert_eq!(Request::Calibrate.apply(&mut dome), "Dome is already calibrated.");
        assert_eq!(Request::Park.apply(&mut dome), "park: accepted");
    }
}
