//! Control core for Baader-protocol observatory domes.
//!
//! This crate turns the controller's fixed 9-byte serial protocol into a dome
//! model with azimuth positioning, shutter and flap actuation and the
//! self-calibration procedure, all driven by a periodic poll.
//!
//! # Layers
//!
//! - [`channel`] - byte transport: serial port, simulator and a scripted test double
//! - [`protocol`] - frame codec and the request/response [`DomeLink`]
//! - [`azimuth`] - mount degrees <-> encoder units
//! - [`actuator`], [`motion`], [`calibration`] - sub-state machines
//! - [`controller`] - [`DomeController`], which owns all of the above
//! - [`poller`] - fixed-period tick loop with request dispatch
//! - [`sim`] - simulated controller used when no hardware is attached
//!
//! # Features
//!
//! - `serial` (default) - serial port transport and the `dome_tool` binary
//! - `hardware-tests` - tests against a real controller (`DOME_TEST_PORT`)

pub mod actuator;
pub mod azimuth;
pub mod calibration;
pub mod capability;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod motion;
pub mod poller;
pub mod protocol;
pub mod request;
pub mod sim;

pub use actuator::{ActuatorKind, ActuatorState, ActuatorTarget};
pub use calibration::{CalibrationStage, DomeStatus};
pub use capability::Dome;
pub use channel::{ByteChannel, TransportError};
pub use config::{ConfigStore, DomeConfig, SimConfig};
pub use controller::{CalibrationRequest, DomeController, DomeSnapshot, TickReport};
pub use error::{CommandOutcome, DomeError, DomeResult};
pub use motion::{Direction, MotionKind};
pub use poller::Poller;
pub use protocol::{Command, DomeLink, LinkError, ProtocolError};
pub use request::Request;
pub use sim::SimulatedDome;
