//! Simulated dome controller.
//!
//! [`SimulatedDome`] is a [`ByteChannel`] that answers protocol frames the way
//! the hardware does, so the whole control core runs unchanged without a
//! serial port. Time only advances when the poll loop calls
//! [`SimulatedDome::advance_position`] and [`SimulatedDome::advance_actuator`],
//! which keeps simulated runs deterministic.

use std::time::Duration;

use tracing::{debug, trace};

use crate::actuator::{ActuatorKind, ActuatorState, ActuatorTarget};
use crate::azimuth::{to_device, to_mount, wrap_degrees};
use crate::channel::{ByteChannel, TransportError};
use crate::config::SimConfig;
use crate::protocol::{ActuatorReport, AzimuthReading, Command, ACK_FRAME, FRAME_LEN};

/// Mount azimuth of the reference sensor.
pub const REFERENCE_AZIMUTH: f64 = 180.0;

#[derive(Debug, Clone)]
struct SimActuator {
    state: ActuatorState,
    target: Option<ActuatorTarget>,
    countdown: u32,
}

impl SimActuator {
    fn closed() -> Self {
        Self {
            state: ActuatorState::Closed,
            target: None,
            countdown: 0,
        }
    }

    fn report(&self) -> ActuatorReport {
        match self.state {
            ActuatorState::Open => ActuatorReport::Open,
            ActuatorState::Closed => ActuatorReport::Closed,
            ActuatorState::Moving => ActuatorReport::Running,
            ActuatorState::Unknown => ActuatorReport::Other("unk".to_string()),
        }
    }
}

/// In-memory dome controller.
#[derive(Debug, Clone)]
pub struct SimulatedDome {
    config: SimConfig,
    position: f64,
    goto_target: Option<f64>,
    synced: bool,
    encoder_saves: u32,
    shutter: SimActuator,
    flap: SimActuator,
    reply: Option<[u8; FRAME_LEN]>,
    silent_replies: u32,
}

impl SimulatedDome {
    pub fn new(config: SimConfig) -> Self {
        Self {
            position: wrap_degrees(config.initial_azimuth),
            synced: config.start_synced,
            config,
            goto_target: None,
            encoder_saves: 0,
            shutter: SimActuator::closed(),
            flap: SimActuator::closed(),
            reply: None,
            silent_replies: 0,
        }
    }

    /// Current simulated azimuth, mount frame.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Position the controller is driving towards, if any.
    pub fn goto_target(&self) -> Option<f64> {
        self.goto_target
    }

    /// Reference sensor has been passed.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Number of `d#encsave` commands received.
    pub fn encoder_saves(&self) -> u32 {
        self.encoder_saves
    }

    pub fn actuator_state(&self, kind: ActuatorKind) -> ActuatorState {
        self.actuator(kind).state
    }

    /// Leave the next `count` commands unanswered.
    pub fn inject_silence(&mut self, count: u32) {
        self.silent_replies = count;
    }

    /// Move one tick towards the goto target.
    ///
    /// Returns the new position while a goto is active. The step is the fast
    /// speed while farther than one fast step from the target and the slow
    /// speed after that; the final step snaps onto the target.
    pub fn advance_position(&mut self) -> Option<f64> {
        let target = self.goto_target?;
        let remaining = target - self.position;

        let speed = if remaining.abs() > self.config.fast_speed {
            self.config.fast_speed
        } else {
            self.config.slow_speed
        };

        if remaining.abs() <= speed {
            self.goto_target = None;
            self.step_to(target);
        } else {
            self.step_to(wrap_degrees(self.position + speed.copysign(remaining)));
        }
        Some(self.position)
    }

    /// Finish the goto in progress immediately.
    ///
    /// Called once the controller has accepted arrival within its tolerance,
    /// so the simulated position matches the position the controller snapped
    /// to.
    pub fn settle(&mut self) {
        if let Some(target) = self.goto_target.take() {
            self.step_to(target);
        }
    }

    fn step_to(&mut self, position: f64) {
        let previous = self.position;
        self.position = position;

        if !self.synced
            && (previous - REFERENCE_AZIMUTH) * (self.position - REFERENCE_AZIMUTH) <= 0.0
        {
            debug!("Simulated dome passed the reference sensor");
            self.synced = true;
        }

        trace!("Simulated azimuth {:.2} -> {:.2}", previous, self.position);
    }

    /// Count down one tick of an actuator travel.
    ///
    /// Returns the state after the tick.
    pub fn advance_actuator(&mut self, kind: ActuatorKind) -> ActuatorState {
        let actuator = self.actuator_mut(kind);
        if actuator.state == ActuatorState::Moving {
            actuator.countdown = actuator.countdown.saturating_sub(1);
            if actuator.countdown == 0 {
                actuator.state = match actuator.target {
                    Some(target) => target.terminal_state(),
                    None => ActuatorState::Unknown,
                };
                debug!("Simulated {kind} is now {}", actuator.state);
            }
        }
        actuator.state
    }

    fn actuator(&self, kind: ActuatorKind) -> &SimActuator {
        match kind {
            ActuatorKind::Shutter => &self.shutter,
            ActuatorKind::Flap => &self.flap,
        }
    }

    fn actuator_mut(&mut self, kind: ActuatorKind) -> &mut SimActuator {
        match kind {
            ActuatorKind::Shutter => &mut self.shutter,
            ActuatorKind::Flap => &mut self.flap,
        }
    }

    fn start_actuator(&mut self, kind: ActuatorKind, target: ActuatorTarget) {
        let ticks = match kind {
            ActuatorKind::Shutter => self.config.shutter_ticks,
            ActuatorKind::Flap => self.config.flap_ticks,
        };
        let actuator = self.actuator_mut(kind);
        actuator.target = Some(target);
        actuator.countdown = ticks.max(1);
        actuator.state = ActuatorState::Moving;
    }

    fn respond(&mut self, command: Command) -> [u8; FRAME_LEN] {
        match command {
            Command::GetFlap => actuator_frame("d#flap", &self.flap),
            Command::GetShutter => actuator_frame("d#shut", &self.shutter),
            Command::GetAzimuth => AzimuthReading {
                synced: self.synced,
                units: to_device(self.position),
            }
            .encode(),
            Command::OpenShutter => {
                self.start_actuator(ActuatorKind::Shutter, ActuatorTarget::Open);
                *ACK_FRAME
            }
            Command::CloseShutter => {
                self.start_actuator(ActuatorKind::Shutter, ActuatorTarget::Close);
                *ACK_FRAME
            }
            Command::OpenFlap => {
                self.start_actuator(ActuatorKind::Flap, ActuatorTarget::Open);
                *ACK_FRAME
            }
            Command::CloseFlap => {
                self.start_actuator(ActuatorKind::Flap, ActuatorTarget::Close);
                *ACK_FRAME
            }
            Command::GotoAzimuth(units) => {
                self.goto_target = Some(to_mount(units));
                *ACK_FRAME
            }
            Command::SaveEncoder => {
                self.encoder_saves += 1;
                *ACK_FRAME
            }
        }
    }
}

impl Default for SimulatedDome {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

fn actuator_frame(prefix: &str, actuator: &SimActuator) -> [u8; FRAME_LEN] {
    let text = format!("{prefix}{}", actuator.report().suffix());
    let mut frame = [0u8; FRAME_LEN];
    frame.copy_from_slice(&text.as_bytes()[..FRAME_LEN]);
    frame
}

impl ByteChannel for SimulatedDome {
    fn discard_input(&mut self) -> Result<(), TransportError> {
        self.reply = None;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.silent_replies > 0 {
            self.silent_replies -= 1;
            self.reply = None;
            return Ok(());
        }

        self.reply = match Command::parse(frame) {
            Ok(command) => Some(self.respond(command)),
            Err(e) => {
                debug!("Simulated controller ignoring frame: {e}");
                None
            }
        };
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<(), TransportError> {
        match self.reply.take() {
            Some(reply) if buf.len() <= FRAME_LEN => {
                buf.copy_from_slice(&reply[..buf.len()]);
                Ok(())
            }
            _ => Err(TransportError::Timeout {
                received: 0,
                expected: buf.len(),
            }),
        }
    }

    fn simulator(&mut self) -> Option<&mut SimulatedDome> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DomeLink, DEFAULT_TIMEOUT};
    use approx::assert_relative_eq;

    fn sim_at(azimuth: f64) -> SimulatedDome {
        SimulatedDome::new(SimConfig {
            initial_azimuth: azimuth,
            ..SimConfig::default()
        })
    }

    #[test]
    fn test_answers_like_the_controller() {
        let mut link = DomeLink::new(sim_at(0.0), DEFAULT_TIMEOUT);
        assert_eq!(&link.exchange(Command::GetShutter).unwrap(), b"d#shutclo");
        assert_eq!(&link.exchange(Command::GetFlap).unwrap(), b"d#flapclo");
        assert_eq!(&link.exchange(Command::GetAzimuth).unwrap(), b"d#azi1800");
        assert_eq!(&link.exchange(Command::SaveEncoder).unwrap(), ACK_FRAME);
        assert_eq!(link.channel().encoder_saves(), 1);
    }

    #[test]
    fn test_garbage_frame_times_out() {
        let mut sim = SimulatedDome::default();
        sim.write_frame(b"d#bogus!!").unwrap();
        let mut buf = [0u8; FRAME_LEN];
        assert!(matches!(
            sim.read_exact(&mut buf, DEFAULT_TIMEOUT),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_two_speed_motion() {
        let mut sim = sim_at(10.0);
        sim.write_frame(&Command::GotoAzimuth(to_device(20.0)).encode())
            .unwrap();

        assert_relative_eq!(sim.advance_position().unwrap(), 15.0);
        // 5 degrees left is no longer farther than a fast step.
        assert_relative_eq!(sim.advance_position().unwrap(), 15.5);

        let mut ticks = 2;
        while sim.advance_position().is_some() {
            ticks += 1;
        }
        assert_relative_eq!(sim.position(), 20.0);
        assert_eq!(ticks, 11);
        assert!(sim.goto_target().is_none());
    }

    #[test]
    fn test_reference_crossing_syncs() {
        let mut sim = sim_at(170.0);
        assert!(!sim.is_synced());
        sim.write_frame(&Command::GotoAzimuth(to_device(190.0)).encode())
            .unwrap();
        sim.advance_position();
        assert!(!sim.is_synced());
        sim.advance_position();
        assert!(sim.is_synced());
    }

    #[test]
    fn test_actuator_countdown() {
        let mut sim = SimulatedDome::default();
        sim.write_frame(b"d#opeflap").unwrap();
        assert_eq!(sim.actuator_state(ActuatorKind::Flap), ActuatorState::Moving);

        for _ in 0..4 {
            assert_eq!(sim.advance_actuator(ActuatorKind::Flap), ActuatorState::Moving);
        }
        assert_eq!(sim.advance_actuator(ActuatorKind::Flap), ActuatorState::Open);
        assert_eq!(sim.actuator_state(ActuatorKind::Shutter), ActuatorState::Closed);
    }

    #[test]
    fn test_injected_silence() {
        let mut link = DomeLink::new(SimulatedDome::default(), DEFAULT_TIMEOUT);
        link.channel_mut().inject_silence(1);
        assert!(link.exchange(Command::GetFlap).is_err());
        assert!(link.exchange(Command::GetFlap).is_ok());
    }

    #[test]
    fn test_settle_finishes_goto() {
        let mut sim = sim_at(10.0);
        sim.write_frame(&Command::GotoAzimuth(to_device(20.0)).encode())
            .unwrap();
        sim.advance_position();
        sim.settle();
        assert_relative_eq!(sim.position(), 20.0);
        assert!(sim.goto_target().is_none());
        assert!(sim.advance_position().is_none());

        // Nothing to settle without a goto.
        sim.settle();
        assert_relative_eq!(sim.position(), 20.0);
    }
}
