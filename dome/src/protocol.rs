//! Baader dome controller serial protocol.
//!
//! # Protocol Overview
//!
//! Every command and every reply is exactly 9 printable ASCII bytes of the form
//! `d#<7 chars>`. There is no terminator, checksum or escaping; framing relies
//! purely on the fixed length, so stale input is discarded before each command.
//!
//! | Command | Reply | Meaning |
//! |---|---|---|
//! | `d#getflap` | `d#flap{ope,clo,run}` | flap state |
//! | `d#getshut` | `d#shut{ope,clo,run}` | shutter state |
//! | `d#getazim` | `d#az{r,i}NNNN` | azimuth in encoder units, `r` = reference synced |
//! | `d#opeshut` / `d#closhut` | `d#gotmess` | open/close shutter |
//! | `d#opeflap` / `d#cloflap` | `d#gotmess` | open/close flap |
//! | `d#aziNNNN` | `d#gotmess` | goto encoder position NNNN |
//! | `d#encsave` | `d#gotmess` | persist encoder position |
//!
//! Action commands are acknowledged with `d#gotmess`; anything else means the
//! controller declined. Queries must answer within their own prefix family,
//! otherwise the reply is a [`ProtocolError`].
//!
//! # Example
//!
//! ```
//! use dome::channel::ScriptedChannel;
//! use dome::protocol::{Command, DomeLink, DEFAULT_TIMEOUT};
//!
//! let mut channel = ScriptedChannel::new();
//! channel.push_reply(b"d#azr0090");
//! let mut link = DomeLink::new(channel, DEFAULT_TIMEOUT);
//!
//! let reading = link.query_azimuth()?;
//! assert!(reading.synced);
//! assert_eq!(reading.units, 90);
//! assert_eq!(reading.mount_degrees(), 189.0);
//! # Ok::<(), dome::protocol::LinkError>(())
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::azimuth::{to_mount, DEVICE_MAX};
use crate::channel::{ByteChannel, TransportError};
use crate::error::CommandOutcome;

/// Length of every command and reply frame.
pub const FRAME_LEN: usize = 9;

/// Reply timeout for a single transaction.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Acknowledgement for action commands.
pub const ACK_FRAME: &[u8; FRAME_LEN] = b"d#gotmess";

const FRAME_PREFIX: &[u8] = b"d#";

/// Reply did not match what the command allows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Reply outside the prefix family expected for the command.
    #[error("Unexpected reply to {command}: {reply:?}")]
    UnexpectedReply { command: Command, reply: String },

    /// Bytes that do not form a known command.
    #[error("Invalid command frame: {0:?}")]
    InvalidCommand(String),
}

/// Any failure of a single command/reply transaction.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl LinkError {
    /// True for a reply that arrived but made no sense.
    pub fn is_protocol(&self) -> bool {
        matches!(self, LinkError::Protocol(_))
    }
}

/// Commands understood by the dome controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    GetFlap,
    GetShutter,
    GetAzimuth,
    OpenShutter,
    CloseShutter,
    OpenFlap,
    CloseFlap,
    /// Goto an absolute position in encoder units (0-3599).
    GotoAzimuth(u16),
    SaveEncoder,
}

impl Command {
    /// Encode to the 9-byte wire frame.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let text = match self {
            Command::GetFlap => "d#getflap".to_string(),
            Command::GetShutter => "d#getshut".to_string(),
            Command::GetAzimuth => "d#getazim".to_string(),
            Command::OpenShutter => "d#opeshut".to_string(),
            Command::CloseShutter => "d#closhut".to_string(),
            Command::OpenFlap => "d#opeflap".to_string(),
            Command::CloseFlap => "d#cloflap".to_string(),
            Command::GotoAzimuth(units) => format!("d#azi{:04}", units.min(&DEVICE_MAX)),
            Command::SaveEncoder => "d#encsave".to_string(),
        };

        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(&text.as_bytes()[..FRAME_LEN]);
        frame
    }

    /// Decode a wire frame back into a command.
    ///
    /// This is the controller's side of the conversation, used by the
    /// simulator to answer frames exactly as the hardware would.
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidCommand(String::from_utf8_lossy(frame).into_owned());

        if frame.len() != FRAME_LEN {
            return Err(invalid());
        }

        match frame {
            b"d#getflap" => Ok(Command::GetFlap),
            b"d#getshut" => Ok(Command::GetShutter),
            b"d#getazim" => Ok(Command::GetAzimuth),
            b"d#opeshut" => Ok(Command::OpenShutter),
            b"d#closhut" => Ok(Command::CloseShutter),
            b"d#opeflap" => Ok(Command::OpenFlap),
            b"d#cloflap" => Ok(Command::CloseFlap),
            b"d#encsave" => Ok(Command::SaveEncoder),
            _ => match frame.strip_prefix(b"d#azi") {
                Some(digits) => parse_units(digits)
                    .map(Command::GotoAzimuth)
                    .ok_or_else(invalid),
                None => Err(invalid()),
            },
        }
    }

    /// True for commands that are acknowledged with `d#gotmess`.
    pub fn is_action(&self) -> bool {
        !matches!(
            self,
            Command::GetFlap | Command::GetShutter | Command::GetAzimuth
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.encode()))
    }
}

/// Four ASCII digits within the encoder range.
fn parse_units(digits: &[u8]) -> Option<u16> {
    if digits.len() != 4 || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let units = digits
        .iter()
        .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
    (units <= DEVICE_MAX).then_some(units)
}

/// Status suffix of a shutter or flap reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorReport {
    /// `ope`
    Open,
    /// `clo`
    Closed,
    /// `run`
    Running,
    /// Any other three-character suffix.
    Other(String),
}

impl ActuatorReport {
    fn from_suffix(suffix: &[u8]) -> Self {
        match suffix {
            b"ope" => ActuatorReport::Open,
            b"clo" => ActuatorReport::Closed,
            b"run" => ActuatorReport::Running,
            other => ActuatorReport::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }

    /// Wire suffix for this report.
    pub fn suffix(&self) -> &str {
        match self {
            ActuatorReport::Open => "ope",
            ActuatorReport::Closed => "clo",
            ActuatorReport::Running => "run",
            ActuatorReport::Other(s) => s.as_str(),
        }
    }
}

/// Decoded `d#az{r,i}NNNN` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AzimuthReading {
    /// Controller reports it has seen the reference sensor (`r`).
    pub synced: bool,
    /// Position in encoder units, 0-3599.
    pub units: u16,
}

impl AzimuthReading {
    /// Position in the mount frame, degrees.
    pub fn mount_degrees(&self) -> f64 {
        to_mount(self.units)
    }

    /// Encode as the controller would send it.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let text = format!(
            "d#az{}{:04}",
            if self.synced { 'r' } else { 'i' },
            self.units.min(DEVICE_MAX)
        );
        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(&text.as_bytes()[..FRAME_LEN]);
        frame
    }
}

/// Decoded reply, already checked against the command that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Shutter or flap status.
    Actuator(ActuatorReport),
    /// Azimuth query result.
    Azimuth(AzimuthReading),
    /// `d#gotmess`
    Ack,
    /// Anything other than `d#gotmess` in answer to an action command.
    Declined(String),
}

impl Reply {
    /// Decode `raw` as the reply to `command`.
    pub fn decode(command: Command, raw: &[u8]) -> Result<Self, ProtocolError> {
        let unexpected = || ProtocolError::UnexpectedReply {
            command,
            reply: String::from_utf8_lossy(raw).into_owned(),
        };

        match command {
            Command::GetFlap | Command::GetShutter => {
                let prefix: &[u8] = if command == Command::GetFlap {
                    b"d#flap"
                } else {
                    b"d#shut"
                };
                match raw.strip_prefix(prefix) {
                    Some(suffix) if !suffix.is_empty() => {
                        Ok(Reply::Actuator(ActuatorReport::from_suffix(suffix)))
                    }
                    _ => Err(unexpected()),
                }
            }
            Command::GetAzimuth => {
                let (synced, digits) = if let Some(digits) = raw.strip_prefix(b"d#azr") {
                    (true, digits)
                } else if let Some(digits) = raw.strip_prefix(b"d#azi") {
                    (false, digits)
                } else {
                    return Err(unexpected());
                };
                parse_units(digits)
                    .map(|units| Reply::Azimuth(AzimuthReading { synced, units }))
                    .ok_or_else(unexpected)
            }
            _ => {
                if raw == &ACK_FRAME[..] {
                    Ok(Reply::Ack)
                } else {
                    Ok(Reply::Declined(String::from_utf8_lossy(raw).into_owned()))
                }
            }
        }
    }
}

/// One request/response conversation with the dome controller.
///
/// Owns the byte channel and enforces the strict one-outstanding-command
/// discipline: each call discards stale input, writes one frame and blocks
/// until exactly one reply frame has arrived or the timeout expires.
pub struct DomeLink<C> {
    channel: C,
    timeout: Duration,
}

impl<C: ByteChannel> DomeLink<C> {
    pub fn new(channel: C, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Raw transaction: returns the reply frame undecoded.
    pub fn exchange(&mut self, command: Command) -> Result<[u8; FRAME_LEN], TransportError> {
        let frame = command.encode();

        self.channel.discard_input()?;
        self.channel.write_frame(&frame)?;
        debug!("CMD ({command})");

        let mut reply = [0u8; FRAME_LEN];
        self.channel.read_exact(&mut reply, self.timeout)?;
        debug!("RES ({})", String::from_utf8_lossy(&reply));

        Ok(reply)
    }

    /// Send a command and decode the reply against it.
    pub fn transact(&mut self, command: Command) -> Result<Reply, LinkError> {
        let raw = self.exchange(command)?;
        Ok(Reply::decode(command, &raw)?)
    }

    /// Run an action command and classify the answer.
    pub fn execute(&mut self, command: Command) -> CommandOutcome {
        debug_assert!(command.is_action(), "{command} is a query");
        match self.transact(command) {
            Ok(Reply::Ack) => CommandOutcome::Accepted,
            Ok(_) => CommandOutcome::Rejected,
            Err(e) => CommandOutcome::Error(e),
        }
    }

    /// Ask the controller to persist its encoder position.
    pub fn save_encoder(&mut self) -> CommandOutcome {
        self.execute(Command::SaveEncoder)
    }

    /// Handshake used when connecting: any `d#...` answer to `d#getflap`.
    pub fn ack(&mut self) -> Result<(), LinkError> {
        let raw = self.exchange(Command::GetFlap)?;
        match raw.strip_prefix(FRAME_PREFIX) {
            Some(rest) if rest.iter().any(|b| !b.is_ascii_whitespace() && *b != 0) => Ok(()),
            _ => Err(ProtocolError::UnexpectedReply {
                command: Command::GetFlap,
                reply: String::from_utf8_lossy(&raw).into_owned(),
            }
            .into()),
        }
    }

    /// Query the current azimuth.
    pub fn query_azimuth(&mut self) -> Result<AzimuthReading, LinkError> {
        match self.transact(Command::GetAzimuth)? {
            Reply::Azimuth(reading) => Ok(reading),
            other => Err(self.mismatch(Command::GetAzimuth, other)),
        }
    }

    /// Query the shutter or flap status; `command` picks which.
    pub fn query_actuator(&mut self, command: Command) -> Result<ActuatorReport, LinkError> {
        match self.transact(command)? {
            Reply::Actuator(report) => Ok(report),
            other => Err(self.mismatch(command, other)),
        }
    }

    fn mismatch(&self, command: Command, reply: Reply) -> LinkError {
        ProtocolError::UnexpectedReply {
            command,
            reply: format!("{reply:?}"),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ScriptedChannel, ScriptedReply};

    fn link_with(replies: &[&[u8]]) -> DomeLink<ScriptedChannel> {
        let mut channel = ScriptedChannel::new();
        channel.push_replies(replies);
        DomeLink::new(channel, DEFAULT_TIMEOUT)
    }

    #[test]
    fn test_command_frames_are_nine_bytes() {
        let commands = [
            Command::GetFlap,
            Command::GetShutter,
            Command::GetAzimuth,
            Command::OpenShutter,
            Command::CloseShutter,
            Command::OpenFlap,
            Command::CloseFlap,
            Command::GotoAzimuth(7),
            Command::SaveEncoder,
        ];
        for command in commands {
            let frame = command.encode();
            assert_eq!(frame.len(), FRAME_LEN);
            assert!(frame.starts_with(b"d#"), "{command}");
            assert!(frame.iter().all(|b| b.is_ascii_graphic()), "{command}");
            assert_eq!(Command::parse(&frame), Ok(command));
        }
    }

    #[test]
    fn test_goto_is_zero_padded() {
        assert_eq!(&Command::GotoAzimuth(90).encode(), b"d#azi0090");
        assert_eq!(&Command::GotoAzimuth(3599).encode(), b"d#azi3599");
        assert_eq!(&Command::GotoAzimuth(0).encode(), b"d#azi0000");
    }

    #[test]
    fn test_parse_rejects_out_of_range_goto() {
        assert!(Command::parse(b"d#azi3600").is_err());
        assert!(Command::parse(b"d#azi12a4").is_err());
        assert!(Command::parse(b"d#getfla").is_err());
        assert!(Command::parse(b"x#getflap").is_err());
    }

    #[test]
    fn test_decode_actuator_replies() {
        assert_eq!(
            Reply::decode(Command::GetFlap, b"d#flapope"),
            Ok(Reply::Actuator(ActuatorReport::Open))
        );
        assert_eq!(
            Reply::decode(Command::GetShutter, b"d#shutclo"),
            Ok(Reply::Actuator(ActuatorReport::Closed))
        );
        assert_eq!(
            Reply::decode(Command::GetShutter, b"d#shutrun"),
            Ok(Reply::Actuator(ActuatorReport::Running))
        );
        assert_eq!(
            Reply::decode(Command::GetFlap, b"d#flapxyz"),
            Ok(Reply::Actuator(ActuatorReport::Other("xyz".to_string())))
        );
    }

    #[test]
    fn test_decode_wrong_family_is_protocol_error() {
        // A shutter reply to a flap query is not a flap reply.
        assert!(matches!(
            Reply::decode(Command::GetFlap, b"d#shutope"),
            Err(ProtocolError::UnexpectedReply {
                command: Command::GetFlap,
                ..
            })
        ));
        assert!(Reply::decode(Command::GetAzimuth, b"d#gotmess").is_err());
        assert!(Reply::decode(Command::GetAzimuth, b"d#azx0100").is_err());
        assert!(Reply::decode(Command::GetAzimuth, b"d#azr9999").is_err());
    }

    #[test]
    fn test_decode_azimuth() {
        assert_eq!(
            Reply::decode(Command::GetAzimuth, b"d#azi1900"),
            Ok(Reply::Azimuth(AzimuthReading {
                synced: false,
                units: 1900
            }))
        );
        let reading = AzimuthReading {
            synced: true,
            units: 0,
        };
        assert_eq!(&reading.encode(), b"d#azr0000");
        assert_eq!(reading.mount_degrees(), 180.0);
    }

    #[test]
    fn test_action_decline() {
        assert_eq!(
            Reply::decode(Command::OpenShutter, b"d#errmess"),
            Ok(Reply::Declined("d#errmess".to_string()))
        );
        assert_eq!(Reply::decode(Command::SaveEncoder, ACK_FRAME), Ok(Reply::Ack));
    }

    #[test]
    fn test_exchange_discards_then_writes() {
        let mut link = link_with(&[b"d#shutclo"]);
        let raw = link.exchange(Command::GetShutter).unwrap();
        assert_eq!(&raw, b"d#shutclo");
        assert_eq!(link.channel().discards(), 1);
        assert_eq!(link.channel().written_strings(), vec!["d#getshut"]);
    }

    #[test]
    fn test_execute_outcomes() {
        let mut link = link_with(&[b"d#gotmess", b"d#nopenop"]);
        assert!(matches!(
            link.execute(Command::OpenFlap),
            CommandOutcome::Accepted
        ));
        assert!(matches!(
            link.execute(Command::CloseFlap),
            CommandOutcome::Rejected
        ));
        assert!(matches!(
            link.execute(Command::SaveEncoder),
            CommandOutcome::Error(LinkError::Transport(TransportError::Timeout { .. }))
        ));
    }

    #[test]
    fn test_execute_write_failure_is_transport_error() {
        let mut channel = ScriptedChannel::new();
        channel.push(ScriptedReply::WriteFailure);
        let mut link = DomeLink::new(channel, DEFAULT_TIMEOUT);
        assert!(matches!(
            link.execute(Command::OpenShutter),
            CommandOutcome::Error(LinkError::Transport(TransportError::Write(_)))
        ));
    }

    #[test]
    fn test_ack_handshake() {
        let mut link = link_with(&[b"d#flapclo", b"xxxxxxxxx"]);
        assert!(link.ack().is_ok());
        assert!(link.ack().unwrap_err().is_protocol());
        assert!(!link.ack().unwrap_err().is_protocol());
    }

    #[test]
    fn test_query_azimuth_protocol_error() {
        let mut link = link_with(&[b"d#flapclo"]);
        let err = link.query_azimuth().unwrap_err();
        assert!(err.is_protocol());
    }
}
