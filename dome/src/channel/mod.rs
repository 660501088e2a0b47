//! Synchronous byte channel between the control core and the dome controller.
//!
//! The protocol layer only needs three primitives: drop whatever stale input
//! is sitting in the receive buffer, write one frame, and read an exact number
//! of bytes before a deadline. Anything that provides those can stand in for
//! the serial port, which is how the simulator and the scripted test double
//! plug in underneath [`DomeLink`](crate::protocol::DomeLink).

use std::time::Duration;

use thiserror::Error;

use crate::sim::SimulatedDome;

mod scripted;
#[cfg(feature = "serial")]
mod serial;

pub use scripted::{ScriptedChannel, ScriptedReply};
#[cfg(feature = "serial")]
pub use serial::{SerialChannel, DEFAULT_BAUD_RATE};

/// Failures of the byte channel itself.
///
/// These never say anything about the dome; the caller should treat the
/// affected state as unknown and retry on the next poll.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The port could not be opened or configured.
    #[error("Failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    /// Clearing stale input failed.
    #[error("Failed to flush input: {0}")]
    Flush(String),

    /// Writing the command frame failed.
    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),

    /// Reading the reply failed for a reason other than timeout.
    #[error("Read failed: {0}")]
    Read(#[source] std::io::Error),

    /// The reply did not arrive completely before the deadline.
    #[error("Timeout waiting for reply ({received} of {expected} bytes received)")]
    Timeout { received: usize, expected: usize },
}

/// Blocking request/response byte transport.
pub trait ByteChannel {
    /// Discard any unread input so the next read only sees the reply to the
    /// next command.
    fn discard_input(&mut self) -> Result<(), TransportError>;

    /// Write a complete frame.
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Fill `buf` completely or fail with [`TransportError::Timeout`] once
    /// `timeout` has elapsed.
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError>;

    /// Access the simulation engine when this channel is one.
    ///
    /// The poller uses this to advance simulated motion and actuator timers;
    /// physical channels keep the default.
    fn simulator(&mut self) -> Option<&mut SimulatedDome> {
        None
    }
}

impl<T: ByteChannel + ?Sized> ByteChannel for Box<T> {
    fn discard_input(&mut self) -> Result<(), TransportError> {
        (**self).discard_input()
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        (**self).write_frame(frame)
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        (**self).read_exact(buf, timeout)
    }

    fn simulator(&mut self) -> Option<&mut SimulatedDome> {
        (**self).simulator()
    }
}
