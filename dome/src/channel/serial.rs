//! Serial port channel for the physical dome controller.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use super::{ByteChannel, TransportError};

/// The controller talks 9600 baud, 8N1, no flow control.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Byte channel over a serial port.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use dome::channel::{SerialChannel, DEFAULT_BAUD_RATE};
///
/// let channel = SerialChannel::open("/dev/ttyUSB0", DEFAULT_BAUD_RATE, Duration::from_secs(3))?;
/// # Ok::<(), dome::channel::TransportError>(())
/// ```
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialChannel {
    /// Open and configure the serial port.
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| TransportError::Open {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        info!("Opened serial port {path} at {baud_rate} baud");

        Ok(Self {
            port,
            path: path.to_string(),
        })
    }

    /// Device path this channel was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl ByteChannel for SerialChannel {
    fn discard_input(&mut self) -> Result<(), TransportError> {
        self.port
            .clear(ClearBuffer::All)
            .map_err(|e| TransportError::Flush(e.to_string()))
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(frame).map_err(TransportError::Write)?;
        self.port.flush().map_err(TransportError::Write)
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;

        while filled < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let timed_out = TransportError::Timeout {
                received: filled,
                expected: buf.len(),
            };
            if remaining.is_zero() {
                return Err(timed_out);
            }

            // Best effort: a port that refuses a new timeout keeps the one set at open.
            if let Err(e) = self.port.set_timeout(remaining) {
                debug!("Could not adjust read timeout on {}: {e}", self.path);
            }

            match self.port.read(&mut buf[filled..]) {
                Ok(0) => return Err(timed_out),
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Err(timed_out),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Err(timed_out),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Read(e)),
            }
        }

        Ok(())
    }
}

#[cfg(all(test, feature = "hardware-tests"))]
mod tests {
    use super::*;
    use crate::protocol::{Command, DomeLink, FRAME_LEN};

    fn test_port() -> String {
        std::env::var("DOME_TEST_PORT").unwrap_or_else(|_| "/dev/ttyUSB0".to_string())
    }

    #[test]
    fn test_handshake_with_real_controller() {
        let channel = SerialChannel::open(&test_port(), DEFAULT_BAUD_RATE, Duration::from_secs(3))
            .expect("open serial port");
        let mut link = DomeLink::new(channel, Duration::from_secs(3));
        link.ack().expect("controller answers d#getflap");
    }

    #[test]
    fn test_azimuth_reply_is_one_frame() {
        let mut channel =
            SerialChannel::open(&test_port(), DEFAULT_BAUD_RATE, Duration::from_secs(3))
                .expect("open serial port");
        channel.discard_input().unwrap();
        channel.write_frame(&Command::GetAzimuth.encode()).unwrap();
        let mut reply = [0u8; FRAME_LEN];
        channel
            .read_exact(&mut reply, Duration::from_secs(3))
            .unwrap();
        assert!(reply.starts_with(b"d#az"));
    }
}
