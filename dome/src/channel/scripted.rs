//! Scripted channel for exercising the protocol without a device.

use std::collections::VecDeque;
use std::time::Duration;

use super::{ByteChannel, TransportError};

/// One queued reaction to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Bytes handed back to the next read.
    Frame(Vec<u8>),
    /// The next read times out with nothing received.
    Silence,
    /// The next write fails.
    WriteFailure,
}

/// Channel that records every frame written and replays queued replies.
///
/// Each written frame consumes one queued reply; when the queue runs dry the
/// read times out, which is what an unplugged controller looks like.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    replies: VecDeque<ScriptedReply>,
    pending: Option<Vec<u8>>,
    written: Vec<Vec<u8>>,
    discards: usize,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply frame.
    pub fn push_reply(&mut self, frame: &[u8]) -> &mut Self {
        self.replies.push_back(ScriptedReply::Frame(frame.to_vec()));
        self
    }

    /// Queue several reply frames in order.
    pub fn push_replies(&mut self, frames: &[&[u8]]) -> &mut Self {
        for frame in frames {
            self.push_reply(frame);
        }
        self
    }

    /// Queue an arbitrary reaction.
    pub fn push(&mut self, reply: ScriptedReply) -> &mut Self {
        self.replies.push_back(reply);
        self
    }

    /// Every frame written so far, oldest first.
    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }

    /// Written frames as strings, for readable assertions.
    pub fn written_strings(&self) -> Vec<String> {
        self.written
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect()
    }

    /// Most recent frame written, as a string.
    pub fn last_written(&self) -> Option<String> {
        self.written
            .last()
            .map(|f| String::from_utf8_lossy(f).into_owned())
    }

    /// Forget recorded writes.
    pub fn clear_written(&mut self) {
        self.written.clear();
    }

    /// How many times stale input was discarded.
    pub fn discards(&self) -> usize {
        self.discards
    }

    /// Replies still queued.
    pub fn remaining(&self) -> usize {
        self.replies.len()
    }
}

impl ByteChannel for ScriptedChannel {
    fn discard_input(&mut self) -> Result<(), TransportError> {
        self.discards += 1;
        self.pending = None;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.written.push(frame.to_vec());
        match self.replies.pop_front() {
            Some(ScriptedReply::Frame(bytes)) => {
                self.pending = Some(bytes);
                Ok(())
            }
            Some(ScriptedReply::Silence) | None => {
                self.pending = None;
                Ok(())
            }
            Some(ScriptedReply::WriteFailure) => {
                self.pending = None;
                Err(TransportError::Write(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "scripted write failure",
                )))
            }
        }
    }

    fn read_exact(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<(), TransportError> {
        let bytes = self.pending.take().unwrap_or_default();
        if bytes.len() < buf.len() {
            buf[..bytes.len()].copy_from_slice(&bytes);
            return Err(TransportError::Timeout {
                received: bytes.len(),
                expected: buf.len(),
            });
        }
        buf.copy_from_slice(&bytes[..buf.len()]);
        Ok(())
    }
}
