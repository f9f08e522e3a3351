//! Serial command protocol: framing, request decoding and dispatch.
//!
//! Wire format of every frame, in both directions:
//!
//! ```text
//! 43 53 4F | cmd | len | payload[len] | checksum | 03 FF
//! ```
//!
//! The checksum is the wrapping byte sum of `cmd`, `len` and the payload.
//! Every accepted request yields exactly one response: an ACK (`0x06`,
//! payload `[cmd]`), a NACK (`0x15`, payload `[cmd, code]`) or, for reads, a
//! frame echoing the request code with the record bytes as payload.

use core::fmt;

use heapless::Vec;
use winnow::binary::length_take;
use winnow::combinator::preceded;
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{any, literal};

pub mod command;
pub mod dispatch;

pub use command::{CommandCode, NackCode, Request};
pub use dispatch::{CommandContext, FrameSink, dispatch, reject};

pub const PREAMBLE: [u8; 3] = [0x43, 0x53, 0x4F];
pub const TRAILER: [u8; 2] = [0x03, 0xFF];

/// Response code acknowledging a command.
pub const ACK: u8 = 0x06;
/// Response code rejecting a command.
pub const NACK: u8 = 0x15;

/// Largest payload carried in either direction.
pub const MAX_PAYLOAD: usize = 48;
/// Framing bytes around the payload.
pub const FRAME_OVERHEAD: usize = PREAMBLE.len() + 2 + 1 + TRAILER.len();
pub const MAX_FRAME: usize = MAX_PAYLOAD + FRAME_OVERHEAD;

pub type Payload = Vec<u8, MAX_PAYLOAD>;
pub type EncodedFrame = Vec<u8, MAX_FRAME>;

/// Reasons a received byte stream did not produce a usable frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Checksum mismatch on an otherwise well-formed frame.
    Checksum { command: u8 },
    /// Declared payload length exceeds what the controller accepts.
    Length { command: u8 },
    /// Frame did not end with the trailer.
    Trailer { command: u8 },
    /// Bytes did not form a frame at all.
    Malformed,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Checksum { command } => write!(f, "checksum mismatch on 0x{command:02X}"),
            FrameError::Length { command } => write!(f, "payload too long on 0x{command:02X}"),
            FrameError::Trailer { command } => write!(f, "missing trailer on 0x{command:02X}"),
            FrameError::Malformed => f.write_str("malformed frame"),
        }
    }
}

/// Wrapping byte sum over command, length and payload.
#[must_use]
pub fn checksum(command: u8, payload: &[u8]) -> u8 {
    // Payloads are bounded by MAX_PAYLOAD, so the length always fits.
    #[allow(clippy::cast_possible_truncation)]
    let length = payload.len() as u8;
    payload
        .iter()
        .fold(command.wrapping_add(length), |sum, byte| sum.wrapping_add(*byte))
}

/// One decoded frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub command: u8,
    pub payload: Payload,
}

impl Frame {
    /// Builds a frame from a payload slice.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Length`] when `payload` exceeds [`MAX_PAYLOAD`].
    pub fn new(command: u8, payload: &[u8]) -> Result<Self, FrameError> {
        let payload = Vec::from_slice(payload).map_err(|_| FrameError::Length { command })?;
        Ok(Self { command, payload })
    }

    #[must_use]
    pub fn ack(command: u8) -> Self {
        let mut payload = Payload::new();
        let _ = payload.push(command);
        Self {
            command: ACK,
            payload,
        }
    }

    #[must_use]
    pub fn nack(command: u8, code: NackCode) -> Self {
        let mut payload = Payload::new();
        let _ = payload.push(command);
        let _ = payload.push(code.to_raw());
        Self {
            command: NACK,
            payload,
        }
    }

    #[must_use]
    pub fn checksum(&self) -> u8 {
        checksum(self.command, &self.payload)
    }

    /// Serialises the frame with preamble, checksum and trailer.
    #[must_use]
    pub fn encode(&self) -> EncodedFrame {
        let mut out = EncodedFrame::new();
        // Capacity covers the largest payload plus framing.
        let _ = out.extend_from_slice(&PREAMBLE);
        let _ = out.push(self.command);
        #[allow(clippy::cast_possible_truncation)]
        let _ = out.push(self.payload.len() as u8);
        let _ = out.extend_from_slice(&self.payload);
        let _ = out.push(self.checksum());
        let _ = out.extend_from_slice(&TRAILER);
        out
    }
}

fn frame_parts<'i>(input: &mut &'i [u8]) -> Result<(u8, &'i [u8], u8), ErrMode<ContextError>> {
    (
        preceded(literal(&PREAMBLE[..]), any),
        length_take(any),
        any,
    )
        .parse_next(input)
}

/// Decodes one complete frame.
///
/// # Errors
///
/// Returns [`FrameError::Malformed`] when the bytes are not a frame,
/// [`FrameError::Trailer`] when the trailer is wrong, or
/// [`FrameError::Checksum`] when the checksum does not match.
pub fn parse_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    let mut input = bytes;
    let (command, payload, received) =
        frame_parts(&mut input).map_err(|_| FrameError::Malformed)?;
    if input != TRAILER {
        return Err(FrameError::Trailer { command });
    }
    if checksum(command, payload) != received {
        return Err(FrameError::Checksum { command });
    }
    Frame::new(command, payload)
}

/// Byte-at-a-time receive state machine.
///
/// Hunts for the preamble, then collects exactly as many bytes as the length
/// field announces before handing the frame to [`parse_frame`].
#[derive(Debug, Default)]
pub struct FrameReceiver {
    buffer: EncodedFrame,
}

impl FrameReceiver {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
        }
    }

    /// Drops any partially received frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Feeds one received byte; returns a result once a frame completes.
    pub fn push(&mut self, byte: u8) -> Option<Result<Frame, FrameError>> {
        let position = self.buffer.len();
        if position < PREAMBLE.len() {
            if byte == PREAMBLE[position] {
                let _ = self.buffer.push(byte);
            } else {
                self.buffer.clear();
                if byte == PREAMBLE[0] {
                    let _ = self.buffer.push(byte);
                }
            }
            return None;
        }

        if self.buffer.push(byte).is_err() {
            self.buffer.clear();
            return Some(Err(FrameError::Malformed));
        }

        let header = PREAMBLE.len() + 2;
        if self.buffer.len() < header {
            return None;
        }
        let command = self.buffer[PREAMBLE.len()];
        let length = usize::from(self.buffer[PREAMBLE.len() + 1]);
        if length > MAX_PAYLOAD {
            self.buffer.clear();
            return Some(Err(FrameError::Length { command }));
        }
        if self.buffer.len() < length + FRAME_OVERHEAD {
            return None;
        }

        let result = parse_frame(&self.buffer);
        self.buffer.clear();
        Some(result)
    }
}
