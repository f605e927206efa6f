use std::io;

use bytes::BytesMut;
use thiserror::Error;

use super::optneg::CompatibilityError;

/// Everything that can go wrong turning bytes into milter packets and back
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A packet whose content made no sense
    #[error(transparent)]
    InvalidData(#[from] InvalidData),
    /// A packet that was cut short
    #[error(transparent)]
    NotEnoughData(#[from] NotEnoughData),
    /// The MTA speaks a protocol version we do not understand
    #[error(transparent)]
    CompatibilityError(#[from] CompatibilityError),
    /// A frame announced a length above the configured maximum
    #[error("Received a packet too large to decode (len {0})")]
    TooMuchData(usize),
    /// The underlying transport failed
    #[error(transparent)]
    CodecError(#[from] io::Error),
}

/// The MTA sent bytes which do not form a valid packet
#[derive(Debug, Error)]
#[error("{msg}")]
pub struct InvalidData {
    /// What was wrong
    pub msg: &'static str,
    /// The bytes we choked on
    pub offending_bytes: BytesMut,
}

impl InvalidData {
    /// Create a new `InvalidData` error
    #[must_use]
    pub fn new(msg: &'static str, offending_bytes: BytesMut) -> Self {
        Self {
            msg,
            offending_bytes,
        }
    }
}

/// A packet ended before one of its fields was complete
#[derive(Debug, Error)]
#[error("{item}: expected {expected} bytes but got {got}: {msg}")]
pub struct NotEnoughData {
    /// The packet that was being parsed
    pub item: &'static str,
    /// What was missing
    pub msg: &'static str,
    /// How many bytes the field needs
    pub expected: usize,
    /// How many bytes were left
    pub got: usize,
    /// The remaining bytes
    pub buffer: BytesMut,
}

impl NotEnoughData {
    /// Create a new `NotEnoughData` error
    #[must_use]
    pub fn new(
        item: &'static str,
        msg: &'static str,
        expected: usize,
        got: usize,
        buffer: BytesMut,
    ) -> Self {
        Self {
            item,
            msg,
            expected,
            got,
            buffer,
        }
    }
}
