//! Add or delete envelope recipients
//!
//! Neither touches the `To` header.

use std::borrow::Cow;

use bytes::{BufMut, BytesMut};

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::{InvalidData, ProtocolError};
use mailgate_utils::ByteParsing;

/// Add an envelope recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRecipient {
    recipient: BytesMut,
}

impl AddRecipient {
    const CODE: u8 = b'+';

    /// Add the specified recipient
    #[must_use]
    pub fn new(recipient: &[u8]) -> Self {
        Self {
            recipient: BytesMut::from(recipient),
        }
    }

    /// The recipient to add
    #[must_use]
    pub fn recipient(&self) -> Cow<str> {
        String::from_utf8_lossy(&self.recipient)
    }

    /// The recipient bytes as they go on the wire
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.recipient
    }
}

impl Parsable for AddRecipient {
    const CODE: u8 = Self::CODE;

    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        let Some(recipient) = buffer.delimited(0) else {
            return Err(InvalidData::new(
                "Received add recipient packet without null byte terminating it",
                buffer,
            )
            .into());
        };

        Ok(Self { recipient })
    }
}

impl Writable for AddRecipient {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.extend_from_slice(&self.recipient);
        buffer.put_u8(0);
    }

    fn len(&self) -> usize {
        self.recipient.len() + 1
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
}

/// Delete an envelope recipient, it has to match exactly what the MTA sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRecipient {
    recipient: BytesMut,
}

impl DeleteRecipient {
    const CODE: u8 = b'-';

    /// Delete the specified recipient
    #[must_use]
    pub fn new(recipient: &[u8]) -> Self {
        Self {
            recipient: BytesMut::from(recipient),
        }
    }

    /// The (exact) recipient to be deleted
    #[must_use]
    pub fn recipient(&self) -> Cow<str> {
        String::from_utf8_lossy(&self.recipient)
    }

    /// The recipient bytes as they go on the wire
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.recipient
    }
}

impl Parsable for DeleteRecipient {
    const CODE: u8 = Self::CODE;

    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        let Some(recipient) = buffer.delimited(0) else {
            return Err(InvalidData::new(
                "Received delete recipient packet without null byte terminating it",
                buffer,
            )
            .into());
        };

        Ok(Self { recipient })
    }
}

impl Writable for DeleteRecipient {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.extend_from_slice(&self.recipient);
        buffer.put_u8(0);
    }

    fn len(&self) -> usize {
        self.recipient.len() + 1
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
}
