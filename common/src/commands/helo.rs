use bytes::{BufMut, BytesMut};

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::{InvalidData, ProtocolError};
use mailgate_utils::ByteParsing;

/// The HELO/EHLO name the smtp client greeted with
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Helo {
    name: String,
}

impl Helo {
    const CODE: u8 = b'H';

    /// Create a helo packet
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// The greeting name sent by the client
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Parsable for Helo {
    const CODE: u8 = Self::CODE;

    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        let Some(name) = buffer.delimited(0) else {
            return Err(InvalidData::new(
                "Received helo packet with missing null byte termination",
                buffer,
            )
            .into());
        };

        Ok(Self::new(&String::from_utf8_lossy(&name)))
    }
}

impl Writable for Helo {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_slice(self.name.as_bytes());
        buffer.put_u8(0);
    }

    fn len(&self) -> usize {
        self.name.len() + 1
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
}
