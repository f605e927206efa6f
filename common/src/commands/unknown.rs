use bytes::{BufMut, BytesMut};

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::{InvalidData, ProtocolError};
use mailgate_utils::ByteParsing;

/// An SMTP command the MTA did not recognise
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Unknown {
    data: BytesMut,
}

impl Unknown {
    const CODE: u8 = b'U';

    /// The raw command line
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl From<&[u8]> for Unknown {
    fn from(value: &[u8]) -> Self {
        Self {
            data: BytesMut::from(value),
        }
    }
}

impl Parsable for Unknown {
    const CODE: u8 = Self::CODE;

    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        let Some(data) = buffer.delimited(0) else {
            return Err(InvalidData::new(
                "Received unknown packet without terminating null byte",
                buffer,
            )
            .into());
        };
        Ok(Self { data })
    }
}

impl Writable for Unknown {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.extend_from_slice(&self.data);
        buffer.put_u8(0);
    }

    fn len(&self) -> usize {
        self.data.len() + 1
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
}
