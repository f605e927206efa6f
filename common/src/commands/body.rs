use bytes::BytesMut;

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::ProtocolError;

/// A chunk of the message body, passed through verbatim
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Body {
    body: BytesMut,
}

impl From<&[u8]> for Body {
    fn from(value: &[u8]) -> Self {
        Self {
            body: BytesMut::from(value),
        }
    }
}

impl Body {
    const CODE: u8 = b'B';

    /// Access the contained body bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }
}

impl Parsable for Body {
    const CODE: u8 = Self::CODE;

    fn parse(buffer: BytesMut) -> Result<Self, ProtocolError> {
        Ok(Self { body: buffer })
    }
}

impl Writable for Body {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.extend_from_slice(&self.body);
    }

    fn len(&self) -> usize {
        self.body.len()
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
}

unit_packet!(
    /// The body is complete, the filter now has to decide
    #[doc(alias = "SMFIC_BODYEOB")]
    EndOfBody = b'E'
);
