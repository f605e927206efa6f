//! Replace body parts

use bytes::BytesMut;

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::ProtocolError;

/// Replace the body of the incoming mail.
///
/// If this modification action is used, the **whole** body has to be sent back.
/// It can be split across multiple `ReplaceBody` actions, each no larger than
/// [`ReplaceBody::MAX_CHUNK`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceBody {
    body: BytesMut,
}

impl ReplaceBody {
    const CODE: u8 = b'b';

    /// The largest chunk the MTA accepts in a single packet
    pub const MAX_CHUNK: usize = 65535;

    /// A body part to replace the original
    #[must_use]
    pub fn new(body: &[u8]) -> Self {
        Self {
            body: BytesMut::from(body),
        }
    }

    /// The body part
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }
}

impl Parsable for ReplaceBody {
    const CODE: u8 = Self::CODE;

    fn parse(buffer: BytesMut) -> Result<Self, ProtocolError> {
        Ok(Self { body: buffer })
    }
}

impl Writable for ReplaceBody {
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
