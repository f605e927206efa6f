//! Change the envelope sender

use bytes::{BufMut, BytesMut};

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::{InvalidData, ProtocolError};
use mailgate_utils::ByteParsing;

/// Replace the envelope sender, optionally with new esmtp arguments
#[doc(alias = "SMFIR_CHGFROM")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFrom {
    sender: String,
    esmtp_args: Option<String>,
}

impl ChangeFrom {
    const CODE: u8 = b'e';

    /// Change the sender to `sender`
    #[must_use]
    pub fn new(sender: &str, esmtp_args: Option<&str>) -> Self {
        Self {
            sender: sender.to_string(),
            esmtp_args: esmtp_args.map(ToString::to_string),
        }
    }

    /// The new sender
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Esmtp arguments for the new sender
    #[must_use]
    pub fn esmtp_args(&self) -> Option<&str> {
        self.esmtp_args.as_deref()
    }
}

impl Parsable for ChangeFrom {
    const CODE: u8 = Self::CODE;

    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        let Some(sender) = buffer.delimited(0) else {
            return Err(InvalidData::new(
                "Received change from packet without null byte terminating the sender",
                buffer,
            )
            .into());
        };
        let esmtp_args = buffer
            .delimited(0)
            .filter(|args| !args.is_empty())
            .map(|args| String::from_utf8_lossy(&args).into_owned());

        Ok(Self {
            sender: String::from_utf8_lossy(&sender).into_owned(),
            esmtp_args,
        })
    }
}

impl Writable for ChangeFrom {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_slice(self.sender.as_bytes());
        buffer.put_u8(0);
        if let Some(args) = &self.esmtp_args {
            buffer.put_slice(args.as_bytes());
            buffer.put_u8(0);
        }
    }

    fn len(&self) -> usize {
        self.sender.len() + 1 + self.esmtp_args.as_ref().map_or(0, |a| a.len() + 1)
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
}
