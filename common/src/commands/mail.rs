use std::borrow::Cow;

use bytes::{BufMut, BytesMut};

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::{InvalidData, ProtocolError};
use mailgate_utils::ByteParsing;

use super::{bare_address, split_args};

/// The envelope sender of a new mail transaction
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Mail {
    sender: BytesMut,
    esmtp_args: Vec<String>,
}

impl Mail {
    const CODE: u8 = b'M';

    /// Create a mail packet, `sender` as written in the SMTP command
    #[must_use]
    pub fn new(sender: &[u8], esmtp_args: &[&str]) -> Self {
        Self {
            sender: BytesMut::from(sender),
            esmtp_args: esmtp_args.iter().map(ToString::to_string).collect(),
        }
    }

    /// The sender as the MTA sent it, usually in angle brackets
    #[must_use]
    pub fn sender(&self) -> Cow<str> {
        String::from_utf8_lossy(&self.sender)
    }

    /// The sender bytes exactly as the MTA sent them
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.sender
    }

    /// The sender address without angle brackets
    #[must_use]
    pub fn address(&self) -> String {
        bare_address(&self.sender)
    }

    /// Esmtp arguments of the MAIL command, empty if there were none
    #[must_use]
    pub fn esmtp_args(&self) -> &[String] {
        &self.esmtp_args
    }
}

impl Parsable for Mail {
    const CODE: u8 = Self::CODE;

    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        let Some(sender) = buffer.delimited(0) else {
            return Err(InvalidData::new(
                "Null-byte missing in mail packet to delimit sender",
                buffer,
            )
            .into());
        };

        Ok(Self {
            sender,
            esmtp_args: split_args(&buffer),
        })
    }
}

impl Writable for Mail {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.extend_from_slice(&self.sender);
        buffer.put_u8(0);
        for arg in &self.esmtp_args {
            buffer.put_slice(arg.as_bytes());
            buffer.put_u8(0);
        }
    }

    fn len(&self) -> usize {
        self.sender.len() + 1 + self.esmtp_args.iter().map(|a| a.len() + 1).sum::<usize>()
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
}

unit_packet!(
    /// The SMTP client issued DATA, headers follow
    #[doc(alias = "SMFIC_DATA")]
    Data = b'T'
);
