use std::borrow::Cow;

use bytes::{BufMut, BytesMut};

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::{InvalidData, ProtocolError};
use mailgate_utils::ByteParsing;

use super::{bare_address, split_args};

/// One envelope recipient
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Recipient {
    recipient: BytesMut,
    esmtp_args: Vec<String>,
}

impl Recipient {
    const CODE: u8 = b'R';

    /// Create a recipient packet
    #[must_use]
    pub fn new(recipient: &[u8], esmtp_args: &[&str]) -> Self {
        Self {
            recipient: BytesMut::from(recipient),
            esmtp_args: esmtp_args.iter().map(ToString::to_string).collect(),
        }
    }

    /// The recipient as received by the MTA
    #[must_use]
    pub fn recipient(&self) -> Cow<str> {
        String::from_utf8_lossy(&self.recipient)
    }

    /// The recipient bytes exactly as the MTA sent them
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.recipient
    }

    /// The recipient address without angle brackets
    #[must_use]
    pub fn address(&self) -> String {
        bare_address(&self.recipient)
    }

    /// Esmtp arguments of the RCPT command, empty if there were none
    #[must_use]
    pub fn esmtp_args(&self) -> &[String] {
        &self.esmtp_args
    }
}

impl Parsable for Recipient {
    const CODE: u8 = Self::CODE;

    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        let Some(recipient) = buffer.delimited(0) else {
            return Err(InvalidData::new(
                "Received recipient packet without null byte terminating the recipient",
                buffer,
            )
            .into());
        };

        Ok(Self {
            recipient,
            esmtp_args: split_args(&buffer),
        })
    }
}

impl Writable for Recipient {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.extend_from_slice(&self.recipient);
        buffer.put_u8(0);
        for arg in &self.esmtp_args {
            buffer.put_slice(arg.as_bytes());
            buffer.put_u8(0);
        }
    }

    fn len(&self) -> usize {
        self.recipient.len() + 1 + self.esmtp_args.iter().map(|a| a.len() + 1).sum::<usize>()
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("<b@example.com>\0", "b@example.com", &[])]
    #[case("c@example.com\0NOTIFY=NEVER\0", "c@example.com", &["NOTIFY=NEVER"])]
    fn test_parse_recipient(
        #[case] input: &str,
        #[case] address: &str,
        #[case] args: &[&str],
    ) {
        let recipient = Recipient::parse(BytesMut::from(input)).expect("Failed parsing recipient");

        assert_eq!(recipient.address(), address);
        assert_eq!(recipient.esmtp_args(), args);
    }

    #[test]
    fn test_parse_recipient_missing_terminator() {
        let _err = Recipient::parse(BytesMut::from("b@example.com"))
            .expect_err("Parsed recipient without terminator");
    }
}
