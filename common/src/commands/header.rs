use std::borrow::Cow;

use bytes::{BufMut, BytesMut};

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::{InvalidData, ProtocolError};
use mailgate_utils::ByteParsing;

/// One message header as received by the MTA
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Header {
    name: BytesMut,
    value: BytesMut,
}

impl Header {
    const CODE: u8 = b'L';

    /// Create a header packet
    #[must_use]
    pub fn new(name: &[u8], value: &[u8]) -> Self {
        Self {
            name: BytesMut::from(name),
            value: BytesMut::from(value),
        }
    }

    /// The header name
    #[must_use]
    pub fn name(&self) -> Cow<str> {
        String::from_utf8_lossy(&self.name)
    }

    /// The header value, folded lines are kept as the MTA sent them
    #[must_use]
    pub fn value(&self) -> Cow<str> {
        String::from_utf8_lossy(&self.value)
    }

    /// The header as a message line, `Name: value` and CRLF, bytes untouched
    #[must_use]
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.name.len() + self.value.len() + 4);
        line.extend_from_slice(&self.name);
        line.extend_from_slice(b": ");
        line.extend_from_slice(&self.value);
        line.extend_from_slice(b"\r\n");
        line
    }
}

impl Parsable for Header {
    const CODE: u8 = Self::CODE;

    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        let Some(name) = buffer.delimited(0) else {
            return Err(InvalidData::new(
                "Received header packet without name terminated by null byte",
                buffer,
            )
            .into());
        };

        let Some(value) = buffer.delimited(0) else {
            return Err(InvalidData::new(
                "Received header packet without value terminated by null byte",
                buffer,
            )
            .into());
        };

        Ok(Self { name, value })
    }
}

impl Writable for Header {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.extend_from_slice(&self.name);
        buffer.put_u8(0);
        buffer.extend_from_slice(&self.value);
        buffer.put_u8(0);
    }

    fn len(&self) -> usize {
        self.name.len() + 1 + self.value.len() + 1
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
}

unit_packet!(
    /// All headers have been sent
    #[doc(alias = "SMFIC_EOH")]
    EndOfHeader = b'N'
);

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("Subject\0hello\0", Some(Header::new(b"Subject", b"hello")))]
    #[case("Subject\0hello", None)]
    #[case("Subjecthello", None)]
    fn test_header(#[case] input: &str, #[case] expected: Option<Header>) {
        assert_eq!(Header::parse(BytesMut::from(input)).ok(), expected);
    }

    #[test]
    fn test_eight_bit_header_kept() {
        let header = Header::parse(BytesMut::from(&b"Subject\0caf\xe9\0"[..]))
            .expect("Failed parsing header");

        assert_eq!(header.to_line(), b"Subject: caf\xe9\r\n");
        assert_eq!(header.value(), "caf\u{FFFD}");
    }
}
