use std::fmt::{self, Display};

use bytes::{BufMut, BytesMut};
use itertools::Itertools;

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::{InvalidData, ProtocolError};
use mailgate_utils::ByteParsing;

const STATUS_CODE_LENGTH: usize = 3;

/// An RFC 3463 enhanced status code like `4.7.1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode([u16; STATUS_CODE_LENGTH]);

impl StatusCode {
    /// Create a status code from its class, subject and detail
    #[must_use]
    pub const fn new(class: u16, subject: u16, detail: u16) -> Self {
        Self([class, subject, detail])
    }

    /// Parse the dotted representation, `None` if it is not three numbers
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split('.');
        let mut code = [0_u16; STATUS_CODE_LENGTH];
        for slot in &mut code {
            *slot = parts.next()?.parse().ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(Self(code))
    }

    /// The leading digit: 2 success, 4 temporary, 5 permanent
    #[must_use]
    pub fn class(&self) -> u16 {
        self.0[0]
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join("."))
    }
}

/// Answer the SMTP client with this exact reply
///
/// On the wire this is a single null terminated line
/// `"<rcode> <xcode> <message>"`.
#[doc(alias = "SMFIR_REPLYCODE")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyCode {
    rcode: u16,
    xcode: StatusCode,
    message: String,
}

impl ReplyCode {
    const CODE: u8 = b'y';

    /// Create a reply code.
    ///
    /// Line breaks in `message` are replaced with spaces, a reply code is a
    /// single line.
    #[must_use]
    pub fn new(rcode: u16, xcode: StatusCode, message: &str) -> Self {
        Self {
            rcode,
            xcode,
            message: message.replace(['\r', '\n'], " "),
        }
    }

    /// Create a reply from a free text reason.
    ///
    /// If `reason` already starts with an enhanced status code of the same
    /// class as `rcode` (e.g. `"4.2.0 try later"` for 451) that one is used,
    /// otherwise `<class>.7.1` is prepended.
    #[must_use]
    pub fn with_reason(rcode: u16, reason: &str) -> Self {
        let class = rcode / 100;
        if reason.starts_with(&format!("{class}.")) {
            let (first, rest) = reason.split_once(' ').unwrap_or((reason, ""));
            if let Some(xcode) = StatusCode::parse(first) {
                return Self::new(rcode, xcode, rest.trim_start());
            }
        }
        Self::new(rcode, StatusCode::new(class, 7, 1), reason)
    }

    /// The three digit SMTP reply code
    #[must_use]
    pub fn rcode(&self) -> u16 {
        self.rcode
    }

    /// The enhanced status code
    #[must_use]
    pub fn xcode(&self) -> StatusCode {
        self.xcode
    }

    /// The human readable part
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{} {}", self.rcode, self.xcode)
        } else {
            write!(f, "{} {} {}", self.rcode, self.xcode, self.message)
        }
    }
}

impl Parsable for ReplyCode {
    const CODE: u8 = Self::CODE;

    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        let Some(line) = buffer.delimited(0) else {
            return Err(
                InvalidData::new("Reply code without terminating null byte", buffer).into(),
            );
        };
        let text = String::from_utf8_lossy(&line).into_owned();

        let mut parts = text.splitn(3, ' ');
        let Some(rcode) = parts.next().and_then(|r| r.parse::<u16>().ok()) else {
            return Err(InvalidData::new("Reply code does not start with a number", line).into());
        };
        let Some(xcode) = parts.next().and_then(StatusCode::parse) else {
            return Err(InvalidData::new("Reply code has no enhanced status code", line).into());
        };

        Ok(Self::new(rcode, xcode, parts.next().unwrap_or_default()))
    }
}

impl Writable for ReplyCode {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_slice(self.to_string().as_bytes());
        buffer.put_u8(0);
    }

    fn len(&self) -> usize {
        self.to_string().len() + 1
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
    #[case(451, "spam suspected", "451 4.7.1 spam suspected")]
    #[case(451, "4.2.0 mailbox busy", "451 4.2.0 mailbox busy")]
    #[case(550, "4.2.0 wrong class", "550 5.7.1 4.2.0 wrong class")]
    #[case(550, "5.7.0 virus found", "550 5.7.0 virus found")]
    #[case(550, "5.x not a status", "550 5.7.1 5.x not a status")]
    #[case(451, "", "451 4.7.1")]
    fn test_with_reason(#[case] rcode: u16, #[case] reason: &str, #[case] expected: &str) {
        assert_eq!(ReplyCode::with_reason(rcode, reason).to_string(), expected);
    }

    #[test]
    fn test_write_reply_code() {
        let reply = ReplyCode::with_reason(550, "blocked\r\nsecond line");
        let mut buffer = BytesMut::new();
        reply.write(&mut buffer);

        assert_eq!(&buffer[..], b"550 5.7.1 blocked  second line\0");
        assert_eq!(buffer.len(), reply.len());
    }

    #[test]
    fn test_parse_reply_code() {
        let reply = ReplyCode::parse(BytesMut::from("451 4.3.2 shutting down\0"))
            .expect("Failed parsing reply code");

        assert_eq!(reply.rcode(), 451);
        assert_eq!(reply.xcode(), StatusCode::new(4, 3, 2));
        assert_eq!(reply.message(), "shutting down");
    }

    #[test]
    fn test_parse_reply_code_invalid() {
        let _err = ReplyCode::parse(BytesMut::from("abc 4.3.2 x\0"))
            .expect_err("Parsing did not error on invalid reply code");
    }

    #[rstest]
    #[case("1.20.3", Some(StatusCode::new(1, 20, 3)))]
    #[case("1.23", None)]
    #[case("1.2.3.4", None)]
    fn test_status_code(#[case] raw: &str, #[case] expected: Option<StatusCode>) {
        assert_eq!(StatusCode::parse(raw), expected);
    }
}
