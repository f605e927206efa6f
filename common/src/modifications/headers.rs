//! Add or change message headers

use std::borrow::Cow;

use bytes::{BufMut, BytesMut};

use crate::commands::Header;
use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::{NotEnoughData, ProtocolError};
use mailgate_utils::ByteParsing;

/// Append a header to the header block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddHeader {
    header: Header,
}

impl AddHeader {
    const CODE: u8 = b'h';

    /// Add header `name` with `value`
    #[must_use]
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            header: Header::new(name.as_bytes(), value.as_bytes()),
        }
    }

    /// The name of the header
    #[must_use]
    pub fn name(&self) -> Cow<str> {
        self.header.name()
    }

    /// The value of the header
    #[must_use]
    pub fn value(&self) -> Cow<str> {
        self.header.value()
    }
}

impl Parsable for AddHeader {
    const CODE: u8 = Self::CODE;

    fn parse(buffer: BytesMut) -> Result<Self, ProtocolError> {
        let header = Header::parse(buffer)?;

        Ok(Self { header })
    }
}

impl Writable for AddHeader {
    fn write(&self, buffer: &mut BytesMut) {
        self.header.write(buffer);
    }

    fn len(&self) -> usize {
        self.header.len()
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
}

/// Change an existing header.
///
/// The index counts headers sharing `name`, starting at 1. An empty value
/// deletes the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeHeader {
    index: u32,
    header: Header,
}

impl ChangeHeader {
    const CODE: u8 = b'm';

    /// Change the `index`th header called `name` to `value`
    #[must_use]
    pub fn new(index: u32, name: &str, value: &str) -> Self {
        Self {
            index,
            header: Header::new(name.as_bytes(), value.as_bytes()),
        }
    }

    /// The name of the header
    #[must_use]
    pub fn name(&self) -> Cow<str> {
        self.header.name()
    }

    /// The new value, empty to delete
    #[must_use]
    pub fn value(&self) -> Cow<str> {
        self.header.value()
    }

    /// Which of the headers sharing `name` to change
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Parsable for ChangeHeader {
    const CODE: u8 = Self::CODE;

    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        let Some(index) = buffer.safe_get_u32() else {
            let got = buffer.len();
            return Err(
                NotEnoughData::new("ChangeHeader", "Index missing", 4, got, buffer).into(),
            );
        };
        let header = Header::parse(buffer)?;

        Ok(Self { index, header })
    }
}

impl Writable for ChangeHeader {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_u32(self.index);
        self.header.write(buffer);
    }

    fn len(&self) -> usize {
        4 + self.header.len()
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

    #[test]
    fn test_add_header() {
        let mut buffer = BytesMut::from("h");
        AddHeader::new("name", "value").write(&mut buffer);

        assert_eq!(buffer, BytesMut::from("hname\0value\0"));
    }

    #[rstest]
    #[case(1, "name", "value", &b"\0\0\0\x01name\0value\0"[..])]
    #[case(2, "name", "", &b"\0\0\0\x02name\0\0"[..])]
    fn test_change_header(
        #[case] index: u32,
        #[case] name: &str,
        #[case] value: &str,
        #[case] expected: &[u8],
    ) {
        let change = ChangeHeader::new(index, name, value);
        let mut buffer = BytesMut::new();
        change.write(&mut buffer);

        assert_eq!(&buffer[..], expected);
        assert_eq!(ChangeHeader::parse(buffer).expect("Failed parsing change header"), change);
    }
}
