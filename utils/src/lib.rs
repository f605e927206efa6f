//! Small helpers to pull structured pieces out of a [`BytesMut`] without
//! panicking on short input.

use std::mem::size_of;

use bytes::{Buf, BytesMut};

/// Non-panicking extraction of fields from a receive buffer.
///
/// Every method returns `None` (and leaves the buffer untouched) if the
/// requested piece is not (yet) present.
pub trait ByteParsing {
    /// Split off everything up to `delimiter`, consuming the delimiter.
    fn delimited(&mut self, delimiter: u8) -> Option<BytesMut>;
    /// Split off a line terminated by `\n`, consuming the terminator.
    ///
    /// A `\r` directly before the `\n` is stripped as well.
    fn crlf_line(&mut self) -> Option<BytesMut>;
    /// Split off the first `at` bytes.
    fn safe_split_to(&mut self, at: usize) -> Option<BytesMut>;
    /// Read a single byte.
    fn safe_get_u8(&mut self) -> Option<u8>;
    /// Read a big endian `u32`.
    fn safe_get_u32(&mut self) -> Option<u32>;
}

impl ByteParsing for BytesMut {
    fn delimited(&mut self, delimiter: u8) -> Option<BytesMut> {
        let index = self.iter().position(|&b| b == delimiter)?;

        let off = self.split_to(index);
        self.advance(1);

        Some(off)
    }

    fn crlf_line(&mut self) -> Option<BytesMut> {
        let mut line = self.delimited(b'\n')?;
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(line)
    }

    fn safe_split_to(&mut self, at: usize) -> Option<Self> {
        if at > self.len() {
            return None;
        }
        Some(self.split_to(at))
    }

    fn safe_get_u8(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        Some(self.get_u8())
    }

    fn safe_get_u32(&mut self) -> Option<u32> {
        if self.len() < size_of::<u32>() {
            return None;
        }
        Some(self.get_u32())
    }
}

/// Whether `haystack` starts with `prefix`, ignoring ASCII case.
#[must_use]
pub fn starts_with_ignore_case(haystack: &[u8], prefix: &[u8]) -> bool {
    haystack.len() >= prefix.len() && haystack[..prefix.len()].eq_ignore_ascii_case(prefix)
}
