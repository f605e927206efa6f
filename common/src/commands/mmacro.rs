use bytes::{BufMut, BytesMut};

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::{NotEnoughData, ProtocolError};
use mailgate_utils::ByteParsing;

/// Macro values the MTA defines for the stage identified by `code`.
///
/// Macros are never answered.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Macro {
    /// The command code of the stage these macros belong to
    pub code: u8,
    macros: Vec<(String, String)>,
}

impl Macro {
    const CODE: u8 = b'D';

    /// Create a macro packet for the stage `code`
    #[must_use]
    pub fn new(code: u8, macros: &[(&str, &str)]) -> Self {
        Self {
            code,
            macros: macros
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    /// An iterator over received macros in (name, value) format.
    pub fn macros(&self) -> impl Iterator<Item = (&str, &str)> {
        self.macros.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Parsable for Macro {
    const CODE: u8 = Self::CODE;

    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        let Some(code) = buffer.safe_get_u8() else {
            return Err(NotEnoughData::new("Macro", "Code missing", 1, 0, buffer).into());
        };

        let field_count = bytecount::count(&buffer, 0);
        let mut macros = Vec::with_capacity(field_count / 2);
        while !buffer.is_empty() {
            let Some(name) = buffer.delimited(0) else {
                return Err(NotEnoughData::new(
                    "Macro",
                    "missing null byte delimiter after name",
                    1,
                    0,
                    buffer,
                )
                .into());
            };

            let Some(value) = buffer.delimited(0) else {
                return Err(NotEnoughData::new(
                    "Macro",
                    "missing null byte delimiter after value",
                    1,
                    0,
                    buffer,
                )
                .into());
            };

            macros.push((
                String::from_utf8_lossy(&name).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            ));
        }

        Ok(Self { code, macros })
    }
}

impl Writable for Macro {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_u8(self.code);
        for (name, value) in &self.macros {
            buffer.put_slice(name.as_bytes());
            buffer.put_u8(0);
            buffer.put_slice(value.as_bytes());
            buffer.put_u8(0);
        }
    }

    fn len(&self) -> usize {
        1 + self
            .macros
            .iter()
            .map(|(k, v)| k.len() + v.len() + 2)
            .sum::<usize>()
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
}
