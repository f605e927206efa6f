//! Packets that consist of nothing but their command code

/// Declare a payload-less packet: a unit struct, its code, and trivial
/// parsing and writing.
macro_rules! unit_packet {
    ($(#[$outer:meta])* $name:ident = $code:literal) => {
        $(#[$outer])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name;

        impl $name {
            const CODE: u8 = $code;
        }

        impl $crate::decoding::Parsable for $name {
            const CODE: u8 = Self::CODE;

            fn parse(_buffer: ::bytes::BytesMut) -> Result<Self, $crate::ProtocolError> {
                Ok(Self)
            }
        }

        impl $crate::encoding::Writable for $name {
            fn write(&self, _buffer: &mut ::bytes::BytesMut) {}

            fn len(&self) -> usize {
                0
            }

            fn code(&self) -> u8 {
                Self::CODE
            }
        }
    };
}
