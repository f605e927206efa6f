//! What may be parsed from the wire

use bytes::{Buf, BytesMut};

use crate::actions::{
    Abort, Continue, Discard, Quit, QuitNc, Reject, ReplyCode, Tempfail,
};
use crate::{
    AddHeader, AddRecipient, ChangeFrom, ChangeHeader, DeleteRecipient, InvalidData,
    NotEnoughData, ProtocolError, ReplaceBody,
};

use super::commands::{
    Body, Connect, Data, EndOfBody, EndOfHeader, Header, Helo, Macro, Mail, Recipient, Unknown,
};
use super::optneg::OptNeg;

/// Parse something 'from the wire'.
pub(crate) trait Parsable: Sized {
    /// The unique id code for this item
    const CODE: u8;

    /// Parse a `Self` from the given `BytesMut` buffer.
    ///
    /// # Errors
    /// This can fail to parse, returning a [`ProtocolError`].
    fn parse(buffer: BytesMut) -> Result<Self, ProtocolError>;
}

macro_rules! parse_command {
    ($container_name:ident, $($variant:ident),+$(,)?) => {
        /// See the contained variants for more.
        #[allow(missing_docs)]
        #[derive(Debug, Clone, strum::Display)]
        pub enum $container_name {
            $($variant($variant),)+
        }

        impl $container_name {
            /// Parse a bytes buffer (code byte followed by payload) into
            /// this structured data
            ///
            /// # Errors
            /// This fn may return errors if the received data did not match
            /// valid data for this command.
            pub fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
                if buffer.is_empty() {
                    return Err(NotEnoughData::new(
                        stringify!($container_name),
                        "code missing to detect which command it is",
                        1,
                        0,
                        buffer
                    ).into());
                }
                let code = buffer.get_u8();
                match code {
                    $($variant::CODE => Ok($variant::parse(buffer)?.into()),)+
                    _ => {
                        Err(InvalidData::new("Unknown command sent with code", BytesMut::from(&[code][..])).into())
                    }
                }
            }
        }

        $(impl From<$variant> for $container_name {
            fn from(value: $variant) -> Self {
                Self::$variant(value)
            }
        })+

    }
}

// Everything the MTA may send.
parse_command!(
    ClientCommand,
    // Milter control
    OptNeg,
    Abort,
    Quit,
    QuitNc,
    // Special info
    Macro,
    Unknown,
    // SMTP opening
    Connect,
    Helo,
    // Envelope
    Mail,
    Recipient,
    Data,
    // Header
    Header,
    EndOfHeader,
    // Body
    Body,
    EndOfBody,
);

// Everything a filter may answer.
parse_command!(
    ServerCommand,
    // Option negotiation
    OptNeg,
    // The actions
    Continue,
    Discard,
    Reject,
    Tempfail,
    ReplyCode,
    // Modifications
    AddHeader,
    ChangeHeader,
    ChangeFrom,
    AddRecipient,
    DeleteRecipient,
    ReplaceBody,
);

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn test_parse_abort() {
        let command =
            ClientCommand::parse(BytesMut::from(&b"A"[..])).expect("Failed parsing abort data");

        assert_matches!(command, ClientCommand::Abort(_));
    }

    #[test]
    fn test_parse_optneg() {
        let data = vec![b'O', 0, 0, 0, 6, 0, 0, 0, 0, 0, 0, 0, 0];

        let command =
            ClientCommand::parse(BytesMut::from_iter(data)).expect("Failed parsing optneg data");

        assert_matches!(command, ClientCommand::OptNeg(o) if o.version == 6);
    }

    #[test]
    fn test_parse_reply_code() {
        let command = ServerCommand::parse(BytesMut::from("y550 5.7.1 no\0"))
            .expect("Failed parsing reply code");

        assert_matches!(command, ServerCommand::ReplyCode(r) if r.rcode() == 550);
    }

    #[test]
    fn test_unknown_code() {
        let err = ClientCommand::parse(BytesMut::from("z")).expect_err("Parsed unknown code");

        assert_matches!(err, ProtocolError::InvalidData(_));
    }

    #[test]
    fn test_empty() {
        let err = ServerCommand::parse(BytesMut::new()).expect_err("Parsed empty buffer");

        assert_matches!(err, ProtocolError::NotEnoughData(_));
    }
}
