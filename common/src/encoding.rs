//! What may be written to the wire

use std::fmt::{self, Display};

use bytes::BytesMut;
use enum_dispatch::enum_dispatch;

use super::actions::{Abort, Action, Continue, Discard, Quit, QuitNc, Reject, ReplyCode, Tempfail};
use super::modifications::ModificationAction;

use super::commands::{
    Body, Command, Connect, Data, EndOfBody, EndOfHeader, Header, Helo, Macro, Mail, Recipient,
    Unknown,
};
use super::optneg::OptNeg;

/// Write something 'to the wire'.
///
/// The frame header (length and code byte) is written by the codec, an
/// implementor only writes its payload.
#[enum_dispatch(ServerMessage)]
#[enum_dispatch(ClientMessage)]
#[enum_dispatch(ModificationAction)]
#[enum_dispatch(Command)]
#[enum_dispatch(Action)]
pub trait Writable {
    /// Write the payload of `self` to the buffer
    fn write(&self, buffer: &mut BytesMut);

    /// Byte-length of the payload [`Self::write`] produces
    fn len(&self) -> usize;

    /// The (unique) command code of this packet
    fn code(&self) -> u8;

    /// Whether the payload is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Packets the filter (us) sends to the MTA.
#[enum_dispatch]
#[derive(Debug)]
pub enum ServerMessage {
    /// Answer to the option negotiation
    Optneg(OptNeg),
    /// Control flow answer to a command
    Action,
    /// Mutation requested at end of body
    ModificationAction,
}

impl Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Optneg(_optneg) => write!(f, "Optneg"),
            ServerMessage::Action(action) => write!(f, "Action/{action}"),
            ServerMessage::ModificationAction(mod_action) => {
                write!(f, "ModificationAction/{mod_action}")
            }
        }
    }
}

/// Packets the MTA sends to the filter.
///
/// The server only ever parses these, writing them is what the test harnesses
/// playing the MTA do.
#[enum_dispatch]
#[derive(Debug)]
pub enum ClientMessage {
    /// Options offered by the MTA
    Optneg(OptNeg),
    /// Abort and quit requests
    Action,
    /// SMTP conversation reports
    Command,
    /// Macro definitions for the next command
    Macro,
}

impl Display for ClientMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientMessage::Optneg(_optneg) => write!(f, "Optneg"),
            ClientMessage::Action(action) => write!(f, "Action/{action}"),
            ClientMessage::Command(command) => write!(f, "Command/{command}"),
            ClientMessage::Macro(_macro) => write!(f, "Macro"),
        }
    }
}
