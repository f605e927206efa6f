//! What the MTA reports about the SMTP conversation.
//!
//! Each command describes one step of the SMTP session the MTA is running.
//! The filter answers every command except [`Macro`] with an action.

mod body;
mod connect;
mod header;
mod helo;
mod mail;
mod mmacro;
mod recipient;
mod unknown;

use enum_dispatch::enum_dispatch;

pub use self::body::{Body, EndOfBody};
pub use self::connect::{Connect, Family};
pub use self::header::{EndOfHeader, Header};
pub use self::helo::Helo;
pub use self::mail::{Data, Mail};
pub use self::mmacro::Macro;
pub use self::recipient::Recipient;
pub use self::unknown::Unknown;

/// See the respective contents about documentation
#[allow(missing_docs)]
#[enum_dispatch]
#[derive(Debug, Clone, strum::Display)]
pub enum Command {
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
    // Unknown
    Unknown,
}

/// Strip surrounding whitespace and one pair of angle brackets from an
/// envelope address.
pub fn bare_address(raw: &[u8]) -> String {
    let address = String::from_utf8_lossy(raw);
    let address = address.trim();
    address
        .strip_prefix('<')
        .and_then(|a| a.strip_suffix('>'))
        .unwrap_or(address)
        .to_string()
}

/// Split null separated esmtp arguments, skipping empty ones.
pub(crate) fn split_args(raw: &[u8]) -> Vec<String> {
    raw.split(|&b| b == 0)
        .filter(|arg| !arg.is_empty())
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect()
}
