#![doc = include_str!("../Readme.md")]

#[macro_use]
mod unit;

pub mod actions;
pub mod commands;
pub mod decoding;
pub mod encoding;
pub mod modifications;
pub mod optneg;

mod error;

pub use error::{InvalidData, NotEnoughData, ProtocolError};

use modifications::{
    body::ReplaceBody,
    headers::{AddHeader, ChangeHeader},
    recipients::{AddRecipient, DeleteRecipient},
    sender::ChangeFrom,
};
