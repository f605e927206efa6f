//! Modification requests towards the MTA
//!
//! Only in answer to an end-of-body may a filter send these, and only if
//! the matching [`Capability`] was negotiated by both sides.

pub mod body;
pub mod headers;
pub mod recipients;
pub mod sender;

use bytes::BytesMut;
use enum_dispatch::enum_dispatch;

use crate::encoding::Writable;
use crate::optneg::Capability;

use body::ReplaceBody;
use headers::{AddHeader, ChangeHeader};
use recipients::{AddRecipient, DeleteRecipient};
use sender::ChangeFrom;

/// The container of possible milter modification actions
#[enum_dispatch]
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum ModificationAction {
    /// Add a header at the end of the header block
    AddHeader,
    /// Change or delete an existing header
    ChangeHeader,
    /// Change the envelope sender
    ChangeFrom,
    /// Add an envelope recipient
    AddRecipient,
    /// Delete an envelope recipient
    DeleteRecipient,
    /// Replace (a chunk of) the body
    ReplaceBody,
}

impl ModificationAction {
    /// The capability both sides must have negotiated for this action
    #[must_use]
    pub fn required_capability(&self) -> Capability {
        match self {
            ModificationAction::AddHeader(_) => Capability::SMFIF_ADDHDRS,
            ModificationAction::ChangeHeader(_) => Capability::SMFIF_CHGHDRS,
            ModificationAction::ChangeFrom(_) => Capability::SMFIF_CHGFROM,
            ModificationAction::AddRecipient(_) => Capability::SMFIF_ADDRCPT,
            ModificationAction::DeleteRecipient(_) => Capability::SMFIF_DELRCPT,
            ModificationAction::ReplaceBody(_) => Capability::SMFIF_CHGBODY,
        }
    }
}
