//! Anything related to option negotiation between MTA and filter

mod capability;
mod macros;
mod protocol;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::{NotEnoughData, ProtocolError};

pub use capability::{Capability, CapabilitySet, Side};
pub use macros::{MacroStage, MacroStages};
pub use protocol::Protocol;

/// `SMFIC_OPTNEG`, sent by the MTA first and answered by the filter
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OptNeg {
    /// The milter protocol version
    pub version: u32,
    /// Which modifications may be sent to the MTA
    pub capabilities: Capability,
    /// Which commands are sent and answered
    pub protocol: Protocol,
    /// Which macros the filter would like to get
    pub macro_stages: MacroStages,
}

impl Default for OptNeg {
    fn default() -> Self {
        Self {
            version: Self::VERSION,
            capabilities: Capability::default(),
            protocol: Protocol::default(),
            macro_stages: MacroStages::default(),
        }
    }
}

/// Comparing compatibilities between different optneg packets may produce
/// this error. See [`OptNeg::merge_compatible`] for details.
#[derive(Debug, Error)]
pub enum CompatibilityError {
    /// The MTA speaks a newer protocol version than we do
    #[error("Received version {received} which is not compatible with {supported}")]
    UnsupportedVersion {
        /// The version received
        received: u32,
        /// The version supported
        supported: u32,
    },
}

impl OptNeg {
    /// The highest protocol version we speak, Postfix defaults to it since 2.6
    pub const VERSION: u32 = 6;

    const DATA_SIZE: usize = 4 + 4 + 4;
    const CODE: u8 = b'O';

    /// The negotiation request of this filter: every capability, the queue
    /// id at end of body and the authenticated user at MAIL.
    #[must_use]
    pub fn filter_request() -> Self {
        let mut optneg = Self::default();
        optneg
            .macro_stages
            .with_stage(MacroStage::MailFrom, &["{auth_authen}"]);
        optneg.macro_stages.with_stage(MacroStage::EndOfBody, &["i"]);
        optneg
    }

    /// Merge `self` (what the filter wants) with the MTA's offer `other`.
    ///
    /// The version drops to the MTA's, protocol flags and capabilities are
    /// intersected.
    ///
    /// # Errors
    /// If the MTA speaks a newer version than we do
    pub fn merge_compatible(mut self, other: &Self) -> Result<Self, CompatibilityError> {
        if self.version < other.version {
            return Err(CompatibilityError::UnsupportedVersion {
                received: other.version,
                supported: self.version,
            });
        }

        self.version = other.version;
        self.protocol = self.protocol.intersection(other.protocol);
        self.capabilities = self.capabilities.intersection(other.capabilities);

        Ok(self)
    }
}

impl Parsable for OptNeg {
    const CODE: u8 = Self::CODE;

    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        if buffer.len() < Self::DATA_SIZE {
            let got = buffer.len();
            return Err(NotEnoughData::new(
                "Option negotiation",
                "version, capabilities or protocol missing",
                Self::DATA_SIZE,
                got,
                buffer,
            )
            .into());
        }

        let version = buffer.get_u32();
        let capabilities = Capability::from_bits_retain(buffer.get_u32());
        let protocol = Protocol::from_bits_retain(buffer.get_u32());

        Ok(Self {
            version,
            capabilities,
            protocol,
            macro_stages: MacroStages::parse(buffer),
        })
    }
}

impl Writable for OptNeg {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_u32(self.version);
        buffer.put_u32(self.capabilities.bits());
        buffer.put_u32(self.protocol.bits());

        self.macro_stages.write(buffer);
    }

    fn len(&self) -> usize {
        Self::DATA_SIZE + self.macro_stages.len()
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
}
