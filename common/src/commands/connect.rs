use std::net::{IpAddr, SocketAddr};

use bytes::{BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::decoding::Parsable;
use crate::encoding::Writable;
use crate::{InvalidData, NotEnoughData, ProtocolError};
use mailgate_utils::ByteParsing;

/// How the SMTP client is connected to the MTA
#[allow(missing_docs)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Family {
    Unknown = b'U',
    Unix = b'L',
    Inet = b'4',
    Inet6 = b'6',
}

/// Connect information about the smtp client
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Connect {
    hostname: String,
    /// The connection type of the SMTP client
    pub family: Family,
    /// On an IP connection, the client's port
    pub port: Option<u16>,
    address: String,
}

impl Connect {
    const CODE: u8 = b'C';

    /// Create a new connect packet
    #[must_use]
    pub fn new(hostname: &str, family: Family, port: Option<u16>, address: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            family,
            port,
            address: address.to_string(),
        }
    }

    /// Describe a TCP peer
    #[must_use]
    pub fn from_peer(hostname: &str, peer: SocketAddr) -> Self {
        let family = match peer.ip() {
            IpAddr::V4(_) => Family::Inet,
            IpAddr::V6(_) => Family::Inet6,
        };
        Self::new(hostname, family, Some(peer.port()), &peer.ip().to_string())
    }

    /// The client's reverse DNS name as the MTA saw it
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The client address, an IP or a socket path depending on [`Family`]
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Parsable for Connect {
    const CODE: u8 = Self::CODE;

    fn parse(mut buffer: BytesMut) -> Result<Self, ProtocolError> {
        let Some(hostname) = buffer.delimited(0) else {
            return Err(InvalidData::new(
                "Null-byte missing in connect packet to delimit hostname",
                buffer,
            )
            .into());
        };

        let Some(family) = buffer.safe_get_u8() else {
            return Err(
                NotEnoughData::new("Connect", "Family missing", 1, 0, buffer).into(),
            );
        };
        let Ok(family) = Family::try_from(family) else {
            return Err(InvalidData::new(
                "Received unknown protocol family for connection info",
                BytesMut::from(&[family][..]),
            )
            .into());
        };

        if family == Family::Unknown {
            return Ok(Self::new(
                &String::from_utf8_lossy(&hostname),
                family,
                None,
                "",
            ));
        }

        let Some(port) = buffer.safe_split_to(2) else {
            let got = buffer.len();
            return Err(NotEnoughData::new("Connect", "Port missing", 2, got, buffer).into());
        };
        let port = u16::from_be_bytes([port[0], port[1]]);
        let port = matches!(family, Family::Inet | Family::Inet6).then_some(port);

        let address = buffer.delimited(0).unwrap_or(buffer);

        Ok(Self {
            hostname: String::from_utf8_lossy(&hostname).into_owned(),
            family,
            port,
            address: String::from_utf8_lossy(&address).into_owned(),
        })
    }
}

impl Writable for Connect {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_slice(self.hostname.as_bytes());
        buffer.put_u8(0);
        buffer.put_u8(self.family.into());
        if self.family == Family::Unknown {
            return;
        }
        buffer.put_u16(self.port.unwrap_or_default());
        buffer.put_slice(self.address.as_bytes());
        buffer.put_u8(0);
    }

    fn len(&self) -> usize {
        if self.family == Family::Unknown {
            return self.hostname.len() + 2;
        }
        self.hostname.len() + 1 + 1 + 2 + self.address.len() + 1
    }

    fn code(&self) -> u8 {
        Self::CODE
    }
}
