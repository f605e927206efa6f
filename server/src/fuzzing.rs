//! Entry points for the fuzz targets

use asynchronous_codec::Decoder;
use bytes::BytesMut;
use mailgate_common::{decoding::ClientCommand, ProtocolError};

use crate::codec::MilterCodec;

/// Decode a single frame like a milter session would
///
/// # Errors
/// Whatever the codec rejects
pub fn fuzz_parse(buffer: &mut BytesMut) -> Result<Option<ClientCommand>, ProtocolError> {
    MilterCodec::new(crate::config::DEFAULT_MAX_FRAME_SIZE).decode(buffer)
}
