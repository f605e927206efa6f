use asynchronous_codec::{Decoder, Encoder};
use bytes::{Buf, BufMut, BytesMut};

use mailgate_common::decoding::ClientCommand;
use mailgate_common::encoding::{ServerMessage, Writable};
use mailgate_common::ProtocolError;

const LENGTH_SIZE: usize = 4;

/// Frames milter packets: a 4 byte big endian length, then the command code
/// and its payload.
///
/// Frames announcing more than `max_frame_size` bytes are refused in both
/// directions.
#[derive(Debug, Clone)]
pub(crate) struct MilterCodec {
    max_frame_size: usize,
}

impl MilterCodec {
    pub(crate) fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for MilterCodec {
    type Item = ClientCommand;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_SIZE {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LENGTH_SIZE];
        length_bytes.copy_from_slice(&src[..LENGTH_SIZE]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        // Refuse before buffering so a peer cannot make us allocate at will
        if length > self.max_frame_size {
            return Err(ProtocolError::TooMuchData(length));
        }

        if src.len() < LENGTH_SIZE + length {
            src.reserve(LENGTH_SIZE + length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(LENGTH_SIZE + length);
        frame.advance(LENGTH_SIZE);

        Ok(Some(ClientCommand::parse(frame)?))
    }
}

impl Encoder for MilterCodec {
    type Item<'i> = &'i ServerMessage;
    type Error = ProtocolError;

    fn encode(&mut self, item: &ServerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let item_len = item.len();
        if item_len >= self.max_frame_size || item_len > u32::MAX as usize - 1 {
            return Err(ProtocolError::TooMuchData(item_len));
        }

        // The code byte counts towards the length
        let packet_len = item_len + 1;

        dst.reserve(LENGTH_SIZE + packet_len);
        dst.put_u32(packet_len as u32);
        dst.put_u8(item.code());
        item.write(dst);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use mailgate_common::actions::{Action, Continue};
    use pretty_assertions::assert_eq;

    fn codec() -> MilterCodec {
        MilterCodec::new(2_usize.pow(16))
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut buffer = BytesMut::from(&[0_u8, 0, 0, 5, b'H', b'a'][..]);

        let res = codec().decode(&mut buffer).expect("Partial frame errored");

        assert!(res.is_none());
        assert_eq!(buffer.len(), 6);
    }

    #[test]
    fn test_decode_keeps_following_frame() {
        let mut buffer = BytesMut::from(&[0_u8, 0, 0, 1, b'A', 0, 0, 0, 1, b'Q'][..]);
        let mut codec = codec();

        let first = codec.decode(&mut buffer).expect("Decoding abort failed");
        let second = codec.decode(&mut buffer).expect("Decoding quit failed");

        assert_matches!(first, Some(ClientCommand::Abort(_)));
        assert_matches!(second, Some(ClientCommand::Quit(_)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_too_large() {
        let mut buffer = BytesMut::from(&[0_u8, 1, 0, 1][..]);

        let res = codec().decode(&mut buffer);

        assert_matches!(res, Err(ProtocolError::TooMuchData(65537)));
    }

    #[test]
    fn test_encode_continue() {
        let mut buffer = BytesMut::new();
        let message = ServerMessage::Action(Action::Continue(Continue));

        codec()
            .encode(&message, &mut buffer)
            .expect("Encoding continue failed");

        assert_eq!(&buffer[..], &[0, 0, 0, 1, b'c']);
    }

    #[test]
    fn test_decode_fuzz_missing_family() {
        let mut buffer = BytesMut::from(&[0_u8, 0, 0, 5, 67, 58, 255, 1, 0][..]);

        let _res = codec().decode(&mut buffer);
    }

    #[test]
    fn test_decode_fuzz_garbage() {
        let input = [
            0_u8, 0, 0, 21, 67, 230, 186, 186, 186, 186, 42, 255, 255, 255, 255, 255, 255, 255,
            255, 255, 255, 186, 0, 52, 72, 255,
        ];
        let mut buffer = BytesMut::from(&input[..]);

        let _res = codec().decode(&mut buffer);
    }
}
