use bytes::{BufMut, Bytes, BytesMut};

use super::{Frame, FrameType};
use crate::errors::ProtocolError;
use crate::shared_types::VirtualId;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// `[length: u32][type: u8][virtual_id: u32]`
pub const HEADER_SIZE: usize = 9;
pub const LENGTH_SIZE: usize = 4;
pub const DEFAULT_MAX_PACKET_SIZE: usize = 512 * 1024;

// -----------------------------------------------------------------------------
// ----- FrameCodec ------------------------------------------------------------

/// Big-endian frame codec. `length` counts the whole frame, itself included,
/// and the payload may not exceed `max_packet_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_packet_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Validate a length prefix and return the total frame length.
    pub fn frame_len(&self, prefix: [u8; LENGTH_SIZE]) -> Result<usize, ProtocolError> {
        let total = u32::from_be_bytes(prefix) as usize;
        if total < HEADER_SIZE {
            return Err(ProtocolError::MalformedFrame("length shorter than header"));
        }

        let declared = total - HEADER_SIZE;
        if declared > self.max_packet_size {
            return Err(ProtocolError::FrameTooLarge {
                declared,
                max: self.max_packet_size,
            });
        }

        Ok(total)
    }

    pub fn encode(&self, frame: &Frame) -> Result<BytesMut, ProtocolError> {
        let mut dst = BytesMut::with_capacity(HEADER_SIZE + frame.payload.len());
        self.encode_into(frame, &mut dst)?;
        Ok(dst)
    }

    pub fn encode_into(&self, frame: &Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        self.encode_parts(frame.kind, frame.virtual_id, &frame.payload, dst)
    }

    pub fn encode_parts(
        &self,
        kind: FrameType,
        virtual_id: VirtualId,
        payload: &[u8],
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        if payload.len() > self.max_packet_size {
            return Err(ProtocolError::FrameTooLarge {
                declared: payload.len(),
                max: self.max_packet_size,
            });
        }

        let total = HEADER_SIZE + payload.len();
        let Ok(total_u32) = u32::try_from(total) else {
            return Err(ProtocolError::FrameTooLarge {
                declared: payload.len(),
                max: self.max_packet_size,
            });
        };

        dst.reserve(total);
        dst.put_u32(total_u32);
        dst.put_u8(kind.as_u8());
        dst.put_u32(virtual_id);
        dst.put_slice(payload);
        Ok(())
    }

    /// Decode exactly one frame from `src`. The size limit is checked from
    /// the length prefix alone, before anything else.
    pub fn decode(&self, src: &[u8]) -> Result<Frame, ProtocolError> {
        let Some(prefix) = src.first_chunk::<LENGTH_SIZE>() else {
            return Err(ProtocolError::MalformedFrame("truncated length prefix"));
        };

        let total = self.frame_len(*prefix)?;

        if src.len() < total {
            return Err(ProtocolError::MalformedFrame("truncated frame"));
        }
        if src.len() > total {
            return Err(ProtocolError::MalformedFrame("trailing bytes after frame"));
        }

        let kind = FrameType::try_from(src[4])?;
        let virtual_id = u32::from_be_bytes([src[5], src[6], src[7], src[8]]);

        Ok(Frame {
            kind,
            virtual_id,
            payload: Bytes::copy_from_slice(&src[HEADER_SIZE..]),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_header_big_endian() {
        let codec = FrameCodec::default();
        let bytes = codec.encode(&Frame::data(0x0102_0304, "hi")).unwrap();

        assert_eq!(
            &bytes[..],
            &[0, 0, 0, 11, 0x04, 0x01, 0x02, 0x03, 0x04, b'h', b'i']
        );
    }

    #[test]
    fn decode_reverses_encode() {
        let codec = FrameCodec::new(64);
        let frame = Frame::new(FrameType::Open, 7, vec![1, 2, 3]);
        let bytes = codec.encode(&frame).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), frame);

        let empty = Frame::ping();
        let bytes = codec.encode(&empty).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(codec.decode(&bytes).unwrap(), empty);
    }

    #[test]
    fn payload_at_the_limit_is_accepted() {
        let codec = FrameCodec::new(16);
        let frame = Frame::data(1, vec![0xAB; 16]);
        let bytes = codec.encode(&frame).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let codec = FrameCodec::new(16);
        let err = codec.encode(&Frame::data(1, vec![0; 17])).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::FrameTooLarge {
                declared: 17,
                max: 16
            }
        );
    }

    #[test]
    fn decode_rejects_oversized_declared_length_from_prefix_alone() {
        let codec = FrameCodec::new(16);
        // only the prefix and type are present; the declared length still wins
        let src = [0, 0, 0, 100, 0x04];
        assert_eq!(
            codec.decode(&src).unwrap_err(),
            ProtocolError::FrameTooLarge {
                declared: 91,
                max: 16
            }
        );
    }

    #[test]
    fn decode_rejects_malformed_input() {
        let codec = FrameCodec::default();

        assert!(matches!(
            codec.decode(&[0, 0]),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(matches!(
            codec.decode(&[0, 0, 0, 5, 4]),
            Err(ProtocolError::MalformedFrame(_))
        ));

        let mut bytes = codec.encode(&Frame::data(1, "abc")).unwrap();
        assert!(matches!(
            codec.decode(&bytes[..bytes.len() - 1]),
            Err(ProtocolError::MalformedFrame(_))
        ));

        bytes.extend_from_slice(b"x");
        assert!(matches!(
            codec.decode(&bytes),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let codec = FrameCodec::default();
        let src = [0, 0, 0, 9, 0x42, 0, 0, 0, 1];
        assert_eq!(
            codec.decode(&src).unwrap_err(),
            ProtocolError::UnknownType(0x42)
        );
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
