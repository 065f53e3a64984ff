use bytes::{BufMut, Bytes, BytesMut};

use super::{Frame, FrameCodec, FrameType, HEADER_SIZE};
use crate::errors::ProtocolError;
use crate::pool::PooledBuf;
use crate::shared_types::VirtualId;

/// A validated frame held in its wire encoding. Relaying only rewrites the
/// virtual id bytes; the buffer itself moves from one queue to the next.
#[derive(Debug)]
pub struct Packet {
    kind: FrameType,
    buf: PooledBuf,
}

// -----------------------------------------------------------------------------
// ----- Packet: Static --------------------------------------------------------

impl Packet {
    /// Wrap a buffer holding exactly one frame whose length prefix has
    /// already been checked by `FrameCodec::frame_len`.
    pub fn parse(buf: PooledBuf) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedFrame("truncated header"));
        }

        let kind = FrameType::try_from(buf[4])?;
        Ok(Self { kind, buf })
    }

    pub fn control(kind: FrameType, virtual_id: VirtualId) -> Self {
        Self::with_payload(kind, virtual_id, &[])
    }

    /// Build a gateway-originated frame. Only used for small control
    /// payloads, which never approach the packet size limit.
    pub fn with_payload(kind: FrameType, virtual_id: VirtualId, payload: &[u8]) -> Self {
        let total = HEADER_SIZE + payload.len();
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32(total as u32);
        buf.put_u8(kind.as_u8());
        buf.put_u32(virtual_id);
        buf.put_slice(payload);

        Self {
            kind,
            buf: PooledBuf::unpooled(buf),
        }
    }

    pub fn from_frame(codec: &FrameCodec, frame: &Frame) -> Result<Self, ProtocolError> {
        let buf = codec.encode(frame)?;
        Ok(Self {
            kind: frame.kind,
            buf: PooledBuf::unpooled(buf),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Packet: Public --------------------------------------------------------

impl Packet {
    pub fn kind(&self) -> FrameType {
        self.kind
    }

    pub fn virtual_id(&self) -> VirtualId {
        u32::from_be_bytes([self.buf[5], self.buf[6], self.buf[7], self.buf[8]])
    }

    pub fn set_virtual_id(&mut self, virtual_id: VirtualId) {
        self.buf[5..HEADER_SIZE].copy_from_slice(&virtual_id.to_be_bytes());
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[HEADER_SIZE..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_pooled(&self) -> bool {
        self.buf.is_pooled()
    }

    pub fn to_frame(&self) -> Frame {
        Frame {
            kind: self.kind,
            virtual_id: self.virtual_id(),
            payload: Bytes::copy_from_slice(self.payload()),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_virtual_id_in_place() {
        let codec = FrameCodec::default();
        let mut packet = Packet::from_frame(&codec, &Frame::data(3, "payload")).unwrap();
        assert_eq!(packet.virtual_id(), 3);

        packet.set_virtual_id(0xDEAD_BEEF);
        assert_eq!(packet.virtual_id(), 0xDEAD_BEEF);
        assert_eq!(packet.payload(), b"payload");
        assert_eq!(codec.decode(packet.as_bytes()).unwrap(), Frame::data(0xDEAD_BEEF, "payload"));
    }

    #[test]
    fn control_packets_are_header_only() {
        let packet = Packet::control(FrameType::Close, 9);
        assert_eq!(packet.len(), HEADER_SIZE);
        assert_eq!(packet.to_frame(), Frame::close(9));
    }

    #[test]
    fn parse_rejects_unknown_type() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 0, 9, 0x77, 0, 0, 0, 1]);
        let err = Packet::parse(PooledBuf::unpooled(buf)).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownType(0x77));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
