use bytes::Bytes;

use super::FrameType;
use crate::shared_types::{CONTROL_ID, VirtualId};

/// An owned, decoded frame. The relay path uses `Packet` instead; `Frame` is
/// what peers and tests build and inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameType,
    pub virtual_id: VirtualId,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: FrameType, virtual_id: VirtualId, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            virtual_id,
            payload: payload.into(),
        }
    }

    pub fn open(virtual_id: VirtualId) -> Self {
        Self::new(FrameType::Open, virtual_id, Bytes::new())
    }

    /// OPEN addressed at the server that authenticated as `server_id`.
    pub fn open_on(virtual_id: VirtualId, server_id: u32) -> Self {
        Self::new(
            FrameType::Open,
            virtual_id,
            Bytes::copy_from_slice(&server_id.to_be_bytes()),
        )
    }

    pub fn opened(virtual_id: VirtualId) -> Self {
        Self::new(FrameType::Opened, virtual_id, Bytes::new())
    }

    pub fn close(virtual_id: VirtualId) -> Self {
        Self::new(FrameType::Close, virtual_id, Bytes::new())
    }

    pub fn data(virtual_id: VirtualId, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Data, virtual_id, payload)
    }

    pub fn ping() -> Self {
        Self::new(FrameType::Ping, CONTROL_ID, Bytes::new())
    }

    pub fn pong() -> Self {
        Self::new(FrameType::Pong, CONTROL_ID, Bytes::new())
    }
}
