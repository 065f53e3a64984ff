pub mod auth;
pub mod codec;
pub mod frame;
pub mod frame_type;
pub mod packet;
pub mod reader;

pub use codec::{DEFAULT_MAX_PACKET_SIZE, FrameCodec, HEADER_SIZE, LENGTH_SIZE};
pub use frame::Frame;
pub use frame_type::FrameType;
pub use packet::Packet;
pub use reader::FrameReader;
