use thiserror::Error;

use crate::gateway::{CloseReason, Role};
use crate::shared_types::{Half, VirtualId};
use crate::wire::FrameType;

// -----------------------------------------------------------------------------
// ----- GatewayError ----------------------------------------------------------

/// Everything the core can fail with. None of these are fatal to the process:
/// protocol, auth and I/O errors close one session, capacity and routing
/// errors close one virtual connection.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("capacity error: {0}")]
    Capacity(#[from] CapacityError),

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session closed")]
    SessionClosed,

    #[error("no such virtual connection {0}")]
    NoSuchVirtualConn(Half),
}

impl GatewayError {
    /// Why a session ends when this error escapes its read loop.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            GatewayError::Io(e) => CloseReason::Io(e.kind()),
            GatewayError::Auth(_) => CloseReason::AuthFailed,
            GatewayError::Capacity(_) => CloseReason::SlowConsumer,
            _ => CloseReason::Protocol,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ProtocolError ---------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("declared payload of {declared} bytes exceeds max packet size {max}")]
    FrameTooLarge { declared: usize, max: usize },

    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("unknown frame type 0x{0:02x}")]
    UnknownType(u8),

    #[error("unexpected {kind:?} frame on {role} connection")]
    UnexpectedFrame { kind: FrameType, role: Role },

    #[error("{0:?} frame uses reserved virtual id 0")]
    ReservedId(FrameType),

    #[error("virtual id {0} is already open")]
    DuplicateVirtualId(VirtualId),

    #[error("virtual id {0} was already acknowledged")]
    AlreadyOpened(VirtualId),
}

// -----------------------------------------------------------------------------
// ----- AuthError -------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("server did not authenticate in time")]
    Timeout,

    #[error("auth digest mismatch")]
    BadDigest,

    #[error("expected AUTH_RESPONSE, got {0:?}")]
    UnexpectedFrame(FrameType),

    #[error("malformed AUTH_RESPONSE payload")]
    MalformedResponse,

    #[error("connection closed during handshake")]
    ClosedDuringHandshake,
}

// -----------------------------------------------------------------------------
// ----- CapacityError ---------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapacityError {
    #[error("client reached its limit of {cap} virtual connections")]
    TooManyVirtualConns { cap: usize },

    #[error("outbound queue is full ({capacity} frames)")]
    QueueFull { capacity: usize },

    #[error("too many frames queued before OPENED ({limit})")]
    BacklogFull { limit: usize },

    #[error("no free virtual ids left on the server connection")]
    IdsExhausted,
}

// -----------------------------------------------------------------------------
// ----- RoutingError ----------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no active server session available")]
    NoServerAvailable,

    #[error("no active server session with id {0}")]
    UnknownServer(u32),
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
