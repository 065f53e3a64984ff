//! Session multiplexing: sessions, the virtual connection table and the
//! router that moves frames between them.

mod connection;
mod handshake;
pub mod heartbeat;
pub mod id_arena;
pub mod registry;
pub mod router;
pub mod session;
pub mod stats;
pub mod table;

pub use handshake::authenticate;
pub use heartbeat::{HeartbeatMonitor, Pulse};
pub use registry::SessionRegistry;
pub use router::{Gateway, TargetHint};
pub use session::{CloseReason, Role, Session, SessionSettings, Stall, spawn_writer};
pub use stats::{GatewayStats, StatsSnapshot};
pub use table::{Backlog, Forward, VirtualConnection, VirtualConnectionTable};
