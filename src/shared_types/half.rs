use std::fmt;

use super::ConnId;

// -----------------------------------------------------------------------------
// ----- VirtualId -------------------------------------------------------------

/// Virtual connection id, scoped to the physical connection that carries it.
pub type VirtualId = u32;

/// Reserved for frames that belong to the physical connection itself
/// (auth, ping, pong).
pub const CONTROL_ID: VirtualId = 0;

// -----------------------------------------------------------------------------
// ----- Half ------------------------------------------------------------------

/// One side of a virtual connection: a local id on one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Half {
    pub conn: ConnId,
    pub id: VirtualId,
}

impl Half {
    pub fn new(conn: ConnId, id: VirtualId) -> Self {
        Self { conn, id }
    }
}

impl fmt::Display for Half {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.conn, self.id)
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
