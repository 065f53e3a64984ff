/// Lifecycle of a physical connection owned by the gateway.
///
/// Client sessions skip `Authenticating` and become `Active` right after
/// accept. Server sessions must pass the keyed challenge first; only
/// `Active` servers are eligible for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Accepted, I/O tasks not yet wired up.
    Connecting = 0,

    /// Server only: challenge sent, waiting for the keyed response.
    Authenticating = 1,

    /// Relaying traffic.
    Active = 2,

    /// Close requested; virtual connections are being torn down.
    Draining = 3,

    /// Fully torn down. The physical connection is gone.
    Closed = 4,
}

impl SessionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Authenticating,
            2 => SessionState::Active,
            3 => SessionState::Draining,
            _ => SessionState::Closed,
        }
    }

    /// True while frames may still be queued on the session.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Authenticating | SessionState::Active
        )
    }
}
