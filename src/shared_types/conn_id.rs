use std::fmt;

// -----------------------------------------------------------------------------
// ----- ConnId ----------------------------------------------------------------

/// Process-unique identifier of one physical connection. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl ConnId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
