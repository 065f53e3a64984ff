use crate::errors::ProtocolError;

// -----------------------------------------------------------------------------
// ----- FrameType -------------------------------------------------------------

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Open = 0x01,
    Opened = 0x02,
    Close = 0x03,
    Data = 0x04,
    AuthChallenge = 0x05,
    AuthResponse = 0x06,
    Ping = 0x07,
    Pong = 0x08,
}

impl FrameType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Session-level frames travel on virtual id 0; every other kind must not.
    pub fn is_session_level(self) -> bool {
        matches!(
            self,
            FrameType::AuthChallenge | FrameType::AuthResponse | FrameType::Ping | FrameType::Pong
        )
    }
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x01 => Ok(FrameType::Open),
            0x02 => Ok(FrameType::Opened),
            0x03 => Ok(FrameType::Close),
            0x04 => Ok(FrameType::Data),
            0x05 => Ok(FrameType::AuthChallenge),
            0x06 => Ok(FrameType::AuthResponse),
            0x07 => Ok(FrameType::Ping),
            0x08 => Ok(FrameType::Pong),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
