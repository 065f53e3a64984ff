//! Keyed challenge/response used to admit server connections.
//!
//! The gateway sends `AUTH_CHALLENGE` carrying a random nonce. The server
//! answers `AUTH_RESPONSE` with its server id followed by `md5(nonce ‖ key)`.

use rand::Rng;

use crate::errors::AuthError;

pub const NONCE_LEN: usize = 16;
pub const DIGEST_LEN: usize = 16;
pub const RESPONSE_LEN: usize = 4 + DIGEST_LEN;

pub type Nonce = [u8; NONCE_LEN];

pub fn new_challenge() -> Nonce {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill(&mut nonce);
    nonce
}

pub fn digest(nonce: &[u8], key: &[u8]) -> [u8; DIGEST_LEN] {
    let mut ctx = md5::Context::new();
    ctx.consume(nonce);
    ctx.consume(key);
    ctx.compute().0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthResponse {
    pub server_id: u32,
    pub digest: [u8; DIGEST_LEN],
}

impl AuthResponse {
    /// What a server holding `key` replies to `nonce`.
    pub fn respond(nonce: &[u8], server_id: u32, key: &[u8]) -> Self {
        Self {
            server_id,
            digest: digest(nonce, key),
        }
    }

    pub fn encode(&self) -> [u8; RESPONSE_LEN] {
        let mut out = [0u8; RESPONSE_LEN];
        out[..4].copy_from_slice(&self.server_id.to_be_bytes());
        out[4..].copy_from_slice(&self.digest);
        out
    }

    pub fn parse(payload: &[u8]) -> Result<Self, AuthError> {
        let Ok(bytes) = <[u8; RESPONSE_LEN]>::try_from(payload) else {
            return Err(AuthError::MalformedResponse);
        };

        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&bytes[4..]);

        Ok(Self {
            server_id: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            digest,
        })
    }

    pub fn verify(&self, nonce: &[u8], key: &[u8]) -> Result<(), AuthError> {
        let expected = digest(nonce, key);

        // compare every byte regardless of where the first mismatch is
        let diff = expected
            .iter()
            .zip(self.digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));

        if diff == 0 {
            Ok(())
        } else {
            Err(AuthError::BadDigest)
        }
    }
}
