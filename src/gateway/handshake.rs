use std::time::Duration;

use tokio::io::AsyncRead;

use super::Session;
use crate::errors::{AuthError, GatewayError};
use crate::shared_types::CONTROL_ID;
use crate::wire::auth::{self, AuthResponse};
use crate::wire::{FrameReader, FrameType, Packet};

/// Challenge a freshly accepted server and wait for its keyed answer.
/// Returns the server id it announced.
pub async fn authenticate<R>(
    session: &Session,
    reader: &mut FrameReader<R>,
    key: &[u8],
    timeout: Duration,
) -> Result<u32, GatewayError>
where
    R: AsyncRead + Unpin,
{
    let nonce = auth::new_challenge();
    session.send_packet(Packet::with_payload(
        FrameType::AuthChallenge,
        CONTROL_ID,
        &nonce,
    ))?;

    let packet = match tokio::time::timeout(timeout, reader.next_packet()).await {
        Err(_) => return Err(AuthError::Timeout.into()),
        Ok(read) => match read? {
            Some(packet) => packet,
            None => return Err(AuthError::ClosedDuringHandshake.into()),
        },
    };

    if packet.kind() != FrameType::AuthResponse {
        return Err(AuthError::UnexpectedFrame(packet.kind()).into());
    }

    let response = AuthResponse::parse(packet.payload())?;
    response.verify(&nonce, key)?;

    Ok(response.server_id)
}
