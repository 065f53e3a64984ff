use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use super::{FrameCodec, LENGTH_SIZE, Packet};
use crate::errors::GatewayError;
use crate::pool::BufferPool;

// -----------------------------------------------------------------------------
// ----- FrameReader -----------------------------------------------------------

/// Reads whole frames off a stream into pooled buffers.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    codec: FrameCodec,
    pool: BufferPool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, buffer_size: usize, codec: FrameCodec, pool: BufferPool) -> Self {
        Self {
            reader: BufReader::with_capacity(buffer_size, inner),
            codec,
            pool,
        }
    }

    /// Next frame, or `None` on a clean EOF between frames. Waits on the
    /// pool when the buffer budget is spent.
    pub async fn next_packet(&mut self) -> Result<Option<Packet>, GatewayError> {
        self.next_packet_with(|| ()).await
    }

    /// Like `next_packet`, but calls `on_prefix` once a valid length prefix
    /// has arrived. Its result is held while waiting for a pooled buffer and
    /// dropped before the body is read.
    pub async fn next_packet_with<G>(
        &mut self,
        on_prefix: impl FnOnce() -> G,
    ) -> Result<Option<Packet>, GatewayError> {
        let mut prefix = [0u8; LENGTH_SIZE];
        if !self.read_prefix(&mut prefix).await? {
            return Ok(None);
        }

        let total = self.codec.frame_len(prefix)?;

        let mut buf = {
            let _waiting = on_prefix();
            self.pool.acquire(total).await
        };
        buf.extend_from_slice(&prefix);
        buf.resize(total, 0);
        self.reader.read_exact(&mut buf[LENGTH_SIZE..]).await?;

        Ok(Some(Packet::parse(buf)?))
    }
}

// -----------------------------------------------------------------------------
// ----- FrameReader: Private --------------------------------------------------

impl<R: AsyncRead + Unpin> FrameReader<R> {
    async fn read_prefix(&mut self, prefix: &mut [u8; LENGTH_SIZE]) -> std::io::Result<bool> {
        let mut filled = 0;
        while filled < LENGTH_SIZE {
            let n = self.reader.read(&mut prefix[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            filled += n;
        }
        Ok(true)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProtocolError;
    use crate::pool::PoolConfig;
    use crate::wire::{Frame, FrameType};
    use tokio::io::AsyncWriteExt;

    fn reader<R: AsyncRead + Unpin>(inner: R, max: usize) -> FrameReader<R> {
        FrameReader::new(
            inner,
            256,
            FrameCodec::new(max),
            BufferPool::new(&PoolConfig::default()),
        )
    }

    #[tokio::test]
    async fn reads_consecutive_frames_then_eof() {
        let codec = FrameCodec::default();
        let mut wire = Vec::new();
        wire.extend_from_slice(&codec.encode(&Frame::open(1)).unwrap());
        wire.extend_from_slice(&codec.encode(&Frame::data(1, "ping-data")).unwrap());

        let mut r = reader(&wire[..], 1024);

        let first = r.next_packet().await.unwrap().unwrap();
        assert_eq!(first.kind(), FrameType::Open);
        assert!(first.is_pooled());

        let second = r.next_packet().await.unwrap().unwrap();
        assert_eq!(second.to_frame(), Frame::data(1, "ping-data"));

        assert!(r.next_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_prefix_fails_before_reading_the_body() {
        let (mut tx, rx) = tokio::io::duplex(64);
        // the body never arrives; the size check must not wait for it
        tx.write_all(&[0, 0, 0x10, 0, 0x04]).await.unwrap();

        let mut r = reader(rx, 16);
        let err = r.next_packet().await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Protocol(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn prefix_hook_is_held_while_the_budget_is_spent() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Held(Arc<AtomicUsize>);
        impl Drop for Held {
            fn drop(&mut self) {
                self.0.fetch_sub(1, Ordering::SeqCst);
            }
        }

        let pool = BufferPool::new(&PoolConfig {
            min_chunk: 64,
            max_chunk: 64,
            growth_factor: 2,
            budget: 64,
        });
        let taken = pool.try_acquire(64).unwrap();

        let wire = FrameCodec::default().encode(&Frame::data(1, "x")).unwrap();
        let mut r = FrameReader::new(&wire[..], 256, FrameCodec::default(), pool.clone());

        let held = Arc::new(AtomicUsize::new(0));
        let hook = {
            let held = held.clone();
            move || {
                held.fetch_add(1, Ordering::SeqCst);
                Held(held)
            }
        };

        let read = r.next_packet_with(hook);
        tokio::pin!(read);

        // parked on the pool with the hook's guard alive
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), &mut read)
                .await
                .is_err()
        );
        assert_eq!(held.load(Ordering::SeqCst), 1);

        drop(taken);
        let packet = read.await.unwrap().unwrap();
        assert_eq!(packet.to_frame(), Frame::data(1, "x"));
        assert_eq!(held.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn eof_inside_a_frame_is_an_error() {
        let wire = [0u8, 0, 0, 20, 0x04, 0, 0];
        let mut r = reader(&wire[..], 1024);
        assert!(matches!(
            r.next_packet().await,
            Err(GatewayError::Io(_))
        ));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
