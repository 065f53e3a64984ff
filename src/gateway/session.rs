use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::errors::{CapacityError, GatewayError};
use crate::shared_types::{ConnId, Half, SessionState, VirtualId};
use crate::wire::{FrameType, Packet};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Extra outbound slots that only control frames can use, so CLOSE and PONG
/// still get through when the data queue is full.
pub const CONTROL_HEADROOM: usize = 64;

// -----------------------------------------------------------------------------
// ----- Role ------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- CloseReason -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    Io(std::io::ErrorKind),
    Protocol,
    AuthFailed,
    HeartbeatTimeout,
    SlowConsumer,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::Io(kind) => write!(f, "i/o error ({kind})"),
            CloseReason::Protocol => f.write_str("protocol error"),
            CloseReason::AuthFailed => f.write_str("authentication failed"),
            CloseReason::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            CloseReason::SlowConsumer => f.write_str("slow consumer"),
            CloseReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- SessionSettings -------------------------------------------------------

/// Per-role knobs, derived from `GatewayConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub role: Role,
    pub buffer_size: usize,
    pub send_queue_size: usize,
    pub max_virtual_conns: Option<usize>,
    pub ping_interval: Duration,
}

// -----------------------------------------------------------------------------
// ----- Session ---------------------------------------------------------------

/// One physical connection, client or server side. The read loop and the
/// writer task share it through an `Arc`; the routing table refers to it by
/// `ConnId` only.
pub struct Session {
    conn_id: ConnId,
    peer_addr: Option<SocketAddr>,
    settings: SessionSettings,

    server_id: AtomicU32,
    state: AtomicU8,

    outbox: mpsc::Sender<Packet>,
    queued_data: AtomicUsize,

    last_recv: Mutex<Instant>,
    stalled: AtomicUsize,
    closing: watch::Sender<bool>,
    close_reason: Mutex<Option<CloseReason>>,
}

// -----------------------------------------------------------------------------
// ----- Session: Static -------------------------------------------------------

impl Session {
    pub fn new(
        conn_id: ConnId,
        peer_addr: Option<SocketAddr>,
        settings: SessionSettings,
    ) -> (Arc<Self>, mpsc::Receiver<Packet>) {
        let (outbox, rx) = mpsc::channel(settings.send_queue_size + CONTROL_HEADROOM);
        let (closing, _) = watch::channel(false);

        let session = Arc::new(Self {
            conn_id,
            peer_addr,
            settings,
            server_id: AtomicU32::new(0),
            state: AtomicU8::new(SessionState::Connecting as u8),
            outbox,
            queued_data: AtomicUsize::new(0),
            last_recv: Mutex::new(Instant::now()),
            stalled: AtomicUsize::new(0),
            closing,
            close_reason: Mutex::new(None),
        });

        (session, rx)
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Accessors ----------------------------------------------------

impl Session {
    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    pub fn role(&self) -> Role {
        self.settings.role
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn half(&self, id: VirtualId) -> Half {
        Half::new(self.conn_id, id)
    }

    /// Id the server announced during auth; 0 for clients and before auth.
    pub fn server_id(&self) -> u32 {
        self.server_id.load(Ordering::Acquire)
    }

    pub fn set_server_id(&self, server_id: u32) {
        self.server_id.store(server_id, Ordering::Release);
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Data frames waiting in the outbound queue.
    pub fn queued_data(&self) -> usize {
        self.queued_data.load(Ordering::Acquire)
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Sending ------------------------------------------------------

impl Session {
    /// Queue a DATA frame. Never waits: a full queue is reported, not awaited.
    pub fn send(&self, virtual_id: VirtualId, payload: &[u8]) -> Result<(), GatewayError> {
        self.send_packet(Packet::with_payload(FrameType::Data, virtual_id, payload))
    }

    pub fn send_control(&self, kind: FrameType, virtual_id: VirtualId) -> Result<(), GatewayError> {
        self.send_packet(Packet::control(kind, virtual_id))
    }

    pub fn send_packet(&self, packet: Packet) -> Result<(), GatewayError> {
        if !self.state().is_open() {
            return Err(GatewayError::SessionClosed);
        }

        let capacity = self.settings.send_queue_size;
        let is_data = packet.kind() == FrameType::Data;

        if is_data {
            let reserved = self
                .queued_data
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                    (queued < capacity).then_some(queued + 1)
                });

            if reserved.is_err() {
                return Err(CapacityError::QueueFull { capacity }.into());
            }
        }

        match self.outbox.try_send(packet) {
            Ok(()) => Ok(()),
            Err(err) => {
                if is_data {
                    self.queued_data.fetch_sub(1, Ordering::AcqRel);
                }

                match err {
                    mpsc::error::TrySendError::Full(_) => {
                        Err(CapacityError::QueueFull { capacity }.into())
                    }
                    mpsc::error::TrySendError::Closed(_) => Err(GatewayError::SessionClosed),
                }
            }
        }
    }

    fn dequeued(&self, packet: &Packet) {
        if packet.kind() == FrameType::Data {
            self.queued_data.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Lifecycle ----------------------------------------------------

impl Session {
    /// Start tearing the session down. Returns false if it was already
    /// closing; the first reason wins.
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !SessionState::from_u8(current).is_open() {
                return false;
            }

            match self.state.compare_exchange(
                current,
                SessionState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        *self.close_reason.lock() = Some(reason);
        self.closing.send_replace(true);
        debug!("{} {} closing: {reason}", self.role(), self.conn_id);
        true
    }

    pub fn mark_closed(&self) {
        self.set_state(SessionState::Closed);
        self.closing.send_replace(true);
    }

    pub fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    /// Resolves once `close` or `mark_closed` has been called.
    pub async fn closed(&self) {
        let mut rx = self.closing.subscribe();
        let _ = rx.wait_for(|closing| *closing).await;
    }

    pub fn touch(&self) {
        *self.last_recv.lock() = Instant::now();
    }

    /// Time since the last inbound frame. Zero while the read loop is
    /// stalled on the gateway's own buffer budget.
    pub fn idle_for(&self) -> Duration {
        if self.stalled.load(Ordering::Acquire) > 0 {
            return Duration::ZERO;
        }
        self.last_recv.lock().elapsed()
    }

    /// Freeze the idle clock until the returned guard drops. The clock then
    /// restarts from the moment of the drop.
    pub fn stall(&self) -> Stall<'_> {
        self.touch();
        self.stalled.fetch_add(1, Ordering::AcqRel);
        Stall { session: self }
    }
}

/// Held by the read loop while a peer's frame waits for a pooled buffer.
#[must_use]
pub struct Stall<'a> {
    session: &'a Session,
}

impl Drop for Stall<'_> {
    fn drop(&mut self) {
        self.session.touch();
        self.session.stalled.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("conn_id", &self.conn_id)
            .field("role", &self.role())
            .field("state", &self.state())
            .field("server_id", &self.server_id())
            .field("queued_data", &self.queued_data())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- Writer ----------------------------------------------------------------

/// Drain the outbound queue into `writer`, coalescing whatever is already
/// queued into one flush. Stops as soon as the session starts closing;
/// frames still queued at that point are dropped.
pub fn spawn_writer<W>(
    session: Arc<Session>,
    writer: W,
    mut rx: mpsc::Receiver<Packet>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut writer = BufWriter::with_capacity(session.settings.buffer_size, writer);

        if let Err(e) = write_loop(&session, &mut writer, &mut rx).await {
            debug!("{} {} write error: {e}", session.role(), session.conn_id);
            session.close(CloseReason::Io(e.kind()));
        }
    })
}

async fn write_loop<W>(
    session: &Session,
    writer: &mut BufWriter<W>,
    rx: &mut mpsc::Receiver<Packet>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let packet = tokio::select! {
            biased;

            _ = session.closed() => return Ok(()),

            packet = rx.recv() => match packet {
                Some(packet) => packet,
                None => return Ok(()),
            },
        };

        session.dequeued(&packet);
        writer.write_all(packet.as_bytes()).await?;

        let mut burst = 1usize;
        while let Ok(packet) = rx.try_recv() {
            session.dequeued(&packet);
            writer.write_all(packet.as_bytes()).await?;
            burst += 1;
        }

        writer.flush().await?;
        trace!("{} {} flushed {burst} frames", session.role(), session.conn_id);
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
