use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::registry::SessionRegistry;
use super::stats::{GatewayStats, StatsSnapshot};
use super::table::{Forward, VirtualConnection, VirtualConnectionTable};
use super::{CloseReason, Role, Session};
use crate::config::{ConfigError, GatewayConfig, RoutePolicy};
use crate::errors::{GatewayError, ProtocolError, RoutingError};
use crate::pool::BufferPool;
use crate::shared_types::{CONTROL_ID, ConnId, Half, VirtualId};
use crate::wire::{FrameCodec, FrameType, Packet};

// -----------------------------------------------------------------------------
// ----- TargetHint ------------------------------------------------------------

/// Which server an OPEN wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetHint {
    Any,
    Server(u32),
}

impl TargetHint {
    /// OPEN payloads are empty or a big-endian server id. Id 0 means any.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        match payload {
            [] => Ok(TargetHint::Any),
            [a, b, c, d] => match u32::from_be_bytes([*a, *b, *c, *d]) {
                0 => Ok(TargetHint::Any),
                id => Ok(TargetHint::Server(id)),
            },
            _ => Err(ProtocolError::MalformedFrame(
                "OPEN payload must be empty or a 4-byte server id",
            )),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway ---------------------------------------------------------------

/// The multiplexer. Cheap to clone; every session task holds a clone.
#[derive(Clone)]
pub struct Gateway {
    shared: Arc<Shared>,
}

struct Shared {
    config: GatewayConfig,
    codec: FrameCodec,
    pool: BufferPool,
    table: VirtualConnectionTable,
    registry: SessionRegistry,
    stats: GatewayStats,
    next_conn_id: AtomicU64,
    round_robin: AtomicUsize,
    stopping: watch::Sender<bool>,
}

// -----------------------------------------------------------------------------
// ----- Gateway: Static -------------------------------------------------------

impl Gateway {
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let (stopping, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                codec: FrameCodec::new(config.max_packet_size),
                pool: BufferPool::new(&config.pool),
                table: VirtualConnectionTable::with_reuse_delay(config.server.id_reuse_delay),
                registry: SessionRegistry::new(),
                stats: GatewayStats::default(),
                next_conn_id: AtomicU64::new(1),
                round_robin: AtomicUsize::new(0),
                stopping,
                config,
            }),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Accessors ----------------------------------------------------

impl Gateway {
    pub fn config(&self) -> &GatewayConfig {
        &self.shared.config
    }

    pub fn codec(&self) -> FrameCodec {
        self.shared.codec
    }

    pub fn pool(&self) -> &BufferPool {
        &self.shared.pool
    }

    pub fn table(&self) -> &VirtualConnectionTable {
        &self.shared.table
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.shared.registry
    }

    pub(crate) fn counters(&self) -> &GatewayStats {
        &self.shared.stats
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            live_clients: self.shared.registry.client_count() as u64,
            live_servers: self.shared.registry.server_count() as u64,
            live_virtual: self.shared.table.len() as u64,
            ..self.shared.stats.snapshot()
        }
    }

    pub(crate) fn next_conn_id(&self) -> ConnId {
        ConnId(self.shared.next_conn_id.fetch_add(1, Ordering::Relaxed))
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Lifecycle ----------------------------------------------------

impl Gateway {
    /// Refuse new sessions, stop the accept loops and close every live
    /// session. Queued outbound frames are dropped.
    pub fn stop(&self) {
        if self.shared.stopping.send_replace(true) {
            return;
        }

        let sessions = self.shared.registry.all();
        info!("stopping gateway, closing {} sessions", sessions.len());

        for session in sessions {
            session.close(CloseReason::Shutdown);
        }
    }

    pub fn is_stopping(&self) -> bool {
        *self.shared.stopping.borrow()
    }

    pub async fn stop_requested(&self) {
        let mut rx = self.shared.stopping.subscribe();
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    /// Remove a finished session and everything that referenced it. Every
    /// peer half receives a CLOSE.
    pub fn terminate(&self, session: &Arc<Session>) {
        let conn_id = session.conn_id();
        self.shared.registry.remove(conn_id);

        let pairs = self.shared.table.unbind_all(conn_id);
        for vc in &pairs {
            if let Some(peer) = vc.peer_on(conn_id) {
                self.notify_close(peer);
            }
        }

        let stats = &self.shared.stats;
        stats.add_virtual_closed(pairs.len());

        let reason = session.close_reason().unwrap_or(CloseReason::PeerClosed);
        if reason == CloseReason::HeartbeatTimeout {
            stats.inc_heartbeat_timeouts();
        }

        session.mark_closed();

        info!(
            "{} {} closed ({reason}), {} virtual connections torn down",
            session.role(),
            conn_id,
            pairs.len()
        );
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Routing ------------------------------------------------------

impl Gateway {
    /// Authenticated, active server sessions in connection order.
    pub fn selectable_servers(&self) -> Vec<Arc<Session>> {
        self.shared
            .registry
            .servers()
            .into_iter()
            .filter(|server| server.is_active())
            .collect()
    }

    pub fn select_server(&self, hint: TargetHint) -> Result<Arc<Session>, RoutingError> {
        let mut candidates = self.selectable_servers();

        if let TargetHint::Server(server_id) = hint {
            candidates.retain(|server| server.server_id() == server_id);
        }

        if candidates.is_empty() {
            return Err(match hint {
                TargetHint::Any => RoutingError::NoServerAvailable,
                TargetHint::Server(server_id) => RoutingError::UnknownServer(server_id),
            });
        }

        let turn = self.shared.round_robin.fetch_add(1, Ordering::Relaxed);

        let chosen = match self.shared.config.route_policy {
            RoutePolicy::RoundRobin => turn % candidates.len(),
            RoutePolicy::LeastLoaded => {
                let loads: Vec<usize> = candidates
                    .iter()
                    .map(|server| self.shared.table.live_count(server.conn_id()))
                    .collect();

                let least = loads.iter().copied().min().unwrap_or(0);
                let tied: Vec<usize> = loads
                    .iter()
                    .enumerate()
                    .filter(|(_, load)| **load == least)
                    .map(|(index, _)| index)
                    .collect();

                tied[turn % tied.len()]
            }
        };

        Ok(candidates.swap_remove(chosen))
    }

    /// Reserve a virtual connection from `client`'s id to a server and send
    /// the server its OPEN. The pair stays pending until OPENED comes back.
    pub fn open_virtual(
        &self,
        client: &Arc<Session>,
        id: VirtualId,
        hint: TargetHint,
    ) -> Result<VirtualConnection, GatewayError> {
        let half = client.half(id);
        if self.shared.table.contains(half) {
            return Err(ProtocolError::DuplicateVirtualId(id).into());
        }

        let server = self.select_server(hint)?;
        let settings = client.settings();

        let vc = self.shared.table.reserve(
            half,
            server.conn_id(),
            settings.max_virtual_conns,
            settings.send_queue_size,
        )?;

        let origin = client.conn_id().as_u64().to_be_bytes();
        let open = Packet::with_payload(FrameType::Open, vc.server.id, &origin);

        if let Err(e) = server.send_packet(open) {
            self.shared.table.unbind(half.conn, half.id);
            return Err(e);
        }

        // The server may have started terminating after it was selected. If
        // its cascade already ran it missed this pair, so take it back here.
        if !server.state().is_open() && self.shared.table.unbind(half.conn, half.id).is_some() {
            return Err(GatewayError::SessionClosed);
        }

        Ok(vc)
    }

    /// Tear down the virtual connection `half` belongs to and tell both ends.
    pub fn close_virtual(&self, half: Half) -> Option<VirtualConnection> {
        let vc = self.shared.table.unbind(half.conn, half.id)?;

        self.notify_close(vc.client);
        self.notify_close(vc.server);
        self.shared.stats.add_virtual_closed(1);

        Some(vc)
    }

    fn notify_close(&self, half: Half) {
        let Some(session) = self.shared.registry.get(half.conn) else {
            return;
        };

        match session.send_control(FrameType::Close, half.id) {
            Ok(()) | Err(GatewayError::SessionClosed) => {}
            Err(GatewayError::Capacity(e)) => {
                warn!(
                    "{} {} cannot take CLOSE for {half} ({e}), closing as slow consumer",
                    session.role(),
                    half.conn
                );
                self.shared.stats.inc_slow_consumers();
                session.close(CloseReason::SlowConsumer);
            }
            Err(e) => debug!("CLOSE for {half} not sent: {e}"),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Dispatch -----------------------------------------------------

impl Gateway {
    /// Handle one inbound frame from a client. An error closes the client.
    pub fn on_client_packet(
        &self,
        client: &Arc<Session>,
        packet: Packet,
    ) -> Result<(), GatewayError> {
        let kind = packet.kind();
        let id = packet.virtual_id();
        check_reserved_id(kind, id)?;

        match kind {
            FrameType::Open => self.on_open(client, id, packet.payload()),
            FrameType::Data => self.relay(client.half(id), packet),
            FrameType::Close => {
                self.on_peer_close(client.half(id));
                Ok(())
            }
            FrameType::Ping => {
                answer_ping(client);
                Ok(())
            }
            FrameType::Pong => Ok(()),
            FrameType::Opened | FrameType::AuthChallenge | FrameType::AuthResponse => {
                Err(ProtocolError::UnexpectedFrame {
                    kind,
                    role: Role::Client,
                }
                .into())
            }
        }
    }

    /// Handle one inbound frame from an authenticated server.
    pub fn on_server_packet(
        &self,
        server: &Arc<Session>,
        packet: Packet,
    ) -> Result<(), GatewayError> {
        let kind = packet.kind();
        let id = packet.virtual_id();
        check_reserved_id(kind, id)?;

        match kind {
            FrameType::Opened => self.on_opened(server, id),
            FrameType::Data => self.relay(server.half(id), packet),
            FrameType::Close => {
                self.on_peer_close(server.half(id));
                Ok(())
            }
            FrameType::Ping => {
                answer_ping(server);
                Ok(())
            }
            FrameType::Pong => Ok(()),
            FrameType::Open | FrameType::AuthChallenge | FrameType::AuthResponse => {
                Err(ProtocolError::UnexpectedFrame {
                    kind,
                    role: Role::Server,
                }
                .into())
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Private ------------------------------------------------------

impl Gateway {
    fn on_open(
        &self,
        client: &Arc<Session>,
        id: VirtualId,
        payload: &[u8],
    ) -> Result<(), GatewayError> {
        let hint = TargetHint::from_payload(payload)?;

        match self.open_virtual(client, id, hint) {
            Ok(vc) => {
                debug!("{} -> {} pending", vc.client, vc.server);
                Ok(())
            }
            Err(GatewayError::Protocol(e)) => Err(e.into()),
            Err(e) => {
                debug!("rejecting OPEN {}: {e}", client.half(id));
                self.shared.stats.inc_virtual_rejected();
                self.notify_close(client.half(id));
                Ok(())
            }
        }
    }

    fn on_opened(&self, server: &Arc<Session>, id: VirtualId) -> Result<(), GatewayError> {
        let server_half = server.half(id);

        let client_half = match self.shared.table.pending_client(server_half) {
            Ok(client_half) => client_half,
            Err(GatewayError::NoSuchVirtualConn(_)) => {
                // closed while the server was acknowledging it
                trace!("OPENED for unknown {server_half}");
                return Ok(());
            }
            Err(GatewayError::Protocol(ProtocolError::AlreadyOpened(_))) => {
                warn!("duplicate OPENED for {server_half} dropped");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let Some(client) = self.shared.registry.get(client_half.conn) else {
            self.close_virtual(server_half);
            return Ok(());
        };

        let stats = &self.shared.stats;
        let bound = self
            .shared
            .table
            .bind(client_half, server_half, |_, backlog| {
                for packet in backlog {
                    let len = packet.len();
                    server.send_packet(packet)?;
                    stats.add_relayed(len);
                }
                Ok(())
            });

        match bound {
            Ok(_) => {}
            Err(GatewayError::NoSuchVirtualConn(_))
            | Err(GatewayError::Protocol(ProtocolError::AlreadyOpened(_))) => {
                debug!("OPENED for {server_half} raced a teardown, dropped");
                return Ok(());
            }
            Err(e) => {
                debug!("flushing backlog of {client_half} failed: {e}");
                self.notify_close(client_half);
                self.notify_close(server_half);
                stats.add_virtual_closed(1);
                return Ok(());
            }
        }

        match client.send_control(FrameType::Opened, client_half.id) {
            Ok(()) => {
                stats.inc_virtual_opened();
                debug!("{client_half} <-> {server_half} bound");
            }
            Err(e) => {
                debug!("OPENED for {client_half} not delivered: {e}");
                self.close_virtual(client_half);
            }
        }

        Ok(())
    }

    /// Forward DATA to the other half. Failing to deliver tears down this
    /// virtual connection only.
    fn relay(&self, from: Half, packet: Packet) -> Result<(), GatewayError> {
        let len = packet.len();

        match self.shared.table.forward(from, packet) {
            Ok(Forward::Queued) => Ok(()),
            Ok(Forward::Deliver(to, packet)) => {
                let Some(peer) = self.shared.registry.get(to.conn) else {
                    self.close_virtual(from);
                    return Ok(());
                };

                match peer.send_packet(packet) {
                    Ok(()) => {
                        self.shared.stats.add_relayed(len);
                        trace!("{from} -> {to}: {len} bytes");
                    }
                    Err(e) => {
                        debug!("dropping {from} -> {to}: {e}");
                        self.close_virtual(from);
                    }
                }
                Ok(())
            }
            Err(GatewayError::NoSuchVirtualConn(half)) => {
                trace!("DATA for unknown {half} dropped");
                Ok(())
            }
            Err(GatewayError::Capacity(e)) => {
                debug!("dropping {from}: {e}");
                self.close_virtual(from);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn on_peer_close(&self, half: Half) {
        let Some(vc) = self.shared.table.peer_closed(half.conn, half.id) else {
            if self.shared.table.confirm_close(half) {
                trace!("{half} CLOSE confirmed, id reusable");
            } else {
                trace!("CLOSE for unknown {half}");
            }
            return;
        };

        if let Some(peer) = vc.peer_of(half) {
            self.notify_close(peer);
        }
        self.shared.stats.add_virtual_closed(1);
        debug!("{half} closed by peer");
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("sessions", &self.shared.registry.all().len())
            .field("virtual_connections", &self.shared.table.len())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn check_reserved_id(kind: FrameType, id: VirtualId) -> Result<(), ProtocolError> {
    if !kind.is_session_level() && id == CONTROL_ID {
        return Err(ProtocolError::ReservedId(kind));
    }
    Ok(())
}

fn answer_ping(session: &Session) {
    // headroom is reserved for control frames; a PONG that still does not
    // fit is dropped and the peer's own heartbeat decides
    if let Err(e) = session.send_control(FrameType::Pong, CONTROL_ID) {
        trace!("{} {} PONG not queued: {e}", session.role(), session.conn_id());
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
