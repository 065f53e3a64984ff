use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::handshake::authenticate;
use super::session::spawn_writer;
use super::{CloseReason, Gateway, HeartbeatMonitor, Role, Session, SessionSettings};
use crate::errors::GatewayError;
use crate::shared_types::SessionState;
use crate::wire::FrameReader;

// -----------------------------------------------------------------------------
// ----- Gateway: Listeners ----------------------------------------------------

impl Gateway {
    /// Accept client connections until `stop()` is called.
    pub async fn serve_clients(&self, listener: TcpListener) {
        self.accept_loop(listener, Role::Client).await
    }

    /// Accept server connections until `stop()` is called.
    pub async fn serve_servers(&self, listener: TcpListener) {
        self.accept_loop(listener, Role::Server).await
    }

    async fn accept_loop(&self, listener: TcpListener, role: Role) {
        loop {
            tokio::select! {
                _ = self.stop_requested() => {
                    info!("{role} listener stopped");
                    break;
                }

                accept_res = listener.accept() => {
                    let (stream, peer) = match accept_res {
                        Ok(v) => v,
                        Err(e) => { error!("{role} accept error: {e}"); continue; }
                    };

                    let _ = stream.set_nodelay(true);

                    let gateway = self.clone();
                    tokio::spawn(async move {
                        match role {
                            Role::Client => gateway.serve_client(stream, Some(peer)).await,
                            Role::Server => gateway.serve_server(stream, Some(peer)).await,
                        }
                    });
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Sessions -----------------------------------------------------

impl Gateway {
    /// Run a client session on `stream` until either side closes it.
    pub async fn serve_client<S>(&self, stream: S, peer: Option<SocketAddr>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.is_stopping() {
            return;
        }

        let (session, reader) = self.attach(stream, peer, self.config().client_settings());
        session.set_state(SessionState::Active);
        self.counters().inc_clients_accepted();

        if !self.register(&session) {
            return;
        }

        info!("client {} connected from {}", session.conn_id(), peer_label(peer));
        self.run_session(session, reader).await;
    }

    /// Authenticate a server on `stream`, then run its session. Servers that
    /// fail the handshake are dropped without ever becoming selectable.
    pub async fn serve_server<S>(&self, stream: S, peer: Option<SocketAddr>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.is_stopping() {
            return;
        }

        let (session, mut reader) = self.attach(stream, peer, self.config().server_settings());
        session.set_state(SessionState::Authenticating);

        let config = self.config();
        let server_id = match authenticate(
            &session,
            &mut reader,
            config.auth_key(),
            config.server.auth_timeout,
        )
        .await
        {
            Ok(server_id) => server_id,
            Err(e) => {
                warn!(
                    "server {} from {} failed auth: {e}",
                    session.conn_id(),
                    peer_label(peer)
                );
                self.counters().inc_auth_failures();
                session.close(e.close_reason());
                session.mark_closed();
                return;
            }
        };

        session.set_server_id(server_id);
        session.set_state(SessionState::Active);
        self.counters().inc_servers_accepted();

        if !self.register(&session) {
            return;
        }

        info!(
            "server {} (id {server_id}) authenticated from {}",
            session.conn_id(),
            peer_label(peer)
        );
        self.run_session(session, reader).await;
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Private ------------------------------------------------------

impl Gateway {
    fn attach<S>(
        &self,
        stream: S,
        peer: Option<SocketAddr>,
        settings: SessionSettings,
    ) -> (Arc<Session>, FrameReader<ReadHalf<S>>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);

        let (session, rx) = Session::new(self.next_conn_id(), peer, settings);
        spawn_writer(session.clone(), write_half, rx);

        let reader = FrameReader::new(
            read_half,
            session.settings().buffer_size,
            self.codec(),
            self.pool().clone(),
        );

        (session, reader)
    }

    /// Make the session visible to routing. Loses against a concurrent
    /// `stop()`, in which case the session is torn down right away.
    fn register(&self, session: &Arc<Session>) -> bool {
        self.registry().insert(session.clone());

        if self.is_stopping() {
            session.close(CloseReason::Shutdown);
            self.terminate(session);
            return false;
        }

        true
    }

    async fn run_session<R>(&self, session: Arc<Session>, mut reader: FrameReader<R>)
    where
        R: AsyncRead + Unpin,
    {
        let heartbeat = HeartbeatMonitor::new(
            session.settings().ping_interval,
            self.config().heartbeat_missed_threshold,
        )
        .map(|monitor| monitor.spawn(session.clone()));

        let reason = match self.read_loop(&session, &mut reader).await {
            Ok(()) => CloseReason::PeerClosed,
            Err(e) => {
                debug!("{} {} read error: {e}", session.role(), session.conn_id());
                e.close_reason()
            }
        };

        session.close(reason);
        self.terminate(&session);

        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
    }

    async fn read_loop<R>(
        &self,
        session: &Arc<Session>,
        reader: &mut FrameReader<R>,
    ) -> Result<(), GatewayError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let packet = tokio::select! {
                _ = session.closed() => return Ok(()),

                read = reader.next_packet_with(move || session.stall()) => match read? {
                    Some(packet) => packet,
                    None => return Ok(()),
                },
            };

            session.touch();

            match session.role() {
                Role::Client => self.on_client_packet(session, packet)?,
                Role::Server => self.on_server_packet(session, packet)?,
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn peer_label(peer: Option<SocketAddr>) -> String {
    peer.map_or_else(|| "<unknown>".to_string(), |addr| addr.to_string())
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
