use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::time::Instant;

use super::id_arena::{DEFAULT_ID_REUSE_DELAY, IdArena};
use crate::errors::{CapacityError, GatewayError, ProtocolError};
use crate::shared_types::{ConnId, Half, VirtualId};
use crate::wire::Packet;

/// Client frames that arrived between OPEN and OPENED.
pub type Backlog = SmallVec<[Packet; 4]>;

// -----------------------------------------------------------------------------
// ----- VirtualConnection -----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualConnection {
    pub client: Half,
    pub server: Half,
    pub created_at: Instant,
}

impl VirtualConnection {
    pub fn peer_of(&self, half: Half) -> Option<Half> {
        if half == self.client {
            Some(self.server)
        } else if half == self.server {
            Some(self.client)
        } else {
            None
        }
    }

    /// The half that does not live on `conn`.
    pub fn peer_on(&self, conn: ConnId) -> Option<Half> {
        if conn == self.client.conn {
            Some(self.server)
        } else if conn == self.server.conn {
            Some(self.client)
        } else {
            None
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Forward ---------------------------------------------------------------

#[derive(Debug)]
pub enum Forward {
    /// Bound pair: deliver to this half. The packet already carries its id.
    Deliver(Half, Packet),

    /// Pending pair: held until OPENED.
    Queued,
}

// -----------------------------------------------------------------------------
// ----- VirtualConnectionTable ------------------------------------------------

/// Both halves of every virtual connection, plus the ids each physical
/// connection owns. Every operation runs under one lock, so a pair is always
/// inserted and removed as a unit.
///
/// A server-side id is only reused once the server can no longer mean the
/// old pair by it: immediately when the server closed the pair itself,
/// otherwise after it echoes the gateway's CLOSE or the reuse delay passes.
#[derive(Debug)]
pub struct VirtualConnectionTable {
    inner: Mutex<TableInner>,
}

#[derive(Debug)]
struct TableInner {
    // keyed by client half
    pairs: HashMap<Half, Pair>,
    by_server: HashMap<Half, Half>,
    conns: HashMap<ConnId, ConnIds>,
    reuse_delay: Duration,
}

#[derive(Debug)]
struct Pair {
    conn: VirtualConnection,
    state: PairState,
}

#[derive(Debug)]
enum PairState {
    Pending { backlog: Backlog, limit: usize },
    Bound,
}

#[derive(Debug)]
struct ConnIds {
    live: HashSet<VirtualId>,
    arena: IdArena,
}

impl ConnIds {
    fn new(reuse_delay: Duration) -> Self {
        Self {
            live: HashSet::new(),
            arena: IdArena::new(reuse_delay),
        }
    }

    fn is_unused(&self) -> bool {
        self.live.is_empty() && self.arena.retired_len() == 0
    }
}

/// Who ended a pair, which decides when its server id may come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClosedBy {
    Server,
    Gateway,
}

// -----------------------------------------------------------------------------
// ----- VirtualConnectionTable: Public ----------------------------------------

impl Default for VirtualConnectionTable {
    fn default() -> Self {
        Self::with_reuse_delay(DEFAULT_ID_REUSE_DELAY)
    }
}

impl VirtualConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `reuse_delay` bounds how long a server id the gateway closed stays
    /// retired when the server never echoes the CLOSE.
    pub fn with_reuse_delay(reuse_delay: Duration) -> Self {
        Self {
            inner: Mutex::new(TableInner {
                pairs: HashMap::new(),
                by_server: HashMap::new(),
                conns: HashMap::new(),
                reuse_delay,
            }),
        }
    }

    /// Check the client's cap, allocate a fresh id on `server_conn` and insert
    /// a pending pair, all in one step.
    pub fn reserve(
        &self,
        client: Half,
        server_conn: ConnId,
        cap: Option<usize>,
        backlog_limit: usize,
    ) -> Result<VirtualConnection, GatewayError> {
        let mut inner = self.inner.lock();

        if inner.pairs.contains_key(&client) {
            return Err(ProtocolError::DuplicateVirtualId(client.id).into());
        }

        if let Some(cap) = cap {
            let live = inner.conns.get(&client.conn).map_or(0, |ids| ids.live.len());
            if live >= cap {
                return Err(CapacityError::TooManyVirtualConns { cap }.into());
            }
        }

        let reuse_delay = inner.reuse_delay;
        let server_ids = inner
            .conns
            .entry(server_conn)
            .or_insert_with(|| ConnIds::new(reuse_delay));
        let Some(server_id) = server_ids.arena.alloc(Instant::now()) else {
            if server_ids.is_unused() {
                inner.conns.remove(&server_conn);
            }
            return Err(CapacityError::IdsExhausted.into());
        };
        server_ids.live.insert(server_id);

        inner
            .conns
            .entry(client.conn)
            .or_insert_with(|| ConnIds::new(reuse_delay))
            .live
            .insert(client.id);

        let conn = VirtualConnection {
            client,
            server: Half::new(server_conn, server_id),
            created_at: Instant::now(),
        };

        inner.by_server.insert(conn.server, client);
        inner.pairs.insert(
            client,
            Pair {
                conn,
                state: PairState::Pending {
                    backlog: Backlog::new(),
                    limit: backlog_limit,
                },
            },
        );

        Ok(conn)
    }

    /// Client half of the pending pair whose server half is `server`.
    pub fn pending_client(&self, server: Half) -> Result<Half, GatewayError> {
        let inner = self.inner.lock();

        let Some(client) = inner.by_server.get(&server).copied() else {
            return Err(GatewayError::NoSuchVirtualConn(server));
        };

        match inner.pairs.get(&client).map(|pair| &pair.state) {
            Some(PairState::Pending { .. }) => Ok(client),
            Some(PairState::Bound) => Err(ProtocolError::AlreadyOpened(server.id).into()),
            None => Err(GatewayError::NoSuchVirtualConn(server)),
        }
    }

    /// Make a pending pair visible to lookups. `flush` receives the backlog
    /// while the table is still locked, so no later frame can overtake it. If
    /// `flush` fails the pair is removed and the error returned.
    pub fn bind<F>(
        &self,
        client: Half,
        server: Half,
        flush: F,
    ) -> Result<VirtualConnection, GatewayError>
    where
        F: FnOnce(&VirtualConnection, Backlog) -> Result<(), GatewayError>,
    {
        let mut inner = self.inner.lock();

        let Some(pair) = inner.pairs.get_mut(&client) else {
            return Err(GatewayError::NoSuchVirtualConn(client));
        };
        if pair.conn.server != server {
            return Err(GatewayError::NoSuchVirtualConn(server));
        }

        let backlog = match std::mem::replace(&mut pair.state, PairState::Bound) {
            PairState::Pending { backlog, .. } => backlog,
            PairState::Bound => return Err(ProtocolError::AlreadyOpened(server.id).into()),
        };

        let conn = pair.conn;
        if let Err(e) = flush(&conn, backlog) {
            inner.remove(client, ClosedBy::Gateway);
            return Err(e);
        }

        Ok(conn)
    }

    /// Peer of a bound half. Pending pairs are invisible here.
    pub fn lookup_peer(&self, conn: ConnId, id: VirtualId) -> Result<Half, GatewayError> {
        let half = Half::new(conn, id);
        let inner = self.inner.lock();

        match inner.resolve(half) {
            Some(pair) if matches!(pair.state, PairState::Bound) => {
                pair.conn.peer_of(half).ok_or(GatewayError::NoSuchVirtualConn(half))
            }
            _ => Err(GatewayError::NoSuchVirtualConn(half)),
        }
    }

    /// Route a DATA packet that arrived on `from`. Bound pairs hand back the
    /// peer with the id already rewritten; client data on a pending pair is
    /// queued up to the pair's backlog limit.
    pub fn forward(&self, from: Half, mut packet: Packet) -> Result<Forward, GatewayError> {
        let mut inner = self.inner.lock();

        let client = if inner.pairs.contains_key(&from) {
            from
        } else {
            match inner.by_server.get(&from) {
                Some(client) => *client,
                None => return Err(GatewayError::NoSuchVirtualConn(from)),
            }
        };

        let Some(pair) = inner.pairs.get_mut(&client) else {
            return Err(GatewayError::NoSuchVirtualConn(from));
        };

        let from_client = from == pair.conn.client;
        let peer = if from_client {
            pair.conn.server
        } else {
            pair.conn.client
        };

        match &mut pair.state {
            PairState::Bound => {
                packet.set_virtual_id(peer.id);
                Ok(Forward::Deliver(peer, packet))
            }
            PairState::Pending { backlog, limit } if from_client => {
                if backlog.len() >= *limit {
                    return Err(CapacityError::BacklogFull { limit: *limit }.into());
                }
                packet.set_virtual_id(peer.id);
                backlog.push(packet);
                Ok(Forward::Queued)
            }
            // the server has not acknowledged this id yet
            PairState::Pending { .. } => Err(GatewayError::NoSuchVirtualConn(from)),
        }
    }

    /// Remove the pair `(conn, id)` belongs to, from either side, along with
    /// anything still queued on it. Idempotent.
    ///
    /// The gateway is ending the pair, so the server id stays retired until
    /// the server echoes the CLOSE (`confirm_close`).
    pub fn unbind(&self, conn: ConnId, id: VirtualId) -> Option<VirtualConnection> {
        let mut inner = self.inner.lock();
        let client = inner.client_key(Half::new(conn, id))?;
        inner.remove(client, ClosedBy::Gateway)
    }

    /// `unbind` for a CLOSE that `conn` sent. A server that closes its own
    /// half is done with the id, which is reusable at once.
    pub fn peer_closed(&self, conn: ConnId, id: VirtualId) -> Option<VirtualConnection> {
        let half = Half::new(conn, id);
        let mut inner = self.inner.lock();

        let client = inner.client_key(half)?;
        let closed_by = if client == half {
            ClosedBy::Gateway
        } else {
            ClosedBy::Server
        };
        inner.remove(client, closed_by)
    }

    /// Remove every pair that has a half on `conn`, and forget the
    /// connection's ids altogether.
    pub fn unbind_all(&self, conn: ConnId) -> Vec<VirtualConnection> {
        let mut inner = self.inner.lock();

        let Some(ids) = inner.conns.get(&conn) else {
            return Vec::new();
        };
        let ids: Vec<VirtualId> = ids.live.iter().copied().collect();

        let removed: Vec<VirtualConnection> = ids
            .into_iter()
            .filter_map(|id| {
                let client = inner.client_key(Half::new(conn, id))?;
                inner.remove(client, ClosedBy::Gateway)
            })
            .collect();

        inner.conns.remove(&conn);
        removed
    }

    /// The server echoed CLOSE for an id the gateway already tore down.
    /// Returns false if `server` was not waiting for that echo.
    pub fn confirm_close(&self, server: Half) -> bool {
        let mut inner = self.inner.lock();

        let Some(ids) = inner.conns.get_mut(&server.conn) else {
            return false;
        };
        if !ids.arena.is_retired(server.id) {
            return false;
        }

        ids.arena.release(server.id);
        if ids.is_unused() {
            inner.conns.remove(&server.conn);
        }
        true
    }

    /// Server ids the gateway closed that are not reusable yet.
    pub fn retired_len(&self, conn: ConnId) -> usize {
        self.inner
            .lock()
            .conns
            .get(&conn)
            .map_or(0, |ids| ids.arena.retired_len())
    }

    /// Virtual connections (pending or bound) with a half on `conn`.
    pub fn live_count(&self, conn: ConnId) -> usize {
        self.inner
            .lock()
            .conns
            .get(&conn)
            .map_or(0, |ids| ids.live.len())
    }

    pub fn contains(&self, half: Half) -> bool {
        self.inner.lock().client_key(half).is_some()
    }

    /// Pairs that mention `conn` on either side. Zero once a session is gone.
    pub fn references(&self, conn: ConnId) -> usize {
        self.inner
            .lock()
            .pairs
            .values()
            .filter(|pair| pair.conn.client.conn == conn || pair.conn.server.conn == conn)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pairs.len()
    }

    pub fn pending_len(&self) -> usize {
        self.inner
            .lock()
            .pairs
            .values()
            .filter(|pair| matches!(pair.state, PairState::Pending { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().pairs.is_empty()
    }
}

// -----------------------------------------------------------------------------
// ----- TableInner ------------------------------------------------------------

impl TableInner {
    fn client_key(&self, half: Half) -> Option<Half> {
        if self.pairs.contains_key(&half) {
            Some(half)
        } else {
            self.by_server.get(&half).copied()
        }
    }

    fn resolve(&self, half: Half) -> Option<&Pair> {
        self.client_key(half).and_then(|client| self.pairs.get(&client))
    }

    fn remove(&mut self, client: Half, closed_by: ClosedBy) -> Option<VirtualConnection> {
        let pair = self.pairs.remove(&client)?;
        let conn = pair.conn;

        self.by_server.remove(&conn.server);
        self.forget(conn.client, None);
        self.forget(conn.server, Some(closed_by));

        // pending backlog, if any, is dropped here with `pair`
        Some(conn)
    }

    // `closed_by` is set for server halves, whose ids come from the arena
    fn forget(&mut self, half: Half, closed_by: Option<ClosedBy>) {
        let Some(ids) = self.conns.get_mut(&half.conn) else {
            return;
        };

        ids.live.remove(&half.id);
        match closed_by {
            Some(ClosedBy::Server) => ids.arena.release(half.id),
            Some(ClosedBy::Gateway) => ids.arena.retire(half.id, Instant::now()),
            None => {}
        }
        if ids.is_unused() {
            self.conns.remove(&half.conn);
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
