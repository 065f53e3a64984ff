use std::sync::atomic::{AtomicU64, Ordering};

// -----------------------------------------------------------------------------
// ----- StatsSnapshot ---------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub clients_accepted: u64,
    pub servers_accepted: u64,
    pub auth_failures: u64,
    pub virtual_opened: u64,
    pub virtual_rejected: u64,
    pub virtual_closed: u64,
    pub frames_relayed: u64,
    pub bytes_relayed: u64,
    pub slow_consumers: u64,
    pub heartbeat_timeouts: u64,

    // gauges, filled in by `Gateway::stats`
    pub live_clients: u64,
    pub live_servers: u64,
    pub live_virtual: u64,
}

// -----------------------------------------------------------------------------
// ----- GatewayStats ----------------------------------------------------------

/// Process-lifetime counters. Owned by the gateway, not global.
#[derive(Debug, Default)]
pub struct GatewayStats {
    clients_accepted: AtomicU64,
    servers_accepted: AtomicU64,
    auth_failures: AtomicU64,
    virtual_opened: AtomicU64,
    virtual_rejected: AtomicU64,
    virtual_closed: AtomicU64,
    frames_relayed: AtomicU64,
    bytes_relayed: AtomicU64,
    slow_consumers: AtomicU64,
    heartbeat_timeouts: AtomicU64,
}

impl GatewayStats {
    pub fn inc_clients_accepted(&self) {
        self.clients_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_servers_accepted(&self) {
        self.servers_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_auth_failures(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_virtual_opened(&self) {
        self.virtual_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_virtual_rejected(&self) {
        self.virtual_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_virtual_closed(&self, n: usize) {
        self.virtual_closed.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_relayed(&self, bytes: usize) {
        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_relayed.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn inc_slow_consumers(&self) {
        self.slow_consumers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_heartbeat_timeouts(&self) {
        self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            clients_accepted: self.clients_accepted.load(Ordering::Relaxed),
            servers_accepted: self.servers_accepted.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            virtual_opened: self.virtual_opened.load(Ordering::Relaxed),
            virtual_rejected: self.virtual_rejected.load(Ordering::Relaxed),
            virtual_closed: self.virtual_closed.load(Ordering::Relaxed),
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            slow_consumers: self.slow_consumers.load(Ordering::Relaxed),
            heartbeat_timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
            ..StatsSnapshot::default()
        }
    }
}
