use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Role, Session};
use crate::shared_types::ConnId;

/// Live sessions by connection id, split by role.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    clients: HashMap<ConnId, Arc<Session>>,
    servers: HashMap<ConnId, Arc<Session>>,
}

impl RegistryInner {
    fn side(&mut self, role: Role) -> &mut HashMap<ConnId, Arc<Session>> {
        match role {
            Role::Client => &mut self.clients,
            Role::Server => &mut self.servers,
        }
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.inner
            .write()
            .side(session.role())
            .insert(session.conn_id(), session);
    }

    pub fn remove(&self, conn_id: ConnId) -> Option<Arc<Session>> {
        let mut inner = self.inner.write();
        inner
            .clients
            .remove(&conn_id)
            .or_else(|| inner.servers.remove(&conn_id))
    }

    pub fn get(&self, conn_id: ConnId) -> Option<Arc<Session>> {
        let inner = self.inner.read();
        inner
            .clients
            .get(&conn_id)
            .or_else(|| inner.servers.get(&conn_id))
            .cloned()
    }

    /// Server sessions ordered by connection id, oldest first.
    pub fn servers(&self) -> Vec<Arc<Session>> {
        let mut servers: Vec<_> = self.inner.read().servers.values().cloned().collect();
        servers.sort_by_key(|s| s.conn_id());
        servers
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        let inner = self.inner.read();
        inner
            .clients
            .values()
            .chain(inner.servers.values())
            .cloned()
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.inner.read().clients.len()
    }

    pub fn server_count(&self) -> usize {
        self.inner.read().servers.len()
    }
}
