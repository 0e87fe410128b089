use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use super::connection::Connection;

/// The shared peer list.
#[derive(Clone, Default)]
pub struct Peers {
    inner: Arc<RwLock<Vec<Arc<Connection>>>>,
}

impl Peers {
    pub fn new() -> Peers {
        Peers::default()
    }

    pub fn add(&self, connection: Arc<Connection>) {
        self.inner.write().push(connection);
    }

    pub fn remove(&self, id: u64) {
        self.inner.write().retain(|conn| conn.id != id);
    }

    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.inner.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn has_guid(&self, guid: &Uuid) -> bool {
        self.inner
            .read()
            .iter()
            .any(|conn| conn.guid() == Some(*guid))
    }

    pub fn has_endpoint(&self, addr: &SocketAddr) -> bool {
        self.inner.read().iter().any(|conn| conn.peer_addr == *addr)
    }
}
