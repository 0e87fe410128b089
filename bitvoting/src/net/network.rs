use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::connection::{run_reader, Connection};
use super::message::{Frame, TTL_NOT_SET};
use super::peers::Peers;
use crate::{Error, NodeEvent};

/// Gossip configuration, defaults per the protocol constants.
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub port: u16,
    pub flood_ttl: i32,
    pub max_connections: usize,
    pub heartbeat_interval_ms: u64,
    pub duplicate_validity_ms: i64,
    pub ping_interval_ms: u64,
}

impl Default for NetConfig {
    fn default() -> NetConfig {
        NetConfig {
            port: 8580,
            flood_ttl: 3,
            max_connections: 32,
            heartbeat_interval_ms: 30 * 60 * 1000,
            duplicate_validity_ms: 60 * 1000,
            ping_interval_ms: 5 * 60 * 1000,
        }
    }
}

/// The TCP mesh: listener, outbound dialing, the peer list and flooding.
/// Incoming frames surface as `NodeEvent`s on the node's event channel.
#[derive(Clone)]
pub struct Network {
    inner: Arc<NetworkInner>,
}

struct NetworkInner {
    guid: Uuid,
    flood_ttl: i32,
    peers: Peers,
    events: Sender<NodeEvent>,
    shutdown: Arc<AtomicBool>,
    next_id: AtomicU64,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Network {
    pub fn new(
        guid: Uuid,
        flood_ttl: i32,
        events: Sender<NodeEvent>,
        shutdown: Arc<AtomicBool>,
    ) -> Network {
        Network {
            inner: Arc::new(NetworkInner {
                guid,
                flood_ttl,
                peers: Peers::new(),
                events,
                shutdown,
                next_id: AtomicU64::new(1),
                local_addr: Mutex::new(None),
            }),
        }
    }

    pub fn guid(&self) -> Uuid {
        self.inner.guid
    }

    pub fn peers(&self) -> &Peers {
        &self.inner.peers
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Bind the listener (port 0 picks an ephemeral port) and start
    /// accepting connections on a background thread.
    pub fn listen(&self, port: u16) -> Result<SocketAddr, Error> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;
        *self.inner.local_addr.lock() = Some(local);
        info!(%local, "listening for peers");

        let network = self.clone();
        std::thread::Builder::new()
            .name("net-accept".to_owned())
            .spawn(move || network.accept_loop(listener))?;

        Ok(local)
    }

    fn accept_loop(&self, listener: TcpListener) {
        while !self.inner.shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    info!(peer = %addr, "accepted connection");
                    if let Err(err) = self.register(stream, addr) {
                        warn!(peer = %addr, %err, "could not register connection");
                    }
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(err) => {
                    warn!(%err, "accept failed");
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }

    /// Dial a peer.
    pub fn connect(&self, addr: SocketAddr) -> Result<(), Error> {
        if self.inner.shutdown.load(Ordering::Relaxed) {
            return Err(Error::NetworkDown);
        }
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(5))?;
        info!(peer = %addr, "connected");
        self.register(stream, addr)
    }

    fn register(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), Error> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let reader_stream = stream.try_clone()?;
        let connection = Arc::new(Connection::new(id, stream, addr));

        self.inner.peers.add(connection.clone());

        let peers = self.inner.peers.clone();
        let events = self.inner.events.clone();
        let reader_conn = connection.clone();
        std::thread::Builder::new()
            .name(format!("net-read-{}", id))
            .spawn(move || run_reader(reader_conn, reader_stream, peers, events))?;

        self.inner
            .events
            .send(NodeEvent::Accepted(connection))
            .map_err(|_| Error::NetworkDown)?;
        Ok(())
    }

    /// Send a frame to every initialized peer except the given connection.
    /// Unset TTLs get the configured flood TTL; peers whose socket fails are
    /// dropped from the list.
    pub fn flood(&self, frame: &Frame, except: Option<u64>) {
        let mut frame = frame.clone();
        if frame.header.ttl == TTL_NOT_SET {
            frame.header.ttl = self.inner.flood_ttl;
        }

        for connection in self.inner.peers.snapshot() {
            if Some(connection.id) == except || !connection.is_initialized() {
                continue;
            }
            if let Err(err) = connection.write(&frame) {
                warn!(peer = %connection.peer_addr, %err, "dropping peer on write failure");
                connection.close();
                self.inner.peers.remove(connection.id);
            }
        }
    }

    /// Close every connection and stop accepting new ones.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        for connection in self.inner.peers.snapshot() {
            connection.close();
            self.inner.peers.remove(connection.id);
        }
    }
}
