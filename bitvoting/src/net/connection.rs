use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::message::{Frame, MessageHeader, HEADER_LEN, MAX_BODY_LEN, TTL_INFINITE, TTL_NOT_SET};
use super::peers::Peers;
use crate::{unix_time_ms, Error, NodeEvent};

/// One TCP connection to a peer. Writes go through this handle from any
/// thread; a dedicated reader thread turns incoming frames into node events.
pub struct Connection {
    pub id: u64,
    pub peer_addr: SocketAddr,
    stream: Mutex<TcpStream>,
    guid: Mutex<Option<Uuid>>,
    version: Mutex<i32>,
    last_seen_ms: AtomicI64,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(id: u64, stream: TcpStream, peer_addr: SocketAddr) -> Connection {
        Connection {
            id,
            peer_addr,
            stream: Mutex::new(stream),
            guid: Mutex::new(None),
            version: Mutex::new(0),
            last_seen_ms: AtomicI64::new(unix_time_ms()),
            closed: AtomicBool::new(false),
        }
    }

    /// The peer's GUID once the PeerInfo exchange completed.
    pub fn guid(&self) -> Option<Uuid> {
        *self.guid.lock()
    }

    pub fn is_initialized(&self) -> bool {
        self.guid.lock().is_some()
    }

    pub fn set_peer_info(&self, guid: Uuid, version: i32) {
        *self.guid.lock() = Some(guid);
        *self.version.lock() = version;
    }

    pub fn version(&self) -> i32 {
        *self.version.lock()
    }

    pub fn touch(&self) {
        self.last_seen_ms.store(unix_time_ms(), Ordering::Relaxed);
    }

    pub fn last_seen_ms(&self) -> i64 {
        self.last_seen_ms.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Write a frame. Unset TTLs become 1 (direct write); a message whose
    /// TTL has run out is silently dropped.
    pub fn write(&self, frame: &Frame) -> Result<(), Error> {
        let mut frame = frame.clone();
        if frame.header.ttl == TTL_NOT_SET {
            frame.header.ttl = 1;
        } else if frame.header.ttl != TTL_INFINITE && frame.header.ttl <= 0 {
            return Ok(());
        }

        let bytes = frame.encode()?;
        let mut stream = self.stream.lock();
        stream.write_all(&bytes)?;
        Ok(())
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(peer = %self.peer_addr, "closing connection");
        let _ = self.stream.lock().shutdown(Shutdown::Both);
    }
}

/// Reader thread body: parse frames off the socket, apply the hop/TTL
/// discipline and forward them to the node's event loop. Any read or decode
/// failure removes the connection from the peer list.
pub fn run_reader(
    connection: Arc<Connection>,
    mut stream: TcpStream,
    peers: Peers,
    events: Sender<NodeEvent>,
) {
    loop {
        let mut header_bytes = [0u8; HEADER_LEN];
        if stream.read_exact(&mut header_bytes).is_err() {
            break;
        }
        let mut header = match MessageHeader::decode(&header_bytes) {
            Ok(header) => header,
            Err(err) => {
                warn!(peer = %connection.peer_addr, %err, "bad frame header");
                break;
            }
        };
        if header.size < 0 || header.size > MAX_BODY_LEN {
            warn!(peer = %connection.peer_addr, size = header.size, "implausible frame size");
            break;
        }

        let mut body = vec![0u8; header.size as usize];
        if stream.read_exact(&mut body).is_err() {
            break;
        }

        header.hop += 1;
        if header.ttl != TTL_INFINITE {
            header.ttl -= 1;
        }

        let frame = match Frame::decode(header, &body) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(peer = %connection.peer_addr, %err, "undecodable message body");
                break;
            }
        };

        connection.touch();
        if events
            .send(NodeEvent::Frame(connection.clone(), frame))
            .is_err()
        {
            break;
        }
    }

    connection.close();
    peers.remove(connection.id);
    let _ = events.send(NodeEvent::Disconnected(connection.id));
}
