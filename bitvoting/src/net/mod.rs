//! The gossip mesh: framed messages over TCP, a peer registry, flooding with
//! TTL discipline and duplicate suppression. Protocol behavior (peer
//! exchange, ping discovery, heartbeats, transaction and block floods) lives
//! in the node's event handlers.

mod connection;
mod duplicate;
mod message;
mod network;
mod peers;

pub use connection::Connection;
pub use duplicate::DuplicateList;
pub use message::*;
pub use network::{NetConfig, Network};
pub use peers::Peers;
