use num_enum::TryFromPrimitive;
use uuid::Uuid;

use crate::{Block, Error, Transaction, Uint256};

/// TTL marker: the sender has not decided yet; the write path turns it into
/// 1, the flood path into the configured flood TTL.
pub const TTL_NOT_SET: i32 = -32;
/// TTL marker: never decremented, the message floods the whole network.
pub const TTL_INFINITE: i32 = -64;

pub const HEADER_LEN: usize = 17;

/// Upper bound on a frame body; anything larger is treated as a corrupt
/// stream and the connection is dropped.
pub const MAX_BODY_LEN: i64 = 32 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageKind {
    Text = 0x01,
    Ping = 0x02,
    Pong = 0x03,
    PeerInfo = 0x04,
    Heartbeat = 0x05,
    Transaction = 0x10,
    Block = 0x20,
    BlockRequest = 0x21,
}

/// Fixed wire header: ttl, hop and size as little-endian integers followed
/// by the type tag. Exactly 17 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub ttl: i32,
    pub hop: i32,
    pub size: i64,
    pub kind: MessageKind,
}

impl MessageHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.ttl.to_le_bytes());
        out[4..8].copy_from_slice(&self.hop.to_le_bytes());
        out[8..16].copy_from_slice(&self.size.to_le_bytes());
        out[16] = self.kind as u8;
        out
    }

    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<MessageHeader, Error> {
        let ttl = i32::from_le_bytes(bytes[0..4].try_into().expect("header slice"));
        let hop = i32::from_le_bytes(bytes[4..8].try_into().expect("header slice"));
        let size = i64::from_le_bytes(bytes[8..16].try_into().expect("header slice"));
        let kind = MessageKind::try_from(bytes[16]).map_err(|_| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unknown message type tag",
            ))
        })?;
        Ok(MessageHeader {
            ttl,
            hop,
            size,
            kind,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TextMessage {
    pub id: Uuid,
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PingMessage {
    pub id: Uuid,
    /// Listening address of the sender; left empty and filled in by the
    /// first receiving hop.
    pub address: String,
    pub port: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PongMessage {
    pub id: Uuid,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PeerInfoMessage {
    pub id: Uuid,
    pub guid: Uuid,
    pub version: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HeartbeatMessage {
    pub id: Uuid,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransactionMessage {
    pub id: Uuid,
    pub transaction: Transaction,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BlockMessage {
    pub id: Uuid,
    pub block: Block,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BlockRequestMessage {
    pub id: Uuid,
    pub block: Uint256,
    /// Request the whole chain following `block` instead of a single block.
    pub following: bool,
}

/// A gossip message. The wire body is the CBOR encoding of the variant
/// payload; the variant itself is carried by the header's type tag.
#[derive(Debug, Clone)]
pub enum Message {
    Text(TextMessage),
    Ping(PingMessage),
    Pong(PongMessage),
    PeerInfo(PeerInfoMessage),
    Heartbeat(HeartbeatMessage),
    Transaction(TransactionMessage),
    Block(BlockMessage),
    BlockRequest(BlockRequestMessage),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Text(_) => MessageKind::Text,
            Message::Ping(_) => MessageKind::Ping,
            Message::Pong(_) => MessageKind::Pong,
            Message::PeerInfo(_) => MessageKind::PeerInfo,
            Message::Heartbeat(_) => MessageKind::Heartbeat,
            Message::Transaction(_) => MessageKind::Transaction,
            Message::Block(_) => MessageKind::Block,
            Message::BlockRequest(_) => MessageKind::BlockRequest,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Message::Text(m) => m.id,
            Message::Ping(m) => m.id,
            Message::Pong(m) => m.id,
            Message::PeerInfo(m) => m.id,
            Message::Heartbeat(m) => m.id,
            Message::Transaction(m) => m.id,
            Message::Block(m) => m.id,
            Message::BlockRequest(m) => m.id,
        }
    }

    /// Initial TTL: heartbeats and text stay with direct neighbors,
    /// transactions and blocks flood everywhere, the rest is decided by the
    /// sending path.
    fn default_ttl(&self) -> i32 {
        match self {
            Message::Heartbeat(_) | Message::Text(_) => 1,
            Message::Transaction(_) | Message::Block(_) => TTL_INFINITE,
            _ => TTL_NOT_SET,
        }
    }

    fn encode_body(&self) -> Result<Vec<u8>, Error> {
        let bytes = match self {
            Message::Text(m) => serde_cbor::to_vec(m),
            Message::Ping(m) => serde_cbor::to_vec(m),
            Message::Pong(m) => serde_cbor::to_vec(m),
            Message::PeerInfo(m) => serde_cbor::to_vec(m),
            Message::Heartbeat(m) => serde_cbor::to_vec(m),
            Message::Transaction(m) => serde_cbor::to_vec(m),
            Message::Block(m) => serde_cbor::to_vec(m),
            Message::BlockRequest(m) => serde_cbor::to_vec(m),
        };
        Ok(bytes?)
    }

    fn decode_body(kind: MessageKind, body: &[u8]) -> Result<Message, Error> {
        let message = match kind {
            MessageKind::Text => Message::Text(serde_cbor::from_slice(body)?),
            MessageKind::Ping => Message::Ping(serde_cbor::from_slice(body)?),
            MessageKind::Pong => Message::Pong(serde_cbor::from_slice(body)?),
            MessageKind::PeerInfo => Message::PeerInfo(serde_cbor::from_slice(body)?),
            MessageKind::Heartbeat => Message::Heartbeat(serde_cbor::from_slice(body)?),
            MessageKind::Transaction => Message::Transaction(serde_cbor::from_slice(body)?),
            MessageKind::Block => Message::Block(serde_cbor::from_slice(body)?),
            MessageKind::BlockRequest => Message::BlockRequest(serde_cbor::from_slice(body)?),
        };
        Ok(message)
    }
}

/// A message together with its wire header.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: MessageHeader,
    pub message: Message,
}

impl Frame {
    pub fn for_message(message: Message) -> Frame {
        Frame {
            header: MessageHeader {
                ttl: message.default_ttl(),
                hop: 0,
                size: 0,
                kind: message.kind(),
            },
            message,
        }
    }

    /// Serialize to header bytes plus body bytes.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let body = self.message.encode_body()?;
        let mut header = self.header;
        header.size = body.len() as i64;
        header.kind = self.message.kind();

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decode(header: MessageHeader, body: &[u8]) -> Result<Frame, Error> {
        let message = Message::decode_body(header.kind, body)?;
        Ok(Frame { header, message })
    }
}
