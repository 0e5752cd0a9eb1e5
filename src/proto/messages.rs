//! Typed message bodies exchanged over UDP (gossip/probe) and TCP
//! (push/pull, user messages). Each variant maps to a stable integer tag
//! so the wire format doesn't shift if this enum's
//! declaration order ever changes.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::clock::LTime;

/// Stable wire tags, one per message kind. Never renumber an existing
/// variant — only append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Ping = 0,
    IndirectPing = 1,
    AckResp = 2,
    Suspect = 3,
    Alive = 4,
    Dead = 5,
    PushPull = 6,
    Compound = 7,
    User = 8,
    Compress = 9,
    Encrypt = 10,
    NackResp = 11,
    HasCrc = 12,
    Err = 13,
    Query = 14,
    QueryResponse = 15,
}

impl MessageKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::Ping,
            1 => Self::IndirectPing,
            2 => Self::AckResp,
            3 => Self::Suspect,
            4 => Self::Alive,
            5 => Self::Dead,
            6 => Self::PushPull,
            7 => Self::Compound,
            8 => Self::User,
            9 => Self::Compress,
            10 => Self::Encrypt,
            11 => Self::NackResp,
            12 => Self::HasCrc,
            13 => Self::Err,
            14 => Self::Query,
            15 => Self::QueryResponse,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Ping {
    pub seq_no: u32,
    pub node: String,
    /// Set when this ping was relayed on behalf of an indirect-probe
    /// requester, so the target's ack can be routed back to the relay.
    pub source_node: Option<String>,
    #[bincode(with_serde)]
    pub source_addr: Option<IpAddr>,
    pub source_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct IndirectPing {
    pub seq_no: u32,
    #[bincode(with_serde)]
    pub target_addr: IpAddr,
    pub target_port: u16,
    pub target_node: String,
    /// Ask the relay to reply with a TCP nack if the UDP ack never arrives.
    pub nack: bool,
    pub source_node: String,
    #[bincode(with_serde)]
    pub source_addr: IpAddr,
    pub source_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct AckResp {
    pub seq_no: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct NackResp {
    pub seq_no: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Suspect {
    pub incarnation: u64,
    pub node: String,
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Alive {
    pub incarnation: u64,
    pub node: String,
    #[bincode(with_serde)]
    pub addr: IpAddr,
    pub port: u16,
    pub meta: Vec<u8>,
    pub vsn: [u8; 6],
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Dead {
    pub incarnation: u64,
    pub node: String,
    pub from: String,
}

/// One member's state as carried in a push/pull anti-entropy exchange.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct PushNodeState {
    pub name: String,
    #[bincode(with_serde)]
    pub addr: IpAddr,
    pub port: u16,
    pub meta: Vec<u8>,
    pub incarnation: u64,
    pub state: u8,
    pub vsn: [u8; 6],
}

/// The full body of a push/pull exchange: the sender's membership view plus
/// the three Lamport clocks and any piggy-backed user state.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct PushPullState {
    pub nodes: Vec<PushNodeState>,
    pub user_state: Vec<u8>,
    pub join: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct UserMsg {
    pub ltime: LTime,
    pub name: String,
    pub payload: Vec<u8>,
    pub cc: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Compound {
    pub messages: Vec<Vec<u8>>,
}

/// A serialized filter restricting which members a query is relevant to
///. Kept pre-encoded on the wire (rather than a typed
/// enum) so new filter kinds can be added without bumping the protocol
/// version, mirroring how `meta` is opaque at this layer.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct QueryMsg {
    pub ltime: LTime,
    pub id: u32,
    pub source_node: String,
    #[bincode(with_serde)]
    pub source_addr: IpAddr,
    pub source_port: u16,
    /// How many extra hops a response may be relayed through on the way
    /// back to the source if direct delivery might be unreliable.
    pub relay_factor: u8,
    pub filters: Vec<Vec<u8>>,
    pub name: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct QueryResponseMsg {
    pub ltime: LTime,
    pub id: u32,
    pub from: String,
    /// Set on a bare acknowledgement (no payload) when the query only asked
    /// for delivery confirmation rather than a computed response.
    pub ack: bool,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct ErrResp {
    pub error: String,
}

/// The decoded form of any single protocol message, already demultiplexed
/// by its wire tag.
#[derive(Debug, Clone)]
pub enum Message {
    Ping(Ping),
    IndirectPing(IndirectPing),
    AckResp(AckResp),
    NackResp(NackResp),
    Suspect(Suspect),
    Alive(Alive),
    Dead(Dead),
    PushPull(PushPullState),
    User(UserMsg),
    Compound(Compound),
    Err(ErrResp),
    Query(QueryMsg),
    QueryResponse(QueryResponseMsg),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Ping(_) => MessageKind::Ping,
            Message::IndirectPing(_) => MessageKind::IndirectPing,
            Message::AckResp(_) => MessageKind::AckResp,
            Message::NackResp(_) => MessageKind::NackResp,
            Message::Suspect(_) => MessageKind::Suspect,
            Message::Alive(_) => MessageKind::Alive,
            Message::Dead(_) => MessageKind::Dead,
            Message::PushPull(_) => MessageKind::PushPull,
            Message::User(_) => MessageKind::User,
            Message::Compound(_) => MessageKind::Compound,
            Message::Err(_) => MessageKind::Err,
            Message::Query(_) => MessageKind::Query,
            Message::QueryResponse(_) => MessageKind::QueryResponse,
        }
    }
}
