//! Query/response fan-out: a node issues a query,
//! every member whose tags/name match the attached filters may respond, and
//! the issuer consumes acks and responses as an async stream until its
//! timeout elapses.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::clock::{LTime, LamportClock};
use crate::common::NodeId;
use crate::error::{AgentError, Result};
use crate::proto::codec::{decode_message, encode_message};
use crate::proto::messages::{Message, QueryMsg, QueryResponseMsg};
use crate::security::SecurityManager;
use crate::transport::Transport;

/// The prefix reserved for queries the agent issues internally (e.g. the
/// key manager's cluster-wide key rotation), so application delegates can
/// tell them apart from user-issued queries.
pub const INTERNAL_QUERY_PREFIX: &str = "_meshkeeper_";

/// A predicate restricting which members should answer a query.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Only these specific nodes should respond.
    Node(Vec<NodeId>),
    /// Only nodes with a tag matching `key_pattern`/`value_pattern` should
    /// respond.
    Tag { key_pattern: String, value_pattern: String },
}

impl Filter {
    fn matches(&self, node: &NodeId, tags: &std::collections::HashMap<String, String>) -> bool {
        match self {
            Filter::Node(nodes) => nodes.contains(node),
            Filter::Tag { key_pattern, value_pattern } => {
                let key_re = Regex::new(key_pattern).ok();
                let val_re = Regex::new(value_pattern).ok();
                let (Some(key_re), Some(val_re)) = (key_re, val_re) else { return false };
                tags.iter().any(|(k, v)| key_re.is_match(k) && val_re.is_match(v))
            }
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            Filter::Node(nodes) => {
                let mut out = vec![0u8];
                for n in nodes {
                    out.extend((n.as_str().len() as u16).to_be_bytes());
                    out.extend(n.as_str().as_bytes());
                }
                out
            }
            Filter::Tag { key_pattern, value_pattern } => {
                let mut out = vec![1u8];
                out.extend((key_pattern.len() as u16).to_be_bytes());
                out.extend(key_pattern.as_bytes());
                out.extend((value_pattern.len() as u16).to_be_bytes());
                out.extend(value_pattern.as_bytes());
                out
            }
        }
    }

    fn decode(bytes: &[u8]) -> Result<Filter> {
        let (&kind, rest) = bytes.split_first().ok_or_else(|| AgentError::Codec("empty filter".into()))?;
        match kind {
            0 => {
                let mut nodes = Vec::new();
                let mut cursor = rest;
                while !cursor.is_empty() {
                    let len = u16::from_be_bytes(cursor[..2].try_into().unwrap()) as usize;
                    let name = std::str::from_utf8(&cursor[2..2 + len])
                        .map_err(|_| AgentError::Codec("filter node name not utf8".into()))?;
                    nodes.push(NodeId::new(name));
                    cursor = &cursor[2 + len..];
                }
                Ok(Filter::Node(nodes))
            }
            1 => {
                let klen = u16::from_be_bytes(rest[..2].try_into().unwrap()) as usize;
                let key_pattern = std::str::from_utf8(&rest[2..2 + klen]).unwrap().to_owned();
                let rest2 = &rest[2 + klen..];
                let vlen = u16::from_be_bytes(rest2[..2].try_into().unwrap()) as usize;
                let value_pattern = std::str::from_utf8(&rest2[2..2 + vlen]).unwrap().to_owned();
                Ok(Filter::Tag { key_pattern, value_pattern })
            }
            other => Err(AgentError::Codec(format!("unknown filter kind {other}"))),
        }
    }
}

/// One inbound item an issuer receives while a query is outstanding.
#[derive(Debug, Clone)]
pub enum QueryEvent {
    Ack(NodeId),
    Response { from: NodeId, payload: Vec<u8> },
}

/// A live query: a stream of acks/responses plus the information needed to
/// close it out once `deadline` passes.
pub struct QueryHandle {
    pub id: u32,
    pub deadline: Duration,
    events: ReceiverStream<QueryEvent>,
}

impl QueryHandle {
    pub fn into_stream(self) -> ReceiverStream<QueryEvent> {
        self.events
    }
}

struct Outstanding {
    tx: mpsc::Sender<QueryEvent>,
}

/// Dispatches outbound queries and answers inbound ones.
pub struct QueryManager {
    clock: LamportClock,
    next_id: std::sync::atomic::AtomicU32,
    outstanding: dashmap::DashMap<u32, Outstanding>,
    seen: parking_lot::Mutex<std::collections::VecDeque<(LTime, u32)>>,
    seen_capacity: usize,
    transport: Arc<dyn Transport>,
    security: Arc<SecurityManager>,
}

impl QueryManager {
    pub fn new(transport: Arc<dyn Transport>, security: Arc<SecurityManager>, seen_capacity: usize) -> Self {
        Self {
            clock: LamportClock::new(),
            next_id: std::sync::atomic::AtomicU32::new(0),
            outstanding: dashmap::DashMap::new(),
            seen: parking_lot::Mutex::new(std::collections::VecDeque::with_capacity(seen_capacity)),
            seen_capacity,
            transport,
            security,
        }
    }

    pub fn clock(&self) -> &LamportClock {
        &self.clock
    }

    fn mark_seen(&self, ltime: LTime, id: u32) -> bool {
        let mut seen = self.seen.lock();
        if seen.contains(&(ltime, id)) {
            return false;
        }
        if seen.len() >= self.seen_capacity {
            seen.pop_front();
        }
        seen.push_back((ltime, id));
        true
    }

    async fn send(&self, msg: &Message, addr: SocketAddr) -> Result<()> {
        let body = encode_message(msg)?;
        let wire = self.security.encode_outgoing(&body)?;
        self.transport.send_packet(&wire, addr).await
    }

    /// Issue a query and disseminate it (the caller is expected to hand the
    /// returned encoded message to the broadcast queue for gossip, the same
    /// way user events are disseminated).
    pub fn issue(
        &self,
        local: &NodeId,
        local_addr: SocketAddr,
        name: String,
        payload: Vec<u8>,
        filters: Vec<Filter>,
        relay_factor: u8,
        buffer: usize,
    ) -> (Message, QueryHandle) {
        let ltime = self.clock.increment();
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.mark_seen(ltime, id);

        let (tx, rx) = mpsc::channel(buffer);
        self.outstanding.insert(id, Outstanding { tx });

        let msg = Message::Query(QueryMsg {
            ltime,
            id,
            source_node: local.as_str().to_owned(),
            source_addr: local_addr.ip(),
            source_port: local_addr.port(),
            relay_factor,
            filters: filters.iter().map(Filter::encode).collect(),
            name,
            payload,
        });
        (msg, QueryHandle { id, deadline: Duration::from_secs(0), events: ReceiverStream::new(rx) })
    }

    /// Handle an inbound query: witness its clock, check filters against
    /// this node's identity/tags, and return the response payload if this
    /// node should answer (the caller supplies the responder, typically a
    /// delegate callback or the internal key-manager handler).
    pub async fn handle_query<F>(
        &self,
        local: &NodeId,
        tags: &std::collections::HashMap<String, String>,
        msg: QueryMsg,
        responder: F,
    ) -> Result<()>
    where
        F: FnOnce(&QueryMsg) -> Option<Vec<u8>>,
    {
        self.clock.witness(msg.ltime);
        if !self.mark_seen(msg.ltime, msg.id) {
            return Ok(());
        }

        let filters: Vec<Filter> = msg.filters.iter().map(|f| Filter::decode(f)).collect::<Result<_>>()?;
        if !filters.is_empty() && !filters.iter().any(|f| f.matches(local, tags)) {
            return Ok(());
        }

        let source: SocketAddr = (msg.source_addr, msg.source_port).into();
        if let Some(payload) = responder(&msg) {
            let resp = Message::QueryResponse(QueryResponseMsg {
                ltime: msg.ltime,
                id: msg.id,
                from: local.as_str().to_owned(),
                ack: false,
                payload,
            });
            self.send(&resp, source).await?;
        } else {
            let ack = Message::QueryResponse(QueryResponseMsg {
                ltime: msg.ltime,
                id: msg.id,
                from: local.as_str().to_owned(),
                ack: true,
                payload: vec![],
            });
            self.send(&ack, source).await?;
        }
        Ok(())
    }

    /// Route an inbound response/ack to whichever local `QueryHandle` is
    /// still waiting for it. A response for an unknown or already-closed
    /// query is silently dropped.
    pub fn handle_response(&self, msg: QueryResponseMsg) {
        if let Some(entry) = self.outstanding.get(&msg.id) {
            let event = if msg.ack {
                QueryEvent::Ack(NodeId::new(msg.from))
            } else {
                QueryEvent::Response { from: NodeId::new(msg.from), payload: msg.payload }
            };
            let _ = entry.tx.try_send(event);
        }
    }

    /// Drop a query's channel once its deadline has elapsed.
    pub fn close(&self, id: u32) {
        self.outstanding.remove(&id);
    }
}

/// Decode the distinct responding node names out of a stream's buffered
/// events so far; used by tests and by the key manager's list-keys
/// aggregation. Not part of the live-streaming path.
pub fn distinct_responders(events: &[QueryEvent]) -> HashSet<NodeId> {
    events
        .iter()
        .filter_map(|e| match e {
            QueryEvent::Ack(n) => Some(n.clone()),
            QueryEvent::Response { from, .. } => Some(from.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_filter_matches_regex() {
        let filter = Filter::Tag { key_pattern: "^role$".into(), value_pattern: "^web.*".into() };
        let mut tags = std::collections::HashMap::new();
        tags.insert("role".to_string(), "web-1".to_string());
        assert!(filter.matches(&NodeId::new("n"), &tags));
    }

    #[test]
    fn node_filter_round_trips_through_encode_decode() {
        let filter = Filter::Node(vec![NodeId::new("a"), NodeId::new("b")]);
        let encoded = filter.encode();
        let decoded = Filter::decode(&encoded).unwrap();
        match decoded {
            Filter::Node(nodes) => assert_eq!(nodes, vec![NodeId::new("a"), NodeId::new("b")]),
            _ => panic!("expected node filter"),
        }
    }

    #[test]
    fn internal_query_prefix_is_reserved() {
        assert!("_meshkeeper_install-key".starts_with(INTERNAL_QUERY_PREFIX));
    }
}
