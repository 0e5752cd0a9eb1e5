//! Pure message-handling logic: given an incoming Alive/Suspect/Dead
//! message, update the state store and produce the broadcast (if any) that
//! should be gossiped onward. Kept separate from `mod.rs`'s transport/timer
//! plumbing so the acceptance rules can be unit-tested without a runtime.

use std::net::SocketAddr;

use crate::broadcast::Broadcast;
use crate::common::{Node, NodeId, ProtocolVersion};
use crate::proto::codec::encode_message;
use crate::proto::messages::{self, Message};
use crate::state::{Applied, Health, NodeStateStore};

/// A gossip broadcast wrapping one already-encoded protocol message. Two
/// broadcasts about the same node invalidate each other so the queue never
/// carries more than one pending rumor per node.
pub struct GossipBroadcast {
    node: String,
    encoded: Vec<u8>,
}

impl Broadcast for GossipBroadcast {
    fn invalidates(&self, other: &dyn Broadcast) -> bool {
        other.name() == self.node
    }
    fn message(&self) -> &[u8] {
        &self.encoded
    }
    fn name(&self) -> &str {
        &self.node
    }
}

fn gossip(node: &str, msg: &Message) -> crate::error::Result<Box<dyn Broadcast>> {
    Ok(Box::new(GossipBroadcast { node: node.to_owned(), encoded: encode_message(msg)? }))
}

/// Handle an inbound `Alive` message: update the store and, if accepted,
/// return a broadcast to re-gossip it.
pub fn handle_alive(store: &NodeStateStore, msg: &messages::Alive) -> crate::error::Result<Option<Box<dyn Broadcast>>> {
    let addr: SocketAddr = (msg.addr, msg.port).into();
    let mut node = Node::new(NodeId::new(msg.node.clone()), addr);
    node.meta = msg.meta.clone();
    node.vsn = ProtocolVersion::from(msg.vsn);

    match store.apply_alive(node, msg.incarnation, Some(addr)) {
        Applied::Accepted => Ok(Some(gossip(&msg.node, &Message::Alive(msg.clone()))?)),
        Applied::Stale | Applied::Unknown => Ok(None),
    }
}

/// Handle an inbound `Suspect` message.
pub fn handle_suspect(store: &NodeStateStore, msg: &messages::Suspect) -> crate::error::Result<Option<Box<dyn Broadcast>>> {
    let id = NodeId::new(msg.node.clone());
    let from = NodeId::new(msg.from.clone());
    match store.apply_suspect(&id, msg.incarnation, &from) {
        Applied::Accepted => Ok(Some(gossip(&msg.node, &Message::Suspect(msg.clone()))?)),
        Applied::Stale | Applied::Unknown => Ok(None),
    }
}

/// Handle an inbound `Dead` message.
pub fn handle_dead(store: &NodeStateStore, msg: &messages::Dead) -> crate::error::Result<Option<Box<dyn Broadcast>>> {
    let id = NodeId::new(msg.node.clone());
    match store.apply_dead(&id, msg.incarnation) {
        Applied::Accepted => Ok(Some(gossip(&msg.node, &Message::Dead(msg.clone()))?)),
        Applied::Stale | Applied::Unknown => Ok(None),
    }
}

/// Build a self-refuting `Alive` message with a bumped incarnation, used
/// when a node receives a `Suspect` naming itself: a live node always
/// refutes suspicion about itself.
pub fn refute_suspicion(local: &Node, next_incarnation: u64) -> Message {
    Message::Alive(messages::Alive {
        incarnation: next_incarnation,
        node: local.name.as_str().to_owned(),
        addr: local.addr.ip(),
        port: local.addr.port(),
        meta: local.meta.clone(),
        vsn: local.vsn.into(),
    })
}

/// Whether `health` has actually regressed far enough to warrant waking the
/// suspicion timer (only `Alive -> Suspect` starts one).
pub fn starts_suspicion(previous: Health, new: Health) -> bool {
    previous == Health::Alive && new == Health::Suspect
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn accepted_alive_yields_broadcast() {
        let store = NodeStateStore::new();
        let msg = messages::Alive {
            incarnation: 1,
            node: "a".into(),
            addr: "127.0.0.1".parse().unwrap(),
            port: 7946,
            meta: vec![],
            vsn: ProtocolVersion::default().into(),
        };
        let out = handle_alive(&store, &msg).unwrap();
        assert!(out.is_some());
    }

    #[test]
    fn stale_dead_yields_no_broadcast() {
        let store = NodeStateStore::new();
        let addr: SocketAddr = "127.0.0.1:7946".parse().unwrap();
        store.apply_alive(Node::new("a", addr), 5, None);
        store.apply_dead(&NodeId::new("a"), 5);
        let msg = messages::Dead { incarnation: 1, node: "a".into(), from: "b".into() };
        assert!(handle_dead(&store, &msg).unwrap().is_none());
    }

    #[test]
    fn refutation_bumps_incarnation_and_keeps_identity() {
        let local = Node::new("self", "127.0.0.1:7946".parse().unwrap());
        let msg = refute_suspicion(&local, 9);
        match msg {
            Message::Alive(a) => {
                assert_eq!(a.incarnation, 9);
                assert_eq!(a.node, "self");
            }
            _ => panic!("expected alive"),
        }
    }
}
