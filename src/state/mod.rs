//! Authoritative membership state store. Holds one
//! `NodeState` per known member plus the iteration order probes and gossip
//! sweep use, wrapped in a `parking_lot::RwLock`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use parking_lot::RwLock;

use crate::common::{Node, NodeId, ProtocolVersion};

/// A member's health as tracked by the failure detector. Ranked so that a
/// transition is only accepted if it moves a node forward: health only
/// degrades or is authoritatively refuted, never silently regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Health {
    Alive = 0,
    Suspect = 1,
    Dead = 2,
}

#[derive(Debug, Clone)]
pub struct NodeState {
    pub node: Node,
    pub health: Health,
    pub incarnation: u64,
    pub state_change: Instant,
    /// Peers who have independently corroborated a Suspect verdict for this
    /// node, used to contract the suspicion timeout.
    pub confirmations: std::collections::HashSet<NodeId>,
}

impl NodeState {
    fn new(node: Node) -> Self {
        Self {
            node,
            health: Health::Alive,
            incarnation: 0,
            state_change: Instant::now(),
            confirmations: Default::default(),
        }
    }
}

/// The outcome of applying an incoming membership message, used by the
/// caller to decide whether to re-broadcast it.
#[derive(Debug, PartialEq, Eq)]
pub enum Applied {
    /// The message changed local state and should be gossiped onward.
    Accepted,
    /// The message was stale (lower incarnation, or a regression) and was
    /// ignored.
    Stale,
    /// The node named in the message isn't known locally.
    Unknown,
}

#[derive(Default)]
pub struct NodeStateStore {
    nodes: RwLock<HashMap<NodeId, NodeState>>,
    /// Preserves insertion order for round-robin probe/gossip target
    /// selection, independent of the hash map's iteration order.
    order: RwLock<Vec<NodeId>>,
}

impl NodeStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a brand-new Alive member at incarnation 0. No-op if already
    /// present.
    pub fn insert_new(&self, node: Node) -> bool {
        let id = node.name.clone();
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&id) {
            return false;
        }
        nodes.insert(id.clone(), NodeState::new(node));
        self.order.write().push(id);
        true
    }

    pub fn get(&self, id: &NodeId) -> Option<NodeState> {
        self.nodes.read().get(id).cloned()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every member, for push/pull and `members()` queries.
    pub fn snapshot(&self) -> Vec<NodeState> {
        self.nodes.read().values().cloned().collect()
    }

    /// The node names in stable iteration order, for probe/gossip cycling.
    pub fn order(&self) -> Vec<NodeId> {
        self.order.read().clone()
    }

    /// Apply an authoritative Alive observation (from a push/pull exchange,
    /// a direct Alive gossip message, or local bootstrap). Accepted when
    /// `incarnation` is strictly greater than the stored one, or equal
    /// while the stored health is not already `Alive` (self-refutation of a
    /// Suspect verdict at the same incarnation).
    pub fn apply_alive(&self, node: Node, incarnation: u64, addr: Option<SocketAddr>) -> Applied {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&node.name) {
            None => {
                drop(nodes);
                self.insert_new(node);
                Applied::Accepted
            }
            Some(existing) => {
                let accept = incarnation > existing.incarnation
                    || (incarnation == existing.incarnation && existing.health != Health::Alive);
                if !accept {
                    return Applied::Stale;
                }
                existing.incarnation = incarnation;
                existing.health = Health::Alive;
                existing.state_change = Instant::now();
                existing.confirmations.clear();
                if let Some(addr) = addr {
                    existing.node.addr = addr;
                }
                existing.node.meta = node.meta;
                existing.node.vsn = node.vsn;
                Applied::Accepted
            }
        }
    }

    /// Apply a Suspect verdict. Accepted when `incarnation >= stored
    /// incarnation` and the stored health is `Alive`; if the stored health
    /// is already `Suspect` at the same incarnation, `from` is recorded as
    /// an additional confirmation instead of re-broadcasting.
    pub fn apply_suspect(&self, id: &NodeId, incarnation: u64, from: &NodeId) -> Applied {
        let mut nodes = self.nodes.write();
        let Some(existing) = nodes.get_mut(id) else { return Applied::Unknown };

        if incarnation < existing.incarnation {
            return Applied::Stale;
        }
        if existing.health == Health::Dead {
            return Applied::Stale;
        }
        if existing.health == Health::Suspect && incarnation == existing.incarnation {
            existing.confirmations.insert(from.clone());
            return Applied::Stale;
        }
        existing.health = Health::Suspect;
        existing.incarnation = incarnation;
        existing.state_change = Instant::now();
        existing.confirmations.clear();
        existing.confirmations.insert(from.clone());
        Applied::Accepted
    }

    /// Apply a Dead verdict, authoritative or intent-derived. Accepted when
    /// `incarnation >= stored incarnation` and the stored health is not
    /// already `Dead`: a node once Dead cannot be revived by a replayed
    /// message, only by a fresh Alive at a higher incarnation going through
    /// `apply_alive`.
    pub fn apply_dead(&self, id: &NodeId, incarnation: u64) -> Applied {
        let mut nodes = self.nodes.write();
        let Some(existing) = nodes.get_mut(id) else { return Applied::Unknown };

        if existing.health == Health::Dead {
            return Applied::Stale;
        }
        if incarnation < existing.incarnation {
            return Applied::Stale;
        }
        existing.health = Health::Dead;
        existing.incarnation = incarnation;
        existing.state_change = Instant::now();
        Applied::Accepted
    }

    /// Permanently drop a node (after its tombstone timeout elapses).
    pub fn remove(&self, id: &NodeId) {
        self.nodes.write().remove(id);
        self.order.write().retain(|n| n != id);
    }

    /// Node names currently in `Dead` state and how long they've been dead,
    /// for the tombstone reaper.
    pub fn dead_since(&self, id: &NodeId) -> Option<std::time::Duration> {
        self.nodes
            .read()
            .get(id)
            .filter(|n| n.health == Health::Dead)
            .map(|n| n.state_change.elapsed())
    }

    pub fn local_protocol_version(&self, id: &NodeId) -> Option<ProtocolVersion> {
        self.nodes.read().get(id).map(|n| n.node.vsn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn node(name: &str) -> Node {
        Node::new(NodeId::new(name), "127.0.0.1:7946".parse::<SocketAddr>().unwrap())
    }

    #[test]
    fn fresh_alive_is_inserted() {
        let store = NodeStateStore::new();
        assert_eq!(store.apply_alive(node("a"), 0, None), Applied::Accepted);
        assert!(store.contains(&NodeId::new("a")));
    }

    #[test]
    fn stale_alive_with_lower_incarnation_is_rejected() {
        let store = NodeStateStore::new();
        store.apply_alive(node("a"), 5, None);
        assert_eq!(store.apply_alive(node("a"), 3, None), Applied::Stale);
        assert_eq!(store.get(&NodeId::new("a")).unwrap().incarnation, 5);
    }

    #[test]
    fn suspect_then_equal_incarnation_alive_refutes_it() {
        let store = NodeStateStore::new();
        store.apply_alive(node("a"), 5, None);
        assert_eq!(store.apply_suspect(&NodeId::new("a"), 5, &NodeId::new("b")), Applied::Accepted);
        assert_eq!(store.apply_alive(node("a"), 5, None), Applied::Accepted);
        assert_eq!(store.get(&NodeId::new("a")).unwrap().health, Health::Alive);
    }

    #[test]
    fn dead_node_cannot_be_revived_by_replayed_suspect_or_dead() {
        let store = NodeStateStore::new();
        store.apply_alive(node("a"), 5, None);
        store.apply_dead(&NodeId::new("a"), 5);
        assert_eq!(store.apply_suspect(&NodeId::new("a"), 9, &NodeId::new("b")), Applied::Stale);
        assert_eq!(store.apply_dead(&NodeId::new("a"), 9), Applied::Stale);
        assert_eq!(store.get(&NodeId::new("a")).unwrap().health, Health::Dead);
    }

    #[test]
    fn dead_node_can_be_revived_by_fresh_alive_at_higher_incarnation() {
        let store = NodeStateStore::new();
        store.apply_alive(node("a"), 5, None);
        store.apply_dead(&NodeId::new("a"), 5);
        assert_eq!(store.apply_alive(node("a"), 6, None), Applied::Accepted);
        assert_eq!(store.get(&NodeId::new("a")).unwrap().health, Health::Alive);
    }

    #[test]
    fn repeated_suspect_at_same_incarnation_adds_confirmation_not_new_broadcast() {
        let store = NodeStateStore::new();
        store.apply_alive(node("a"), 5, None);
        store.apply_suspect(&NodeId::new("a"), 5, &NodeId::new("b"));
        assert_eq!(store.apply_suspect(&NodeId::new("a"), 5, &NodeId::new("c")), Applied::Stale);
        assert_eq!(store.get(&NodeId::new("a")).unwrap().confirmations.len(), 2);
    }
}
