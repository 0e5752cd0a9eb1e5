//! User event dissemination: application-level
//! broadcast messages, deduplicated against a bounded circular buffer keyed
//! by (Lamport time, name, payload hash) and coalesced so a flurry of
//! gossip retransmissions doesn't re-deliver the same event to the
//! delegate twice.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

use crate::broadcast::{Broadcast, TransmitLimitedQueue};
use crate::clock::{LTime, LamportClock};
use crate::proto::codec::encode_message;
use crate::proto::messages::{Message, UserMsg};

/// A single delivered user event, handed to whatever delegate the
/// coordinator installs.
#[derive(Debug, Clone)]
pub struct UserEvent {
    pub ltime: LTime,
    pub name: String,
    pub payload: Vec<u8>,
}

fn fingerprint(ltime: LTime, name: &str, payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(ltime.to_be_bytes());
    hasher.update(name.as_bytes());
    hasher.update(payload);
    hasher.finalize().into()
}

struct EventBroadcast {
    key: [u8; 32],
    encoded: Vec<u8>,
}

impl Broadcast for EventBroadcast {
    fn invalidates(&self, _other: &dyn Broadcast) -> bool {
        // Distinct events never invalidate one another; only exact
        // re-enqueues (same fingerprint) are deduplicated, and that's
        // handled by the manager before it ever calls `enqueue`.
        false
    }
    fn message(&self) -> &[u8] {
        &self.encoded
    }
}

/// Dispatched and received user events, with a bounded dedup window: at
/// most `event_buffer_size` recent events are remembered, older ones fall
/// out and could theoretically redeliver, an accepted at-least-once
/// tradeoff.
pub struct EventManager {
    clock: LamportClock,
    seen: parking_lot::Mutex<VecDeque<[u8; 32]>>,
    capacity: usize,
    broadcasts: std::sync::Arc<TransmitLimitedQueue>,
}

impl EventManager {
    pub fn new(capacity: usize, broadcasts: std::sync::Arc<TransmitLimitedQueue>) -> Self {
        Self { clock: LamportClock::new(), seen: parking_lot::Mutex::new(VecDeque::with_capacity(capacity)), capacity, broadcasts }
    }

    pub fn clock(&self) -> &LamportClock {
        &self.clock
    }

    fn remember(&self, key: [u8; 32]) -> bool {
        let mut seen = self.seen.lock();
        if seen.contains(&key) {
            return false;
        }
        if seen.len() >= self.capacity {
            seen.pop_front();
        }
        seen.push_back(key);
        true
    }

    /// Issue a brand-new user event, stamped with a fresh Lamport time, and
    /// enqueue it for gossip.
    pub fn issue(&self, name: String, payload: Vec<u8>, coalesce: bool) -> crate::error::Result<UserEvent> {
        let ltime = self.clock.increment();
        let key = fingerprint(ltime, &name, &payload);
        self.remember(key);
        let msg = Message::User(UserMsg { ltime, name: name.clone(), payload: payload.clone(), cc: coalesce });
        let encoded = encode_message(&msg)?;
        self.broadcasts.enqueue(Box::new(EventBroadcast { key, encoded }));
        Ok(UserEvent { ltime, name, payload })
    }

    /// Handle an event received over the wire. Returns `Some` exactly once
    /// per distinct (ltime, name, payload) within the dedup window, and
    /// witnesses the Lamport clock either way so subsequently issued local
    /// events always sort after everything seen so far.
    pub fn receive(&self, msg: UserMsg) -> crate::error::Result<Option<UserEvent>> {
        self.clock.witness(msg.ltime);
        let key = fingerprint(msg.ltime, &msg.name, &msg.payload);
        if !self.remember(key) {
            return Ok(None);
        }
        let encoded = encode_message(&Message::User(msg.clone()))?;
        self.broadcasts.enqueue(Box::new(EventBroadcast { key, encoded }));
        Ok(Some(UserEvent { ltime: msg.ltime, name: msg.name, payload: msg.payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::TransmitLimitedQueue;
    use std::sync::Arc;

    fn manager(capacity: usize) -> EventManager {
        EventManager::new(capacity, Arc::new(TransmitLimitedQueue::new(4)))
    }

    #[test]
    fn duplicate_delivery_is_suppressed() {
        let mgr = manager(16);
        let msg = UserMsg { ltime: 1, name: "deploy".into(), payload: b"v2".to_vec(), cc: false };
        assert!(mgr.receive(msg.clone()).unwrap().is_some());
        assert!(mgr.receive(msg).unwrap().is_none());
    }

    #[test]
    fn distinct_events_both_deliver() {
        let mgr = manager(16);
        let a = UserMsg { ltime: 1, name: "deploy".into(), payload: b"v2".to_vec(), cc: false };
        let b = UserMsg { ltime: 2, name: "deploy".into(), payload: b"v3".to_vec(), cc: false };
        assert!(mgr.receive(a).unwrap().is_some());
        assert!(mgr.receive(b).unwrap().is_some());
    }

    #[test]
    fn events_beyond_capacity_fall_out_of_the_dedup_window() {
        let mgr = manager(2);
        let e0 = UserMsg { ltime: 0, name: "a".into(), payload: vec![], cc: false };
        let e1 = UserMsg { ltime: 1, name: "b".into(), payload: vec![], cc: false };
        let e2 = UserMsg { ltime: 2, name: "c".into(), payload: vec![], cc: false };
        mgr.receive(e0.clone()).unwrap();
        mgr.receive(e1).unwrap();
        mgr.receive(e2).unwrap();
        // e0 was evicted to make room, so it can be "redelivered".
        assert!(mgr.receive(e0).unwrap().is_some());
    }

    #[test]
    fn receiving_witnesses_the_clock() {
        let mgr = manager(16);
        mgr.receive(UserMsg { ltime: 41, name: "a".into(), payload: vec![], cc: false }).unwrap();
        assert_eq!(mgr.clock().increment(), 42);
    }
}
