//! Retransmit-limited gossip broadcast queue: a priority
//! queue ordered by transmit count so least-broadcast messages go out first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::Mutex;

/// A single piece of gossip competing for space in outbound packets.
pub trait Broadcast: Send + Sync {
    /// Returns true if `self` supersedes `other` and `other` should be
    /// dropped from the queue without being sent again (e.g. a newer Alive
    /// message for the same node invalidates an older Suspect message).
    fn invalidates(&self, other: &dyn Broadcast) -> bool;

    /// The encoded wire bytes for this broadcast.
    fn message(&self) -> &[u8];

    /// Called once the broadcast has either exhausted its retransmit budget
    /// or been invalidated. Used to release resources / signal completion
    /// to a caller awaiting a query response fan-out.
    fn finished(&self) {}

    /// A coarse identity used only for logging; not part of invalidation.
    fn name(&self) -> &str {
        "broadcast"
    }
}

struct Item {
    broadcast: Box<dyn Broadcast>,
    transmits: usize,
    seq: u64,
}

impl Item {
    fn msg_len(&self) -> usize {
        self.broadcast.message().len()
    }
}

// BinaryHeap is a max-heap; invert so the item with the fewest transmits
// (and, as a tiebreak, the smallest message) pops first. `seq` breaks ties
// deterministically in FIFO order so the ordering is a total order.
impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.transmits == other.transmits && self.msg_len() == other.msg_len() && self.seq == other.seq
    }
}
impl Eq for Item {}

impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Item {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .transmits
            .cmp(&self.transmits)
            .then_with(|| other.msg_len().cmp(&self.msg_len()))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Computes the retransmit limit for a cluster of `n_nodes` members:
/// `retransmit_mult * ceil(log10(n_nodes + 1))`.
pub fn retransmit_limit(retransmit_mult: usize, n_nodes: usize) -> usize {
    let scale = ((n_nodes as f64 + 1.0).log10()).ceil().max(0.0) as usize;
    retransmit_mult * scale.max(1)
}

#[derive(Default)]
struct Inner {
    items: BinaryHeap<Item>,
    next_seq: u64,
}

/// A retransmit-limited priority queue of pending gossip broadcasts.
///
/// Each call to `get_broadcasts` drains the lowest-transmit-count items up
/// to a byte budget, bumps their transmit counters, and re-queues any that
/// have not yet hit the retransmit limit.
pub struct TransmitLimitedQueue {
    inner: Mutex<Inner>,
    retransmit_mult: usize,
}

impl TransmitLimitedQueue {
    pub fn new(retransmit_mult: usize) -> Self {
        Self { inner: Mutex::new(Inner::default()), retransmit_mult }
    }

    /// Enqueue a new broadcast, first dropping any queued broadcast that `b`
    /// invalidates.
    pub fn enqueue(&self, b: Box<dyn Broadcast>) {
        let mut inner = self.inner.lock();
        let mut retained = BinaryHeap::new();
        while let Some(item) = inner.items.pop() {
            if b.invalidates(item.broadcast.as_ref()) {
                item.broadcast.finished();
            } else {
                retained.push(item);
            }
        }
        inner.items = retained;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.items.push(Item { broadcast: b, transmits: 0, seq });
    }

    /// Pop broadcasts (least-transmitted first) until adding the next one
    /// would exceed `byte_limit`, or `overhead` per message plus the message
    /// itself. Returns the encoded messages in the order they were selected.
    /// Retained broadcasts that have not exceeded the retransmit limit for
    /// `n_nodes` are pushed back with an incremented transmit count.
    pub fn get_broadcasts(&self, overhead: usize, byte_limit: usize, n_nodes: usize) -> Vec<Vec<u8>> {
        let limit = retransmit_limit(self.retransmit_mult, n_nodes);
        let mut inner = self.inner.lock();
        let mut out = Vec::new();
        let mut used = 0usize;
        let mut deferred = Vec::new();

        while let Some(item) = inner.items.pop() {
            let needed = overhead + item.msg_len();
            if used + needed > byte_limit {
                deferred.push(item);
                break;
            }
            used += needed;
            out.push(item.broadcast.message().to_vec());

            let transmits = item.transmits + 1;
            if transmits >= limit {
                item.broadcast.finished();
            } else {
                deferred.push(Item { broadcast: item.broadcast, transmits, seq: item.seq });
            }
        }

        for item in deferred {
            inner.items.push(item);
        }
        out
    }

    pub fn num_queued(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Drop every queued broadcast without sending it again, calling
    /// `finished` on each. Used when the cluster coordinator shuts down.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        for item in inner.items.drain() {
            item.broadcast.finished();
        }
    }

    /// Remove broadcasts for which `keep` returns false. Used by prune
    /// cycles that drop gossip about nodes that have since been reaped.
    pub fn prune(&self, mut keep: impl FnMut(&dyn Broadcast) -> bool) {
        let mut inner = self.inner.lock();
        let mut retained = BinaryHeap::new();
        for item in inner.items.drain() {
            if keep(item.broadcast.as_ref()) {
                retained.push(item);
            } else {
                item.broadcast.finished();
            }
        }
        inner.items = retained;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    struct Msg {
        id: &'static str,
        bytes: Vec<u8>,
        finished: Arc<AtomicUsize>,
    }

    impl Broadcast for Msg {
        fn invalidates(&self, other: &dyn Broadcast) -> bool {
            other.name() == self.id
        }
        fn message(&self) -> &[u8] {
            &self.bytes
        }
        fn finished(&self) {
            self.finished.fetch_add(1, AtomicOrdering::SeqCst);
        }
        fn name(&self) -> &str {
            self.id
        }
    }

    #[test]
    fn retransmit_limit_scales_with_log_cluster_size() {
        assert_eq!(retransmit_limit(4, 0), 4);
        assert!(retransmit_limit(4, 100) >= retransmit_limit(4, 10));
    }

    #[test]
    fn newer_broadcast_invalidates_and_finishes_older_one_for_same_node() {
        let q = TransmitLimitedQueue::new(4);
        let fin = Arc::new(AtomicUsize::new(0));
        q.enqueue(Box::new(Msg { id: "node-a", bytes: vec![1], finished: fin.clone() }));
        q.enqueue(Box::new(Msg { id: "node-a", bytes: vec![2], finished: fin.clone() }));
        assert_eq!(q.num_queued(), 1);
        assert_eq!(fin.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn get_broadcasts_respects_byte_limit() {
        let q = TransmitLimitedQueue::new(4);
        let fin = Arc::new(AtomicUsize::new(0));
        for i in 0..5u8 {
            q.enqueue(Box::new(Msg {
                id: Box::leak(format!("n{i}").into_boxed_str()),
                bytes: vec![0u8; 10],
                finished: fin.clone(),
            }));
        }
        let picked = q.get_broadcasts(0, 25, 5);
        assert_eq!(picked.len(), 2);
        assert_eq!(q.num_queued(), 5);
    }

    #[test]
    fn broadcast_finishes_once_retransmit_limit_exhausted() {
        let q = TransmitLimitedQueue::new(1);
        let fin = Arc::new(AtomicUsize::new(0));
        q.enqueue(Box::new(Msg { id: "only", bytes: vec![0u8; 4], finished: fin.clone() }));
        // retransmit_limit(1, 0 nodes) == 1, so a single send exhausts it.
        let picked = q.get_broadcasts(0, 100, 0);
        assert_eq!(picked.len(), 1);
        assert_eq!(q.num_queued(), 0);
        assert_eq!(fin.load(AtomicOrdering::SeqCst), 1);
    }
}
