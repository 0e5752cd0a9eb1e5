//! Member manager: owns the `MemberRecord` table and
//! exposes the accessor pattern the rest of the agent uses to read or
//! mutate it, always through the state-machine gate rather than directly.
//! A guarded map plus a small set of named operations, never exposing the
//! raw lock.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::clock::{LTime, LamportClock};
use crate::common::NodeId;

use super::state_machine::{
    apply_authoritative_failed, apply_authoritative_left, apply_join_intent, apply_leave_intent, MemberRecord,
    MemberStatus,
};

/// The result of applying an intent, used by the caller to decide whether
/// to re-gossip it.
#[derive(Debug, PartialEq, Eq)]
pub enum IntentResult {
    Accepted,
    Stale,
}

pub struct MemberManager {
    clock: LamportClock,
    records: RwLock<HashMap<NodeId, MemberRecord>>,
}

impl MemberManager {
    pub fn new() -> Self {
        Self { clock: LamportClock::new(), records: RwLock::new(HashMap::new()) }
    }

    pub fn clock(&self) -> &LamportClock {
        &self.clock
    }

    /// Reserve the next Lamport time for an intent this node is about to
    /// issue (a join or leave of itself, or a user event/query).
    pub fn next_ltime(&self) -> LTime {
        self.clock.increment()
    }

    /// Witness a Lamport time observed on an incoming message, advancing
    /// the local clock so subsequently issued intents sort after it.
    pub fn witness(&self, observed: LTime) {
        self.clock.witness(observed);
    }

    pub fn status(&self, id: &NodeId) -> MemberStatus {
        self.records.read().get(id).map(|r| r.status).unwrap_or(MemberStatus::None)
    }

    pub fn apply_join(&self, id: &NodeId, ltime: LTime) -> IntentResult {
        self.witness(ltime);
        let mut records = self.records.write();
        let record = records.entry(id.clone()).or_default();
        if apply_join_intent(record, ltime) {
            IntentResult::Accepted
        } else {
            IntentResult::Stale
        }
    }

    pub fn apply_leave(&self, id: &NodeId, ltime: LTime) -> IntentResult {
        self.witness(ltime);
        let mut records = self.records.write();
        let record = records.entry(id.clone()).or_default();
        if apply_leave_intent(record, ltime) {
            IntentResult::Accepted
        } else {
            IntentResult::Stale
        }
    }

    /// Called when the SWIM engine declares `id` Dead. Always wins over any
    /// pending Leaving intent except a completed graceful Left.
    pub fn mark_failed(&self, id: &NodeId) -> IntentResult {
        let ltime = self.clock.increment();
        let mut records = self.records.write();
        let record = records.entry(id.clone()).or_default();
        if apply_authoritative_failed(record, ltime) {
            IntentResult::Accepted
        } else {
            IntentResult::Stale
        }
    }

    /// Called when a `Leaving` member has been reaped (stopped probing
    /// successfully and its tombstone window is spent), or on local
    /// graceful shutdown.
    pub fn mark_left(&self, id: &NodeId) -> IntentResult {
        let ltime = self.clock.increment();
        let mut records = self.records.write();
        let record = records.entry(id.clone()).or_default();
        if apply_authoritative_left(record, ltime) {
            IntentResult::Accepted
        } else {
            IntentResult::Stale
        }
    }

    pub fn members_with_status(&self, status: MemberStatus) -> Vec<NodeId> {
        self.records
            .read()
            .iter()
            .filter(|(_, r)| r.status == status)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn remove(&self, id: &NodeId) {
        self.records.write().remove(id);
    }
}

impl Default for MemberManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_then_failed_then_stale_rejoin_replay_is_rejected() {
        let mgr = MemberManager::new();
        let a = NodeId::new("a");
        let join_ltime = mgr.next_ltime();
        assert_eq!(mgr.apply_join(&a, join_ltime), IntentResult::Accepted);
        assert_eq!(mgr.mark_failed(&a), IntentResult::Accepted);
        assert_eq!(mgr.status(&a), MemberStatus::Failed);
        // Replaying the original join intent (now stale) must not revive it.
        assert_eq!(mgr.apply_join(&a, join_ltime), IntentResult::Stale);
        assert_eq!(mgr.status(&a), MemberStatus::Failed);
    }

    #[test]
    fn fresh_join_after_failure_advances_ltime_but_status_remains_failed() {
        let mgr = MemberManager::new();
        let a = NodeId::new("a");
        mgr.apply_join(&a, mgr.next_ltime());
        mgr.mark_failed(&a);
        let rejoin = mgr.next_ltime();
        // A JoinIntent is accepted (its ltime is newer) but only an
        // authoritative memberlist join can actually revive a Failed member.
        assert_eq!(mgr.apply_join(&a, rejoin), IntentResult::Accepted);
        assert_eq!(mgr.status(&a), MemberStatus::Failed);
    }
}
