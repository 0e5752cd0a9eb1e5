//! Member status state machine: distinguishes
//! Lamport-gated "intent" transitions, which can be rejected as stale, from
//! authoritative transitions driven by the SWIM engine or local shutdown,
//! which always win.

use crate::clock::LTime;

/// A member's coordination-level status, layered above the SWIM engine's
/// raw Alive/Suspect/Dead health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    /// Known only as a name, not yet joined (e.g. referenced by a stale
    /// gossip message before its Alive arrived).
    None,
    Alive,
    /// Told the cluster it intends to leave but hasn't yet been reaped.
    Leaving,
    /// Left gracefully and is done being gossiped about once reaped.
    Left,
    /// The SWIM engine declared this member Dead.
    Failed,
}

#[derive(Debug, Clone)]
pub struct MemberRecord {
    pub status: MemberStatus,
    /// The Lamport time of the intent (join/leave) that produced the
    /// current status, used to reject stale replays.
    pub status_ltime: LTime,
}

impl Default for MemberRecord {
    fn default() -> Self {
        Self { status: MemberStatus::None, status_ltime: 0 }
    }
}

/// Apply a join intent. Accepted only if `ltime` is strictly newer than the
/// record's current status time, **or** the record has never seen a status
/// change (`status == None`).
///
/// Only a `Leaving` member actually transitions to `Alive` here (a member
/// that announced it was leaving and then rejoined before being reaped).
/// From every other status the intent is an `status_ltime`-only update:
/// in particular a `Left`/`Failed` member's status is left untouched, since
/// only an authoritative memberlist join (SWIM `Alive`) may revive it. This
/// is the anti-resurrection gate: a replayed join intent from before a
/// member went `Left`/`Failed` carries an old `ltime` and is rejected
/// outright; a join intent from after the departure is accepted but still
/// cannot move the status off `Left`/`Failed` on its own.
pub fn apply_join_intent(record: &mut MemberRecord, ltime: LTime) -> bool {
    if record.status == MemberStatus::None || ltime > record.status_ltime {
        if record.status == MemberStatus::Leaving {
            record.status = MemberStatus::Alive;
        }
        record.status_ltime = ltime;
        true
    } else {
        false
    }
}

/// Apply a leave intent. Accepted from `Alive`/`None` (moves to `Leaving`,
/// pending reap) or from `Failed` (moves straight to `Left` — the member is
/// simply reclassified from the failed list to the left list, since SWIM
/// already knows it's unreachable and there's no live node left to reap).
/// Only accepted if `ltime` is newer than the record's status time.
pub fn apply_leave_intent(record: &mut MemberRecord, ltime: LTime) -> bool {
    match record.status {
        MemberStatus::Alive | MemberStatus::None if ltime > record.status_ltime => {
            record.status = MemberStatus::Leaving;
            record.status_ltime = ltime;
            true
        }
        MemberStatus::Failed if ltime > record.status_ltime => {
            record.status = MemberStatus::Left;
            record.status_ltime = ltime;
            true
        }
        _ => false,
    }
}

/// Authoritative transition to `Failed`, driven by the SWIM engine
/// declaring the member Dead. Bypasses the Lamport gate entirely — SWIM's
/// own incarnation-based gate has already validated the Dead message — but
/// is a no-op if the member already left gracefully or is already Failed.
pub fn apply_authoritative_failed(record: &mut MemberRecord, ltime: LTime) -> bool {
    if matches!(record.status, MemberStatus::Left | MemberStatus::Failed) {
        return false;
    }
    record.status = MemberStatus::Failed;
    record.status_ltime = ltime;
    true
}

/// Authoritative transition to `Left`, driven by the local node completing
/// its own graceful leave, or a peer's `Leaving` member being reaped after
/// it stops responding to probes.
pub fn apply_authoritative_left(record: &mut MemberRecord, ltime: LTime) -> bool {
    if record.status == MemberStatus::Failed {
        return false;
    }
    record.status = MemberStatus::Left;
    record.status_ltime = ltime;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_join_intent_is_accepted_from_none() {
        let mut r = MemberRecord::default();
        assert!(apply_join_intent(&mut r, 1));
        assert_eq!(r.status, MemberStatus::Alive);
    }

    #[test]
    fn stale_join_intent_replay_cannot_revive_a_failed_member() {
        let mut r = MemberRecord { status: MemberStatus::Alive, status_ltime: 5 };
        apply_authoritative_failed(&mut r, 10);
        assert_eq!(r.status, MemberStatus::Failed);
        // A replayed join intent at ltime 3 (older than the fail at 10) must
        // not revive the member.
        assert!(!apply_join_intent(&mut r, 3));
        assert_eq!(r.status, MemberStatus::Failed);
    }

    #[test]
    fn fresh_join_intent_after_failure_advances_ltime_but_not_status() {
        let mut r = MemberRecord { status: MemberStatus::Alive, status_ltime: 5 };
        apply_authoritative_failed(&mut r, 10);
        assert!(apply_join_intent(&mut r, 11));
        assert_eq!(r.status, MemberStatus::Failed);
        assert_eq!(r.status_ltime, 11);
    }

    #[test]
    fn join_intent_revives_a_leaving_member_to_alive() {
        let mut r = MemberRecord { status: MemberStatus::Alive, status_ltime: 1 };
        assert!(apply_leave_intent(&mut r, 2));
        assert_eq!(r.status, MemberStatus::Leaving);
        assert!(apply_join_intent(&mut r, 3));
        assert_eq!(r.status, MemberStatus::Alive);
    }

    #[test]
    fn leave_intent_against_a_failed_member_moves_it_to_left() {
        let mut r = MemberRecord { status: MemberStatus::Alive, status_ltime: 5 };
        apply_authoritative_failed(&mut r, 10);
        assert!(apply_leave_intent(&mut r, 11));
        assert_eq!(r.status, MemberStatus::Left);
        assert_eq!(r.status_ltime, 11);
    }

    #[test]
    fn authoritative_failed_does_not_revert_a_graceful_left() {
        let mut r = MemberRecord { status: MemberStatus::Alive, status_ltime: 1 };
        apply_authoritative_left(&mut r, 2);
        assert!(!apply_authoritative_failed(&mut r, 3));
        assert_eq!(r.status, MemberStatus::Left);
    }

    #[test]
    fn leave_intent_rejected_once_already_leaving_at_same_or_newer_ltime() {
        let mut r = MemberRecord { status: MemberStatus::Alive, status_ltime: 1 };
        assert!(apply_leave_intent(&mut r, 5));
        assert!(!apply_leave_intent(&mut r, 5));
        assert!(!apply_leave_intent(&mut r, 3));
    }
}
