// Once the failure detector declares a node Dead, neither a replayed join
// intent at or below that Lamport time nor a stale Suspect/Dead gossip
// message can revive it. Only a fresh join at a higher Lamport time (or a
// higher-incarnation Alive, at the state-store layer) succeeds.

use meshkeeper::common::{Node, NodeId};
use meshkeeper::member::{IntentResult, MemberManager, MemberStatus};
use meshkeeper::state::{Applied, Health, NodeStateStore};

#[test]
fn member_manager_rejects_replayed_join_after_authoritative_failure() {
    let mgr = MemberManager::new();
    let id = NodeId::new("flaky");

    let join_ltime = mgr.next_ltime();
    assert_eq!(mgr.apply_join(&id, join_ltime), IntentResult::Accepted);
    assert_eq!(mgr.mark_failed(&id), IntentResult::Accepted);
    assert_eq!(mgr.status(&id), MemberStatus::Failed);

    // A duplicate/delayed copy of the original join intent must not undo
    // the failure, even though it's for the same node.
    assert_eq!(mgr.apply_join(&id, join_ltime), IntentResult::Stale);
    assert_eq!(mgr.status(&id), MemberStatus::Failed);

    // A fresh join intent, stamped after the failure, is accepted (its
    // ltime advances) but cannot revive the member by itself: a JoinIntent
    // can only move a member out of Failed/Left through an authoritative
    // memberlist join, never through the Lamport-gated intent path.
    let rejoin_ltime = mgr.next_ltime();
    assert_eq!(mgr.apply_join(&id, rejoin_ltime), IntentResult::Accepted);
    assert_eq!(mgr.status(&id), MemberStatus::Failed);
}

#[test]
fn state_store_rejects_stale_suspect_and_dead_once_dead() {
    let store = NodeStateStore::new();
    let id = NodeId::new("flaky");
    store.apply_alive(Node::new(id.clone(), "127.0.0.1:7301".parse().unwrap()), 3, None);
    assert_eq!(store.apply_dead(&id, 3), Applied::Accepted);

    // A higher-incarnation Suspect or Dead arriving after the fact (e.g. a
    // reordered gossip retransmission) still can't move a Dead node.
    assert_eq!(store.apply_suspect(&id, 10, &NodeId::new("reporter")), Applied::Stale);
    assert_eq!(store.apply_dead(&id, 10), Applied::Stale);
    assert_eq!(store.get(&id).unwrap().health, Health::Dead);

    // Resurrection requires a strictly higher incarnation through Alive.
    assert_eq!(store.apply_alive(Node::new(id.clone(), "127.0.0.1:7301".parse().unwrap()), 4, None), Applied::Accepted);
    assert_eq!(store.get(&id).unwrap().health, Health::Alive);
}
