//! Delegate traits: the capability seams through which an embedding
//! application observes and participates in cluster events, using
//! `async-trait` the way the rest of this crate's async traits do.
//!
//! Two-phase init avoids a reference cycle: delegates are constructed
//! independently of the coordinator and only attached via
//! `ClusterCoordinator::set_delegate` after both exist, rather than the
//! coordinator being threaded into the delegate's own constructor.

use async_trait::async_trait;

use crate::common::Node;
use crate::event::UserEvent;

/// Application-supplied local metadata and membership-change notifications.
#[async_trait]
pub trait NodeDelegate: Send + Sync {
    /// Opaque bytes attached to this node's own `Alive` broadcasts and
    /// push/pull state. Must stay within the configured metadata size limit.
    fn node_meta(&self) -> Vec<u8> {
        Vec::new()
    }

    async fn notify_join(&self, _node: &Node) {}
    async fn notify_leave(&self, _node: &Node) {}
    async fn notify_update(&self, _node: &Node) {}
}

/// Receives deduplicated user events as they're delivered locally.
#[async_trait]
pub trait EventDelegate: Send + Sync {
    async fn notify_user_event(&self, event: UserEvent);
}

/// Answers incoming queries that aren't claimed by an internal handler.
#[async_trait]
pub trait QueryDelegate: Send + Sync {
    /// Return `Some(payload)` to answer with a computed response, or `None`
    /// to send a bare ack (or nothing, if the query didn't request one).
    async fn handle_query(&self, name: &str, payload: &[u8]) -> Option<Vec<u8>>;
}

/// Supplies and merges the opaque user-state blob piggybacked on push/pull
/// exchanges, giving the embedder a channel for its own anti-entropy data
/// independent of membership.
#[async_trait]
pub trait MergeDelegate: Send + Sync {
    fn local_state(&self, join: bool) -> Vec<u8>;
    async fn merge_remote_state(&self, buf: &[u8], join: bool);
}

/// Lets the embedder veto a conflicting simultaneous membership claim (two
/// nodes claiming the same name) before it's accepted.
#[async_trait]
pub trait ConflictDelegate: Send + Sync {
    async fn notify_conflict(&self, existing: &Node, other: &Node);
}

/// Vetoes or annotates an incoming `Alive` claim before it's applied, the
/// way Serf's `AliveDelegate` lets an application reject nodes that fail an
/// external admission check.
#[async_trait]
pub trait AliveDelegate: Send + Sync {
    async fn notify_alive(&self, node: &Node) -> Result<(), String>;
}

/// Observes raw probe round-trip outcomes, for applications that want
/// their own health metrics beyond the built-in awareness score.
#[async_trait]
pub trait PingDelegate: Send + Sync {
    fn ack_payload(&self) -> Vec<u8> {
        Vec::new()
    }
    async fn notify_ping_complete(&self, node: &Node, rtt: std::time::Duration, payload: &[u8]);
}

/// The full set of optional delegates a coordinator can be configured
/// with. Every field defaults to `None`; an embedder installs only the
/// hooks it needs.
#[derive(Default, Clone)]
pub struct Delegates {
    pub node: Option<std::sync::Arc<dyn NodeDelegate>>,
    pub event: Option<std::sync::Arc<dyn EventDelegate>>,
    pub query: Option<std::sync::Arc<dyn QueryDelegate>>,
    pub merge: Option<std::sync::Arc<dyn MergeDelegate>>,
    pub conflict: Option<std::sync::Arc<dyn ConflictDelegate>>,
    pub alive: Option<std::sync::Arc<dyn AliveDelegate>>,
    pub ping: Option<std::sync::Arc<dyn PingDelegate>>,
}
