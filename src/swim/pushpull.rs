//! TCP anti-entropy exchange: periodically, and on
//! first join, a node dials a random peer and trades full membership
//! snapshots so partitioned state heals even if gossip missed it. Reuses
//! the framed-stream `read_frame`/`write_frame` helpers.

use std::net::SocketAddr;
use std::time::Duration;

use crate::common::{Node, ProtocolVersion};
use crate::error::Result;
use crate::proto::codec::{decode_message, encode_message};
use crate::proto::messages::{Message, PushNodeState, PushPullState};
use crate::state::{Health, NodeStateStore};
use crate::transport::net::{read_frame, write_frame};
use crate::transport::Transport;

fn health_to_byte(h: Health) -> u8 {
    h as u8
}

fn byte_to_health(b: u8) -> Health {
    match b {
        0 => Health::Alive,
        1 => Health::Suspect,
        _ => Health::Dead,
    }
}

/// Build the local push/pull payload from the current membership view.
pub fn build_local_state(store: &NodeStateStore, user_state: Vec<u8>, join: bool) -> PushPullState {
    let nodes = store
        .snapshot()
        .into_iter()
        .map(|n| PushNodeState {
            name: n.node.name.as_str().to_owned(),
            addr: n.node.addr.ip(),
            port: n.node.addr.port(),
            meta: n.node.meta,
            incarnation: n.incarnation,
            state: health_to_byte(n.health),
            vsn: n.node.vsn.into(),
        })
        .collect();
    PushPullState { nodes, user_state, join }
}

/// Merge a remote push/pull payload into the local store, applying each
/// node through the ordinary Alive/Suspect/Dead acceptance rules so a
/// stale remote view can never regress local knowledge.
pub fn merge_remote_state(store: &NodeStateStore, remote: &PushPullState) {
    for n in &remote.nodes {
        let addr: SocketAddr = (n.addr, n.port).into();
        let id = crate::common::NodeId::new(n.name.clone());
        let mut node = Node::new(id.clone(), addr);
        node.meta = n.meta.clone();
        node.vsn = ProtocolVersion::from(n.vsn);

        match byte_to_health(n.state) {
            Health::Alive => {
                store.apply_alive(node, n.incarnation, Some(addr));
            }
            Health::Suspect => {
                if !store.contains(&id) {
                    store.apply_alive(node, n.incarnation, Some(addr));
                }
                store.apply_suspect(&id, n.incarnation, &id);
            }
            Health::Dead => {
                if !store.contains(&id) {
                    store.apply_alive(node, n.incarnation, Some(addr));
                }
                store.apply_dead(&id, n.incarnation);
            }
        }
    }
}

/// Dial `addr`, exchange push/pull state, and merge the remote view into
/// `store`. Returns the remote's user state payload for the caller to pass
/// to a merge delegate.
pub async fn exchange(
    transport: &dyn Transport,
    addr: SocketAddr,
    store: &NodeStateStore,
    local_user_state: Vec<u8>,
    join: bool,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut stream = transport.dial_stream(addr, timeout).await?;
    let local = build_local_state(store, local_user_state, join);
    let body = encode_message(&Message::PushPull(local))?;
    write_frame(stream.as_mut(), &body).await?;

    let reply = tokio::time::timeout(timeout, read_frame(stream.as_mut()))
        .await
        .map_err(|_| crate::error::AgentError::Timeout(format!("push/pull with {addr} timed out")))??;
    let remote = match decode_message(&reply)? {
        Message::PushPull(state) => state,
        other => {
            return Err(crate::error::AgentError::Codec(format!(
                "expected PushPull reply, got {:?}",
                other.kind()
            )))
        }
    };
    merge_remote_state(store, &remote);
    Ok(remote.user_state)
}

/// Server-side half of the exchange: read the peer's state, merge it, and
/// write back our own.
pub async fn handle_incoming(
    stream: &mut dyn crate::transport::Stream,
    store: &NodeStateStore,
    local_user_state: Vec<u8>,
) -> Result<Vec<u8>> {
    let body = read_frame(stream).await?;
    let remote = match decode_message(&body)? {
        Message::PushPull(state) => state,
        other => {
            return Err(crate::error::AgentError::Codec(format!(
                "expected PushPull request, got {:?}",
                other.kind()
            )))
        }
    };
    merge_remote_state(store, &remote);

    let local = build_local_state(store, local_user_state, false);
    let reply = encode_message(&Message::PushPull(local))?;
    write_frame(stream, &reply).await?;
    Ok(remote.user_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn node(name: &str, port: u16) -> Node {
        Node::new(name, format!("127.0.0.1:{port}").parse::<SocketAddr>().unwrap())
    }

    #[test]
    fn merge_accepts_newer_remote_incarnation() {
        let store = NodeStateStore::new();
        store.apply_alive(node("a", 1), 1, None);
        let remote = PushPullState {
            nodes: vec![PushNodeState {
                name: "a".into(),
                addr: "127.0.0.1".parse().unwrap(),
                port: 1,
                meta: vec![],
                incarnation: 5,
                state: 0,
                vsn: ProtocolVersion::default().into(),
            }],
            user_state: vec![],
            join: false,
        };
        merge_remote_state(&store, &remote);
        assert_eq!(store.get(&crate::common::NodeId::new("a")).unwrap().incarnation, 5);
    }

    #[test]
    fn merge_ignores_stale_remote_incarnation() {
        let store = NodeStateStore::new();
        store.apply_alive(node("a", 1), 9, None);
        let remote = PushPullState {
            nodes: vec![PushNodeState {
                name: "a".into(),
                addr: "127.0.0.1".parse().unwrap(),
                port: 1,
                meta: vec![],
                incarnation: 2,
                state: 0,
                vsn: ProtocolVersion::default().into(),
            }],
            user_state: vec![],
            join: false,
        };
        merge_remote_state(&store, &remote);
        assert_eq!(store.get(&crate::common::NodeId::new("a")).unwrap().incarnation, 9);
    }
}
