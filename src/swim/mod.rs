//! The SWIM failure-detection engine: probe cycle,
//! indirect probing, suspicion timers, and the Alive/Suspect/Dead
//! transition rules, wired to the wire codec and transport built in
//! earlier modules.

pub mod awareness;
pub mod handlers;
pub mod pushpull;
pub mod suspicion;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::sync::oneshot;

use crate::broadcast::TransmitLimitedQueue;
use crate::common::{Node, NodeId};
use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::proto::codec::{decode_message, encode_message};
use crate::proto::messages::{AckResp, IndirectPing, Message, NackResp, Ping};
use crate::security::SecurityManager;
use crate::state::{Health, NodeStateStore};
use crate::transport::Transport;

use awareness::Awareness;
use suspicion::SuspicionTimer;

/// Outcome of feeding a decoded packet through the engine: membership
/// messages are fully handled here; everything else is handed back to the
/// caller (the cluster coordinator) to route to the event/query managers.
pub enum Dispatch {
    Handled,
    Unhandled(Message),
}

struct PendingAck {
    tx: oneshot::Sender<Vec<u8>>,
}

/// Reference: SWIM paper (Das, Gupta, Motivala, 2002); suspicion timer
/// contraction follows the Lifeguard extensions (Armon et al., 2018).
pub struct SwimEngine {
    local: Mutex<Node>,
    incarnation: AtomicU64,
    seq: AtomicU32,
    store: Arc<NodeStateStore>,
    broadcasts: Arc<TransmitLimitedQueue>,
    awareness: Arc<Awareness>,
    transport: Arc<dyn Transport>,
    security: Arc<SecurityManager>,
    pending_acks: DashMap<u32, PendingAck>,
    suspicions: Arc<DashMap<NodeId, SuspicionTimer>>,
    probe_interval: Duration,
    probe_timeout: Duration,
    indirect_checks: usize,
    suspicion_mult: u32,
    suspicion_max_mult: u32,
}

impl SwimEngine {
    pub fn new(
        local: Node,
        cfg: &Config,
        store: Arc<NodeStateStore>,
        broadcasts: Arc<TransmitLimitedQueue>,
        transport: Arc<dyn Transport>,
        security: Arc<SecurityManager>,
    ) -> Self {
        Self {
            local: Mutex::new(local),
            incarnation: AtomicU64::new(0),
            seq: AtomicU32::new(0),
            store,
            broadcasts,
            awareness: Arc::new(Awareness::new(cfg.awareness_max_multiplier)),
            transport,
            security,
            pending_acks: DashMap::new(),
            suspicions: Arc::new(DashMap::new()),
            probe_interval: cfg.probe_interval,
            probe_timeout: cfg.probe_timeout,
            indirect_checks: cfg.indirect_checks,
            suspicion_mult: cfg.suspicion_mult,
            suspicion_max_mult: cfg.suspicion_max_mult,
        }
    }

    pub fn awareness(&self) -> Arc<Awareness> {
        self.awareness.clone()
    }

    fn local_snapshot(&self) -> Node {
        self.local.lock().clone()
    }

    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn bump_incarnation(&self) -> u64 {
        self.incarnation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn send(&self, msg: &Message, addr: SocketAddr) -> Result<()> {
        let body = encode_message(msg)?;
        let wire = self.security.encode_outgoing(&body)?;
        self.transport.send_packet(&wire, addr).await
    }

    /// Probe one randomly-selected member: direct ping, falling back to
    /// indirect probing through `indirect_checks` relays on timeout, and
    /// finally declaring the node Suspect if every path fails.
    pub async fn probe_random_member(&self) -> Result<()> {
        let candidates = self.store.order();
        let local_name = self.local_snapshot().name;
        let mut rng = rand::rng();
        let Some(target) = candidates.iter().filter(|n| **n != local_name).collect::<Vec<_>>().choose(&mut rng).copied().cloned() else {
            return Ok(());
        };
        self.probe(&target).await
    }

    pub async fn probe(&self, target: &NodeId) -> Result<()> {
        let Some(state) = self.store.get(target) else { return Ok(()) };
        if state.health == Health::Dead {
            return Ok(());
        }
        let addr = state.node.addr;
        let seq = self.next_seq();
        let local = self.local_snapshot();

        let (tx, rx) = oneshot::channel();
        self.pending_acks.insert(seq, PendingAck { tx });

        let ping = Message::Ping(Ping {
            seq_no: seq,
            node: target.as_str().to_owned(),
            source_node: None,
            source_addr: None,
            source_port: 0,
        });
        self.send(&ping, addr).await?;

        let direct_timeout = self.awareness.scale_timeout(self.probe_timeout);
        if tokio::time::timeout(direct_timeout, rx).await.is_ok() {
            self.pending_acks.remove(&seq);
            self.awareness.apply_delta(-1);
            return Ok(());
        }

        // Direct probe timed out: fan out indirect probes through k peers.
        let (tx2, rx2) = oneshot::channel();
        self.pending_acks.insert(seq, PendingAck { tx: tx2 });
        let relays: Vec<NodeId> = {
            let mut others: Vec<NodeId> = self
                .store
                .order()
                .into_iter()
                .filter(|n| n != target && n != &local.name)
                .collect();
            let mut rng = rand::rng();
            others.shuffle(&mut rng);
            others.into_iter().take(self.indirect_checks).collect()
        };

        for relay in &relays {
            if let Some(relay_state) = self.store.get(relay) {
                let indirect = Message::IndirectPing(IndirectPing {
                    seq_no: seq,
                    target_addr: addr.ip(),
                    target_port: addr.port(),
                    target_node: target.as_str().to_owned(),
                    nack: true,
                    source_node: local.name.as_str().to_owned(),
                    source_addr: local.addr.ip(),
                    source_port: local.addr.port(),
                });
                let _ = self.send(&indirect, relay_state.node.addr).await;
            }
        }

        let indirect_timeout = self.awareness.scale_timeout(self.probe_timeout);
        let acked = tokio::time::timeout(indirect_timeout, rx2).await.is_ok();
        self.pending_acks.remove(&seq);

        if acked {
            self.awareness.apply_delta(-1);
            return Ok(());
        }

        self.awareness.apply_delta(1);
        self.declare_suspect(target).await
    }

    async fn declare_suspect(&self, target: &NodeId) -> Result<()> {
        let Some(state) = self.store.get(target) else { return Ok(()) };
        let local = self.local_snapshot();
        let msg = crate::proto::messages::Suspect {
            incarnation: state.incarnation,
            node: target.as_str().to_owned(),
            from: local.name.as_str().to_owned(),
        };
        if let Some(broadcast) = handlers::handle_suspect(&self.store, &msg)? {
            self.broadcasts.enqueue(broadcast);
        }
        self.start_suspicion_timer(target.clone());
        self.sync_suspicion_confirmations(target);
        Ok(())
    }

    /// Per-suspect min/max timeout bounds: `minTimeout = suspicionMult *
    /// ceil(log10(N+1)) * probeInterval`, `maxTimeout = suspicionMaxMult *
    /// minTimeout`, where `N` is the current known cluster size.
    fn suspicion_bounds(&self) -> (Duration, Duration) {
        let n = self.store.len().max(1) as f64;
        let scale = (n + 1.0).log10().ceil().max(1.0);
        let min = self.probe_interval.mul_f64(self.suspicion_mult as f64 * scale);
        let max = min.mul_f64(self.suspicion_max_mult as f64);
        (min, max)
    }

    fn start_suspicion_timer(&self, target: NodeId) {
        if self.suspicions.contains_key(&target) {
            return;
        }
        let (min, max) = self.suspicion_bounds();
        let store = self.store.clone();
        let broadcasts = self.broadcasts.clone();
        let suspicions = self.suspicions.clone();
        let name = target.clone();
        let timer = SuspicionTimer::spawn(min, max, self.indirect_checks, move || {
            if let Some(state) = store.get(&name) {
                if state.health == Health::Suspect {
                    let msg = crate::proto::messages::Dead { incarnation: state.incarnation, node: name.as_str().to_owned(), from: name.as_str().to_owned() };
                    if let Ok(Some(b)) = handlers::handle_dead(&store, &msg) {
                        broadcasts.enqueue(b);
                    }
                }
            }
            suspicions.remove(&name);
        });
        self.suspicions.insert(target, timer);
    }

    /// Feed the store's current distinct-confirming-peer count for `target`
    /// into its live suspicion timer, contracting the remaining wait. A
    /// no-op if `target` isn't currently Suspect or has no running timer.
    fn sync_suspicion_confirmations(&self, target: &NodeId) {
        let Some(state) = self.store.get(target) else { return };
        if state.health != Health::Suspect {
            return;
        }
        if let Some(timer) = self.suspicions.get(target) {
            timer.confirm(state.confirmations.len());
        }
    }

    /// Decode and dispatch one inbound packet. Membership messages are
    /// fully handled; others are returned for the caller to route.
    pub async fn handle_packet(&self, wire: &[u8], from: SocketAddr) -> Result<Dispatch> {
        let plain = match self.security.decode_incoming(wire) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(%from, error = %e, "dropping packet that failed authentication");
                return Ok(Dispatch::Handled);
            }
        };
        let msg = decode_message(&plain)?;
        self.dispatch(msg, from).await
    }

    fn dispatch<'a>(&'a self, msg: Message, from: SocketAddr) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Dispatch>> + Send + 'a>> {
        Box::pin(async move {
        match msg {
            Message::Ping(p) => {
                let ack = Message::AckResp(AckResp { seq_no: p.seq_no, payload: vec![] });
                self.send(&ack, from).await?;
                Ok(Dispatch::Handled)
            }
            Message::IndirectPing(ip) => {
                let target_addr: SocketAddr = (ip.target_addr, ip.target_port).into();
                let seq = self.next_seq();
                let (tx, rx) = oneshot::channel();
                self.pending_acks.insert(seq, PendingAck { tx });
                let inner = Message::Ping(Ping { seq_no: seq, node: ip.target_node.clone(), source_node: None, source_addr: None, source_port: 0 });
                self.send(&inner, target_addr).await?;
                let ok = tokio::time::timeout(self.probe_timeout, rx).await.is_ok();
                self.pending_acks.remove(&seq);
                let source_addr: SocketAddr = (ip.source_addr, ip.source_port).into();
                if ok {
                    let ack = Message::AckResp(AckResp { seq_no: ip.seq_no, payload: vec![] });
                    self.send(&ack, source_addr).await?;
                } else if ip.nack {
                    let nack = Message::NackResp(NackResp { seq_no: ip.seq_no });
                    self.send(&nack, source_addr).await?;
                }
                Ok(Dispatch::Handled)
            }
            Message::AckResp(ack) => {
                if let Some((_, pending)) = self.pending_acks.remove(&ack.seq_no) {
                    let _ = pending.tx.send(ack.payload);
                }
                Ok(Dispatch::Handled)
            }
            Message::NackResp(_) => Ok(Dispatch::Handled),
            Message::Suspect(s) => {
                let local = self.local_snapshot();
                if s.node == local.name.as_str() {
                    let next = self.bump_incarnation();
                    let refutation = handlers::refute_suspicion(&local, next);
                    if let Some(b) = handlers::handle_alive(&self.store, match &refutation {
                        Message::Alive(a) => a,
                        _ => unreachable!(),
                    })? {
                        self.broadcasts.enqueue(b);
                    }
                } else {
                    let target = NodeId::new(s.node.clone());
                    if let Some(b) = handlers::handle_suspect(&self.store, &s)? {
                        self.broadcasts.enqueue(b);
                        self.start_suspicion_timer(target.clone());
                    }
                    // Whether this is the suspicion's first acceptance or a
                    // repeated confirmation from another peer, the store's
                    // confirming-peer set may have grown; feed it into the
                    // running timer either way.
                    self.sync_suspicion_confirmations(&target);
                }
                Ok(Dispatch::Handled)
            }
            Message::Alive(a) => {
                if let Some(b) = handlers::handle_alive(&self.store, &a)? {
                    self.broadcasts.enqueue(b);
                }
                Ok(Dispatch::Handled)
            }
            Message::Dead(d) => {
                if let Some(b) = handlers::handle_dead(&self.store, &d)? {
                    self.broadcasts.enqueue(b);
                }
                Ok(Dispatch::Handled)
            }
            Message::Compound(c) => {
                for part in c.messages {
                    let inner = decode_message(&part)?;
                    self.dispatch(inner, from).await?;
                }
                Ok(Dispatch::Handled)
            }
            other @ (Message::PushPull(_)
            | Message::User(_)
            | Message::Err(_)
            | Message::Query(_)
            | Message::QueryResponse(_)) => Ok(Dispatch::Unhandled(other)),
        }
        })
    }

    /// Append up to `max_bytes` of pending gossip onto a just-sent packet,
    /// as a `Compound` message if there's more than one.
    pub fn piggyback(&self, max_bytes: usize) -> Option<Message> {
        let n_nodes = self.store.len().max(1);
        let parts = self.broadcasts.get_broadcasts(3, max_bytes, n_nodes);
        match parts.len() {
            0 => None,
            1 => decode_message(&parts[0]).ok(),
            _ => Some(Message::Compound(crate::proto::messages::Compound { messages: parts })),
        }
    }
}
