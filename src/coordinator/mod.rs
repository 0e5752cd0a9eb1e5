//! Cluster coordinator: the top-level façade that
//! wires transport, security, the SWIM engine, member/event/query
//! managers, the snapshotter, and the key manager into one lifecycle with
//! idempotent shutdown. Phased bootstrap: construct, start background
//! tasks, accept connections, tear down once.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::task::JoinHandle;

use crate::broadcast::{Broadcast, TransmitLimitedQueue};
use crate::clock::LamportClock;
use crate::common::{Node, NodeId};
use crate::compat::check_peer_compatible;
use crate::config::Config;
use crate::delegate::Delegates;
use crate::error::{AgentError, Result};
use crate::event::EventManager;
use crate::keymanager::{apply_locally, KeyManager, KeyQueryOutcome, QUERY_INSTALL_KEY, QUERY_LIST_KEYS, QUERY_REMOVE_KEY, QUERY_USE_KEY};
use crate::member::MemberManager;
use crate::proto::codec::encode_message;
use crate::proto::messages::{Message, QueryMsg};
use crate::query::{Filter, QueryHandle, QueryManager, INTERNAL_QUERY_PREFIX};
use crate::security::SecurityManager;
use crate::snapshot::{Record, Snapshotter};
use crate::state::NodeStateStore;
use crate::swim::{Dispatch, SwimEngine};
use crate::transport::Transport;

/// The coordinator's lifecycle phase: Create → Join → Alive → Leave →
/// Leaving → Left → Shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Create = 0,
    Joining = 1,
    Alive = 2,
    Leaving = 3,
    Left = 4,
    Shutdown = 5,
}

impl Phase {
    fn from_u8(v: u8) -> Phase {
        match v {
            0 => Phase::Create,
            1 => Phase::Joining,
            2 => Phase::Alive,
            3 => Phase::Leaving,
            4 => Phase::Left,
            _ => Phase::Shutdown,
        }
    }
}

fn encode_key_outcome(outcome: KeyQueryOutcome) -> Vec<u8> {
    match outcome {
        KeyQueryOutcome::Ok => b"ok".to_vec(),
        KeyQueryOutcome::Err(e) => format!("err:{e}").into_bytes(),
    }
}

/// Bundles the Arc-cloneable state needed to route a message the SWIM
/// engine didn't claim (`User`/`Query`/`QueryResponse`) to the right
/// manager. Cloned into every background task so routing doesn't need a
/// reference back to the coordinator itself.
#[derive(Clone)]
struct Router {
    events: Arc<EventManager>,
    queries: Arc<QueryManager>,
    security: Arc<SecurityManager>,
    delegates: Delegates,
    tags: Arc<HashMap<String, String>>,
    local_name: NodeId,
}

impl Router {
    async fn handle_internal_query(&self, q: &QueryMsg) -> Option<Vec<u8>> {
        match q.name.as_str() {
            QUERY_INSTALL_KEY => Some(encode_key_outcome(apply_locally(&self.security, "install", &q.payload))),
            QUERY_USE_KEY => Some(encode_key_outcome(apply_locally(&self.security, "use", &q.payload))),
            QUERY_REMOVE_KEY => Some(encode_key_outcome(apply_locally(&self.security, "remove", &q.payload))),
            QUERY_LIST_KEYS => {
                let keys = self.security.keyring.snapshot();
                Some(keys.into_iter().flat_map(|k| k.as_bytes().to_vec()).collect())
            }
            _ => None,
        }
    }

    async fn route(&self, msg: Message) -> Result<()> {
        match msg {
            Message::User(u) => {
                if let Some(event) = self.events.receive(u)? {
                    if let Some(delegate) = &self.delegates.event {
                        delegate.notify_user_event(event).await;
                    }
                }
            }
            Message::Query(q) => {
                let precomputed = if q.name.starts_with(INTERNAL_QUERY_PREFIX) {
                    self.handle_internal_query(&q).await
                } else if let Some(delegate) = &self.delegates.query {
                    delegate.handle_query(&q.name, &q.payload).await
                } else {
                    None
                };
                self.queries.handle_query(&self.local_name, &self.tags, q, move |_msg| precomputed).await?;
            }
            Message::QueryResponse(r) => self.queries.handle_response(r),
            _ => {}
        }
        Ok(())
    }
}

/// A one-shot, non-invalidating broadcast carrying an encoded `Query`
/// message, the way `EventManager`'s `EventBroadcast` carries `User`
/// messages onto the gossip queue.
struct QueryBroadcast {
    encoded: Vec<u8>,
}

impl Broadcast for QueryBroadcast {
    fn invalidates(&self, _other: &dyn Broadcast) -> bool {
        false
    }
    fn message(&self) -> &[u8] {
        &self.encoded
    }
    fn name(&self) -> &str {
        "query"
    }
}

pub struct ClusterCoordinator {
    local: Node,
    cfg: Arc<Config>,
    phase: AtomicU8,
    transport: Arc<dyn Transport>,
    security: Arc<SecurityManager>,
    store: Arc<NodeStateStore>,
    broadcasts: Arc<TransmitLimitedQueue>,
    swim: Arc<SwimEngine>,
    members: Arc<MemberManager>,
    events: Arc<EventManager>,
    queries: Arc<QueryManager>,
    keys: Arc<KeyManager>,
    snapshotter: Option<Arc<Snapshotter>>,
    router: Router,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterCoordinator {
    /// Phase: Create. Construct every subsystem but start nothing yet.
    pub async fn create(cfg: Config, transport: Arc<dyn Transport>, tags: HashMap<String, String>, delegates: Delegates) -> Result<Self> {
        cfg.validate()?;
        let local_meta = delegates.node.as_ref().map(|d| d.node_meta()).unwrap_or_default();
        let local = Node { name: NodeId::new(cfg.node_name.clone()), addr: cfg.advertise_addr(), meta: local_meta, vsn: Default::default() };
        local.validate()?;

        let cfg = Arc::new(cfg);
        let store = Arc::new(NodeStateStore::new());
        store.insert_new(local.clone());

        let broadcasts = Arc::new(TransmitLimitedQueue::new(cfg.retransmit_mult as usize));
        let keyring = crate::security::Keyring::new(None);
        let security = Arc::new(SecurityManager::new(
            keyring,
            cfg.label.clone(),
            cfg.encrypt_outgoing,
            cfg.require_incoming_encryption,
            cfg.stealth_udp,
        ));
        let swim = Arc::new(SwimEngine::new(local.clone(), &cfg, store.clone(), broadcasts.clone(), transport.clone(), security.clone()));
        let members = Arc::new(MemberManager::new());
        let events = Arc::new(EventManager::new(cfg.event_buffer_size, broadcasts.clone()));
        let queries = Arc::new(QueryManager::new(transport.clone(), security.clone(), cfg.query_buffer_size));
        let keys = Arc::new(KeyManager::new(security.clone(), queries.clone()));

        let snapshotter = match &cfg.snapshot_path {
            Some(path) => Some(Arc::new(Snapshotter::open(path.clone(), 256, cfg.snapshot_compact_threshold_bytes).await?)),
            None => None,
        };

        let router = Router {
            events: events.clone(),
            queries: queries.clone(),
            security: security.clone(),
            delegates,
            tags: Arc::new(tags),
            local_name: local.name.clone(),
        };

        Ok(Self {
            local,
            cfg,
            phase: AtomicU8::new(Phase::Create as u8),
            transport,
            security,
            store,
            broadcasts,
            swim,
            members,
            events,
            queries,
            keys,
            snapshotter,
            router,
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    pub fn local_node(&self) -> &Node {
        &self.local
    }

    pub fn members(&self) -> Vec<crate::state::NodeState> {
        self.store.snapshot()
    }

    pub fn member_clock(&self) -> &LamportClock {
        self.members.clock()
    }

    /// Phase: Joining → Alive. Exchange push/pull state with `seeds` until
    /// one succeeds, then start the background probe/gossip/anti-entropy
    /// loops. A join with an empty seed list just starts a single-node
    /// cluster.
    pub async fn join(&self, seeds: &[SocketAddr]) -> Result<usize> {
        self.set_phase(Phase::Joining);
        let mut joined = 0;
        for &seed in seeds {
            if let Err(e) = self.join_one(seed).await {
                tracing::warn!(%seed, error = %e, "join attempt failed");
                continue;
            }
            joined += 1;
        }
        if seeds.is_empty() || joined > 0 {
            self.set_phase(Phase::Alive);
            self.start_background_tasks();
            let ltime = self.members.next_ltime();
            self.members.apply_join(&self.local.name, ltime);
            if let Some(s) = &self.snapshotter {
                s.append(Record::Alive { node: self.local.name.as_str().to_owned() }).await?;
                s.append(Record::Clock { ltime }).await?;
            }
            Ok(joined)
        } else {
            Err(AgentError::InvalidState("failed to contact any seed during join".into()))
        }
    }

    async fn join_one(&self, seed: SocketAddr) -> Result<()> {
        let user_state = self.router.delegates.merge.as_ref().map(|m| m.local_state(true)).unwrap_or_default();
        let remote_user_state =
            crate::swim::pushpull::exchange(self.transport.as_ref(), seed, &self.store, user_state, true, self.cfg.push_pull_interval).await?;
        if let Some(merge) = &self.router.delegates.merge {
            merge.merge_remote_state(&remote_user_state, true).await;
        }
        for state in self.store.snapshot() {
            if let Err(e) = check_peer_compatible(&self.local.vsn, &state.node.vsn) {
                tracing::warn!(node = %state.node.name, error = %e, "peer reported an incompatible protocol version");
            }
        }
        Ok(())
    }

    fn start_background_tasks(&self) {
        let mut tasks = Vec::new();

        {
            let swim = self.swim.clone();
            let interval = self.cfg.probe_interval;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    if let Err(e) = swim.probe_random_member().await {
                        tracing::debug!(error = %e, "probe cycle failed");
                    }
                }
            }));
        }

        {
            let swim = self.swim.clone();
            let transport = self.transport.clone();
            let router = self.router.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    let pkt = match transport.recv_packet().await {
                        Ok(p) => p,
                        Err(_) => break,
                    };
                    match swim.handle_packet(&pkt.buf, pkt.from).await {
                        Ok(Dispatch::Unhandled(msg)) => {
                            if let Err(e) = router.route(msg).await {
                                tracing::debug!(error = %e, "failed to route message");
                            }
                        }
                        Ok(Dispatch::Handled) => {}
                        Err(e) => tracing::debug!(error = %e, "failed to handle inbound packet"),
                    }
                }
            }));
        }

        {
            let swim = self.swim.clone();
            let transport = self.transport.clone();
            let security = self.security.clone();
            let store = self.store.clone();
            let interval = self.cfg.gossip_interval;
            let gossip_nodes = self.cfg.gossip_nodes;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let Some(msg) = swim.piggyback(1400) else { continue };
                    let Ok(body) = encode_message(&msg) else { continue };
                    let Ok(wire) = security.encode_outgoing(&body) else { continue };
                    let mut targets = store.order();
                    targets.shuffle(&mut rand::rng());
                    for name in targets.into_iter().take(gossip_nodes) {
                        if let Some(state) = store.get(&name) {
                            let _ = transport.send_packet(&wire, state.node.addr).await;
                        }
                    }
                }
            }));
        }

        {
            let transport = self.transport.clone();
            let store = self.store.clone();
            let router = self.router.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    let incoming = match transport.accept_stream().await {
                        Ok(i) => i,
                        Err(_) => break,
                    };
                    let store = store.clone();
                    let router = router.clone();
                    tokio::spawn(async move {
                        let mut stream = incoming.stream;
                        let user_state = router.delegates.merge.as_ref().map(|m| m.local_state(false)).unwrap_or_default();
                        match crate::swim::pushpull::handle_incoming(stream.as_mut(), &store, user_state).await {
                            Ok(remote_user_state) => {
                                if let Some(merge) = &router.delegates.merge {
                                    merge.merge_remote_state(&remote_user_state, false).await;
                                }
                            }
                            Err(e) => tracing::debug!(error = %e, peer = %incoming.peer, "push/pull accept failed"),
                        }
                    });
                }
            }));
        }

        {
            let transport = self.transport.clone();
            let store = self.store.clone();
            let router = self.router.clone();
            let local_name = self.local.name.clone();
            let interval = self.cfg.push_pull_interval;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let mut candidates: Vec<_> = store.order().into_iter().filter(|n| n != &local_name).collect();
                    candidates.shuffle(&mut rand::rng());
                    let Some(target) = candidates.into_iter().next() else { continue };
                    let Some(state) = store.get(&target) else { continue };
                    let user_state = router.delegates.merge.as_ref().map(|m| m.local_state(false)).unwrap_or_default();
                    match crate::swim::pushpull::exchange(transport.as_ref(), state.node.addr, &store, user_state, false, Duration::from_secs(10)).await
                    {
                        Ok(remote_user_state) => {
                            if let Some(merge) = &router.delegates.merge {
                                merge.merge_remote_state(&remote_user_state, false).await;
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, "periodic anti-entropy exchange failed"),
                    }
                }
            }));
        }

        self.tasks.lock().extend(tasks);
    }

    /// Route a message the SWIM engine didn't claim (User/Query/QueryResponse)
    /// to the appropriate manager. The recv loop started by `join` already
    /// does this for inbound UDP traffic; this is exposed for an embedder
    /// driving its own transport loop instead.
    pub async fn route_unhandled(&self, msg: Message) -> Result<()> {
        self.router.route(msg).await
    }

    /// Issue a user event, enqueuing it for gossip.
    pub fn user_event(&self, name: String, payload: Vec<u8>, coalesce: bool) -> Result<()> {
        self.events.issue(name, payload, coalesce).map(|_| ())
    }

    /// Issue a query, gossiping it onto the broadcast queue for dissemination.
    pub async fn query(&self, name: String, payload: Vec<u8>, filters: Vec<Filter>, relay_factor: u8) -> QueryHandle {
        let (msg, handle) = self.queries.issue(&self.local.name, self.local.addr, name, payload, filters, relay_factor, 64);
        if let Ok(body) = encode_message(&msg) {
            self.broadcasts.enqueue(Box::new(QueryBroadcast { encoded: body }));
        }
        handle
    }

    pub fn key_manager(&self) -> &KeyManager {
        &self.keys
    }

    /// Install a key on this node and fan it out to the rest of the cluster
    /// via the reserved `_meshkeeper_install-key` query.
    pub async fn install_key(&self, key_bytes: Vec<u8>) -> QueryHandle {
        self.keys.apply_local("install", &key_bytes);
        self.query(QUERY_INSTALL_KEY.to_string(), key_bytes, vec![], 0).await
    }

    pub async fn use_key(&self, key_bytes: Vec<u8>) -> QueryHandle {
        self.keys.apply_local("use", &key_bytes);
        self.query(QUERY_USE_KEY.to_string(), key_bytes, vec![], 0).await
    }

    pub async fn remove_key(&self, key_bytes: Vec<u8>) -> QueryHandle {
        self.keys.apply_local("remove", &key_bytes);
        self.query(QUERY_REMOVE_KEY.to_string(), key_bytes, vec![], 0).await
    }

    pub async fn list_keys(&self) -> QueryHandle {
        self.query(QUERY_LIST_KEYS.to_string(), vec![], vec![], 0).await
    }

    /// Phase: Alive → Leaving → Left. Broadcasts a leave intent, gives it
    /// `broadcast_timeout` to propagate, then marks the local node Left.
    pub async fn leave(&self) -> Result<()> {
        if self.phase() != Phase::Alive {
            return Ok(());
        }
        self.set_phase(Phase::Leaving);
        let ltime = self.members.next_ltime();
        self.members.apply_leave(&self.local.name, ltime);
        tokio::time::sleep(self.cfg.broadcast_timeout).await;
        self.members.mark_left(&self.local.name);
        if let Some(s) = &self.snapshotter {
            s.append(Record::Leave).await?;
        }
        self.set_phase(Phase::Left);
        Ok(())
    }

    /// Idempotent teardown: safe to call more than once, from more than one
    /// caller.
    pub async fn shutdown(&self) -> Result<()> {
        if self.phase() == Phase::Shutdown {
            return Ok(());
        }
        self.set_phase(Phase::Shutdown);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.transport.shutdown().await;
        self.broadcasts.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockNetwork;

    async fn coordinator(name: &str, port: u16, net: &MockNetwork) -> ClusterCoordinator {
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let transport = Arc::new(net.transport(addr).await);
        let mut cfg = Config::default();
        cfg.node_name = name.to_string();
        cfg.bind_addr = addr;
        cfg.advertise_addr = Some(addr);
        ClusterCoordinator::create(cfg, transport, HashMap::new(), Delegates::default()).await.unwrap()
    }

    #[tokio::test]
    async fn single_node_join_with_no_seeds_reaches_alive() {
        let net = MockNetwork::new();
        let coord = coordinator("solo", 6001, &net).await;
        coord.join(&[]).await.unwrap();
        assert_eq!(coord.phase(), Phase::Alive);
        coord.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let net = MockNetwork::new();
        let coord = coordinator("solo2", 6002, &net).await;
        coord.join(&[]).await.unwrap();
        coord.shutdown().await.unwrap();
        coord.shutdown().await.unwrap();
        assert_eq!(coord.phase(), Phase::Shutdown);
    }

    #[tokio::test]
    async fn leave_transitions_through_leaving_to_left() {
        let net = MockNetwork::new();
        let coord = coordinator("solo3", 6003, &net).await;
        coord.join(&[]).await.unwrap();
        coord.leave().await.unwrap();
        assert_eq!(coord.phase(), Phase::Left);
        coord.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn two_nodes_join_and_see_each_other() {
        let net = MockNetwork::new();
        let a = coordinator("a", 6010, &net).await;
        let b = coordinator("b", 6011, &net).await;
        a.join(&[]).await.unwrap();
        b.join(&[a.local_node().addr]).await.unwrap();
        assert_eq!(b.members().len(), 2);
        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }
}
