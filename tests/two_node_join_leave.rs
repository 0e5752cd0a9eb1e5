// Two nodes join over the mock transport, see each other in their member
// views, and a graceful leave is reflected without tearing down the peer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use meshkeeper::transport::MockNetwork;
use meshkeeper::{ClusterCoordinator, Config, Delegates, Phase};

async fn node(name: &str, port: u16, net: &MockNetwork) -> ClusterCoordinator {
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let transport = Arc::new(net.transport(addr).await);
    let mut cfg = Config::default();
    cfg.node_name = name.to_string();
    cfg.bind_addr = addr;
    cfg.advertise_addr = Some(addr);
    ClusterCoordinator::create(cfg, transport, HashMap::new(), Delegates::default()).await.unwrap()
}

#[tokio::test]
async fn two_nodes_join_and_one_leaves_gracefully() {
    let net = MockNetwork::new();
    let a = node("a", 7101, &net).await;
    let b = node("b", 7102, &net).await;

    a.join(&[]).await.unwrap();
    let joined = b.join(&[a.local_node().addr]).await.unwrap();
    assert_eq!(joined, 1);

    assert_eq!(a.phase(), Phase::Alive);
    assert_eq!(b.phase(), Phase::Alive);
    assert_eq!(b.members().len(), 2);
    assert_eq!(a.members().len(), 2);

    b.leave().await.unwrap();
    assert_eq!(b.phase(), Phase::Left);

    // The peer that stayed up is unaffected by the other's graceful leave.
    assert_eq!(a.phase(), Phase::Alive);

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}
