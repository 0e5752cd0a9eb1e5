// An issued user event reaches the remote delegate exactly once, no matter
// how many times the underlying broadcast gets gossiped around before its
// retransmit budget is spent.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use meshkeeper::delegate::EventDelegate;
use meshkeeper::event::UserEvent;
use meshkeeper::transport::MockNetwork;
use meshkeeper::{ClusterCoordinator, Config, Delegates};

#[derive(Default)]
struct Capture {
    events: Mutex<Vec<UserEvent>>,
}

#[async_trait]
impl EventDelegate for Capture {
    async fn notify_user_event(&self, event: UserEvent) {
        self.events.lock().unwrap().push(event);
    }
}

async fn node(name: &str, port: u16, net: &MockNetwork, delegates: Delegates) -> ClusterCoordinator {
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let transport = Arc::new(net.transport(addr).await);
    let mut cfg = Config::default();
    cfg.node_name = name.to_string();
    cfg.bind_addr = addr;
    cfg.advertise_addr = Some(addr);
    cfg.gossip_interval = std::time::Duration::from_millis(20);
    ClusterCoordinator::create(cfg, transport, HashMap::new(), delegates).await.unwrap()
}

#[tokio::test]
async fn user_event_is_delivered_exactly_once() {
    let net = MockNetwork::new();
    let capture = Arc::new(Capture::default());
    let a = node("a", 7501, &net, Delegates::default()).await;
    let b = node(
        "b",
        7502,
        &net,
        Delegates { event: Some(capture.clone()), ..Delegates::default() },
    )
    .await;

    a.join(&[]).await.unwrap();
    b.join(&[a.local_node().addr]).await.unwrap();

    a.user_event("deploy".to_string(), b"v42".to_vec(), false).unwrap();

    // Give several gossip ticks to run so the broadcast is retransmitted
    // more than once before its limit is spent.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let received = capture.events.lock().unwrap();
    assert_eq!(received.len(), 1, "event must be delivered exactly once despite retransmission");
    assert_eq!(received[0].name, "deploy");
    assert_eq!(received[0].payload, b"v42");

    drop(received);
    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}
