// A coordinator configured with a snapshot path persists its join and leave
// through the write-ahead log, and a fresh recovery pass off the same file
// reconstructs the alive set, clock, and graceful-departure flag.

use std::collections::HashMap;
use std::sync::Arc;

use meshkeeper::transport::MockNetwork;
use meshkeeper::{ClusterCoordinator, Config, Delegates};

#[tokio::test]
async fn join_then_leave_round_trips_through_the_snapshot_log() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot_path = dir.path().join("meshkeeper.snapshot");

    let net = MockNetwork::new();
    let addr = "127.0.0.1:7401".parse().unwrap();
    let transport = Arc::new(net.transport(addr).await);

    let mut cfg = Config::default();
    cfg.node_name = "solo".to_string();
    cfg.bind_addr = addr;
    cfg.advertise_addr = Some(addr);
    cfg.snapshot_path = Some(snapshot_path.to_str().unwrap().to_string());
    cfg.broadcast_timeout = std::time::Duration::from_millis(10);

    let node = ClusterCoordinator::create(cfg, transport, HashMap::new(), Delegates::default()).await.unwrap();
    node.join(&[]).await.unwrap();

    let mid_recovery = meshkeeper::snapshot::recover(&snapshot_path).await.unwrap();
    assert!(mid_recovery.alive.contains(&meshkeeper::NodeId::new("solo")));
    assert!(!mid_recovery.left_gracefully);

    node.leave().await.unwrap();
    node.shutdown().await.unwrap();

    let final_recovery = meshkeeper::snapshot::recover(&snapshot_path).await.unwrap();
    assert!(final_recovery.left_gracefully);
}
