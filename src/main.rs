// Meshkeeper agent
//
// Standalone binary wrapping `ClusterCoordinator` with a UDP+TCP transport,
// reading its tunables from the environment and printing a startup banner
// before joining the cluster named by `MESHKEEPER_SEEDS`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use meshkeeper::{ClusterCoordinator, Config, Delegates, Result, VERSION};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).with_thread_ids(true).with_level(true).init();

    print_banner();

    let mut cfg = Config::default();
    cfg.node_name = std::env::var("MESHKEEPER_NODE_NAME").unwrap_or_else(|_| hostname_fallback());
    if let Ok(bind) = std::env::var("MESHKEEPER_BIND_ADDR") {
        cfg.bind_addr = bind.parse().map_err(|_| meshkeeper::AgentError::Config(format!("invalid MESHKEEPER_BIND_ADDR: {bind}")))?;
    }
    if let Ok(label) = std::env::var("MESHKEEPER_LABEL") {
        cfg.label = Some(label);
    }
    if let Ok(path) = std::env::var("MESHKEEPER_SNAPSHOT_PATH") {
        cfg.snapshot_path = Some(path);
    }
    cfg.validate()?;

    info!(node_name = %cfg.node_name, bind_addr = %cfg.bind_addr, "starting meshkeeper agent");
    info!(version = VERSION, "meshkeeper version");

    let transport = Arc::new(meshkeeper::transport::NetTransport::bind(cfg.bind_addr, cfg.advertise_addr).await?);
    let coordinator = Arc::new(ClusterCoordinator::create(cfg, transport, HashMap::new(), Delegates::default()).await?);

    let seeds: Vec<SocketAddr> = std::env::var("MESHKEEPER_SEEDS")
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();

    match coordinator.join(&seeds).await {
        Ok(n) => info!(seeds_contacted = n, "joined cluster"),
        Err(e) => {
            error!(error = %e, "failed to join cluster, running standalone");
        }
    }

    println!();
    println!("╭───────────────────────────────────────────╮");
    println!("│  meshkeeper agent is alive                 │");
    println!("│  node:    {:<34}│", coordinator.local_node().name.as_str());
    println!("│  addr:    {:<34}│", coordinator.local_node().addr);
    println!("╰───────────────────────────────────────────╯");
    println!();

    shutdown_signal().await;

    info!("shutting down");
    if let Err(e) = coordinator.leave().await {
        warn!(error = %e, "graceful leave failed");
    }
    coordinator.shutdown().await?;
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn hostname_fallback() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "meshkeeper-node".to_string())
}

fn print_banner() {
    println!("╔═══════════════════════════════════════════╗");
    println!("║  meshkeeper v{:<29}║", VERSION);
    println!("║  gossip membership & failure detection     ║");
    println!("╚═══════════════════════════════════════════╝");
    println!();
}
