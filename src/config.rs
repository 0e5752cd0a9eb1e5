//! Explicit configuration struct threaded through every component, with no
//! hidden singletons. Loading this from a file on disk is out of scope;
//! this struct and its validation at construction time are in scope.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{AgentError, Result};

/// All cluster tunables, defaulted to cadences appropriate for a LAN.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local node name. Must be non-empty and ≤ 128 bytes.
    pub node_name: String,
    /// Address to bind the UDP and TCP listeners on.
    pub bind_addr: SocketAddr,
    /// Address advertised to peers, if different from `bind_addr` (e.g. NAT).
    pub advertise_addr: Option<SocketAddr>,

    /// Probe cadence.
    pub probe_interval: Duration,
    /// Base probe ack timeout, before awareness scaling.
    pub probe_timeout: Duration,
    /// Number of peers used for indirect probing.
    pub indirect_checks: usize,
    /// Whether to attempt a TCP fallback ping after UDP probes fail.
    pub enable_tcp_fallback: bool,

    /// Suspicion timeout multiplier (minTimeout factor).
    pub suspicion_mult: u32,
    /// Suspicion max-timeout multiplier relative to min timeout.
    pub suspicion_max_mult: u32,

    /// Retransmit count multiplier for the broadcast queue.
    pub retransmit_mult: u32,

    /// Push/pull anti-entropy cadence (scaled by ⌈log2(N+1)⌉ at runtime).
    pub push_pull_interval: Duration,
    /// Gossip cadence.
    pub gossip_interval: Duration,
    /// Number of random peers gossiped to per tick.
    pub gossip_nodes: usize,

    /// Interval between reap sweeps.
    pub reap_interval: Duration,
    /// How long a Left/Failed member is retained before being reaped.
    pub tombstone_timeout: Duration,

    /// Local health score cap.
    pub awareness_max_multiplier: u8,

    /// Optional cluster label, fed as AEAD associated data.
    pub label: Option<String>,
    /// Require outbound packets to be encrypted if a keyring is set.
    pub encrypt_outgoing: bool,
    /// Require inbound packets to be encrypted (reject plaintext).
    pub require_incoming_encryption: bool,
    /// Suppress any response to packets that fail authentication.
    pub stealth_udp: bool,

    /// Path to the snapshot log file, if auto-rejoin is enabled.
    pub snapshot_path: Option<String>,
    /// Compact the snapshot once its size exceeds this many bytes.
    pub snapshot_compact_threshold_bytes: u64,

    /// How long `Leave` waits for the broadcast queue to drain.
    pub broadcast_timeout: Duration,

    /// Default relay factor for queries that don't specify one.
    pub query_relay_factor: usize,
    /// Default query response-collection deadline.
    pub query_timeout: Duration,

    /// Dedup buffer sizes.
    pub event_buffer_size: usize,
    pub query_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            bind_addr: "0.0.0.0:7946".parse().unwrap(),
            advertise_addr: None,

            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(500),
            indirect_checks: 3,
            enable_tcp_fallback: true,

            suspicion_mult: 4,
            suspicion_max_mult: 6,

            retransmit_mult: 4,

            push_pull_interval: Duration::from_secs(30),
            gossip_interval: Duration::from_millis(200),
            gossip_nodes: 3,

            reap_interval: Duration::from_secs(15),
            tombstone_timeout: Duration::from_secs(24 * 60 * 60),

            awareness_max_multiplier: 8,

            label: None,
            encrypt_outgoing: false,
            require_incoming_encryption: false,
            stealth_udp: false,

            snapshot_path: None,
            snapshot_compact_threshold_bytes: 128 * 1024,

            broadcast_timeout: Duration::from_secs(5),

            query_relay_factor: 0,
            query_timeout: Duration::from_secs(2),

            event_buffer_size: 512,
            query_buffer_size: 512,
        }
    }
}

impl Config {
    /// Validate the configuration. Reported synchronously at start-up and
    /// Aborts initialization.
    pub fn validate(&self) -> Result<()> {
        if self.node_name.is_empty() || self.node_name.len() > crate::common::MAX_NODE_NAME_LEN {
            return Err(AgentError::Config(format!(
                "node_name must be 1..={} bytes",
                crate::common::MAX_NODE_NAME_LEN
            )));
        }
        if let Some(label) = &self.label {
            if label.len() > crate::common::MAX_LABEL_LEN {
                return Err(AgentError::Config(format!(
                    "label must be <= {} bytes",
                    crate::common::MAX_LABEL_LEN
                )));
            }
        }
        if self.indirect_checks == 0 {
            return Err(AgentError::Config("indirect_checks must be >= 1".into()));
        }
        if self.suspicion_max_mult < self.suspicion_mult {
            return Err(AgentError::Config(
                "suspicion_max_mult must be >= suspicion_mult".into(),
            ));
        }
        Ok(())
    }

    pub fn advertise_addr(&self) -> SocketAddr {
        self.advertise_addr.unwrap_or(self.bind_addr)
    }
}
