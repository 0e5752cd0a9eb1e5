//! In-memory transport for deterministic tests. Packets sent to an address
//! with no registered `MockTransport` are silently dropped, faithfully
//! simulating UDP's unreliable delivery to unreachable peers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::io::duplex;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::{AgentError, Result};

use super::{Incoming, Packet, Stream, Transport};

type Registry = Arc<SyncMutex<HashMap<SocketAddr, mpsc::Sender<Packet>>>>;
type StreamRegistry = Arc<SyncMutex<HashMap<SocketAddr, mpsc::Sender<Incoming>>>>;

/// A shared "network" that a set of `MockTransport`s register themselves
/// into, so that sends from one resolve to the others' receivers.
#[derive(Clone, Default)]
pub struct MockNetwork {
    packet_registry: Registry,
    stream_registry: StreamRegistry,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn transport(&self, addr: SocketAddr) -> MockTransport {
        let (packet_tx, packet_rx) = mpsc::channel(1024);
        let (incoming_tx, incoming_rx) = mpsc::channel(256);
        self.packet_registry.lock().insert(addr, packet_tx);
        self.stream_registry.lock().insert(addr, incoming_tx);
        MockTransport {
            addr,
            network: self.clone(),
            packet_rx: Mutex::new(packet_rx),
            incoming_rx: Mutex::new(incoming_rx),
        }
    }
}

pub struct MockTransport {
    addr: SocketAddr,
    network: MockNetwork,
    packet_rx: Mutex<mpsc::Receiver<Packet>>,
    incoming_rx: Mutex<mpsc::Receiver<Incoming>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_packet(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        let sender = self.network.packet_registry.lock().get(&addr).cloned();
        if let Some(sender) = sender {
            let pkt = Packet {
                buf: data.to_vec(),
                from: self.addr,
                arrival_time: std::time::Instant::now(),
            };
            // Mirror UDP: a full/dead peer silently drops the datagram.
            let _ = sender.try_send(pkt);
        }
        Ok(())
    }

    async fn dial_stream(&self, addr: SocketAddr, timeout: Duration) -> Result<Box<dyn Stream>> {
        let sender = self
            .network
            .stream_registry
            .lock()
            .get(&addr)
            .cloned()
            .ok_or_else(|| AgentError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("no mock listener at {addr}"),
            )))?;
        let (a, b) = duplex(64 * 1024);
        let incoming = Incoming { stream: Box::new(b), peer: self.addr };
        tokio::time::timeout(timeout, sender.send(incoming))
            .await
            .map_err(|_| AgentError::Timeout(format!("dial {addr} timed out")))?
            .map_err(|_| AgentError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock listener closed",
            )))?;
        Ok(Box::new(a))
    }

    async fn recv_packet(&self) -> Result<Packet> {
        self.packet_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| AgentError::InvalidState("transport shut down".into()))
    }

    async fn accept_stream(&self) -> Result<Incoming> {
        self.incoming_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| AgentError::InvalidState("transport shut down".into()))
    }

    fn final_advertise_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn shutdown(&self) {
        self.network.packet_registry.lock().remove(&self.addr);
        self.network.stream_registry.lock().remove(&self.addr);
    }
}
