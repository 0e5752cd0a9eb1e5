//! Transport layer: UDP+TCP bound on an address,
//! framed packet/stream send and receive, an optional label header is
//! handled one layer up (`crate::security`). Two implementations are
//! provided: a real UDP+TCP transport and an in-memory mock that silently
//! drops packets sent to unbound addresses, faithfully simulating UDP.

mod mock;
pub(crate) mod net;

pub use mock::{MockNetwork, MockTransport};
pub use net::NetTransport;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// A datagram received off the wire, with its arrival time and source
/// address attached.
#[derive(Debug, Clone)]
pub struct Packet {
    pub buf: Vec<u8>,
    pub from: SocketAddr,
    pub arrival_time: Instant,
}

/// A bidirectional, reliable, length-prefixed byte stream.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// An accepted incoming stream connection, paired with the peer address.
pub struct Incoming {
    pub stream: Box<dyn Stream>,
    pub peer: SocketAddr,
}

/// The transport contract consumed by the SWIM engine and push/pull sync.
/// `send_packet` is safe to call concurrently from any task. The packet
/// receiver delivers packets in arrival order per-socket, but ordering is
/// not guaranteed across sockets/transports.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Best-effort, unordered datagram send.
    async fn send_packet(&self, data: &[u8], addr: SocketAddr) -> Result<()>;

    /// Open a reliable bidirectional stream to `addr`, bounded by `timeout`.
    async fn dial_stream(&self, addr: SocketAddr, timeout: Duration) -> Result<Box<dyn Stream>>;

    /// Receive the next datagram. Resolves in arrival order.
    async fn recv_packet(&self) -> Result<Packet>;

    /// Accept the next incoming stream connection.
    async fn accept_stream(&self) -> Result<Incoming>;

    /// The address to advertise to peers (may differ from the bind address).
    fn final_advertise_addr(&self) -> SocketAddr;

    /// Tear down sockets/listeners and stop delivering further packets.
    async fn shutdown(&self);
}
