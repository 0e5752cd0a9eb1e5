//! Real UDP+TCP transport: socket tuning via `socket2`, a raw `UdpSocket`
//! send/recv loop, and a framed TCP stream for anti-entropy exchanges.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, Mutex};

use crate::error::{AgentError, Result};

use super::{Incoming, Packet, Stream, Transport};

/// Maximum UDP datagram size we'll attempt to read in one recv call.
const MAX_UDP_PACKET: usize = 65_536;

pub struct NetTransport {
    udp: Arc<UdpSocket>,
    advertise_addr: SocketAddr,
    packet_rx: Mutex<mpsc::Receiver<Packet>>,
    incoming_rx: Mutex<mpsc::Receiver<Incoming>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl NetTransport {
    pub async fn bind(bind_addr: SocketAddr, advertise_addr: Option<SocketAddr>) -> Result<Self> {
        let udp_std = Self::configured_udp_socket(bind_addr)?;
        udp_std.set_nonblocking(true)?;
        let udp = Arc::new(UdpSocket::from_std(udp_std)?);

        let listener = TcpListener::bind(bind_addr).await?;
        let advertise_addr = advertise_addr.unwrap_or(bind_addr);

        let (packet_tx, packet_rx) = mpsc::channel(1024);
        let (incoming_tx, incoming_rx) = mpsc::channel(256);
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

        let udp_reader = udp.clone();
        let mut stop_udp = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_UDP_PACKET];
            loop {
                tokio::select! {
                    _ = stop_udp.changed() => break,
                    res = udp_reader.recv_from(&mut buf) => {
                        match res {
                            Ok((n, from)) => {
                                let pkt = Packet {
                                    buf: buf[..n].to_vec(),
                                    from,
                                    arrival_time: std::time::Instant::now(),
                                };
                                if packet_tx.send(pkt).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "udp recv_from failed");
                            }
                        }
                    }
                }
            }
        });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    res = listener.accept() => {
                        match res {
                            Ok((stream, peer)) => {
                                if let Err(e) = Self::tune_tcp_stream(&stream) {
                                    tracing::warn!(error = %e, %peer, "failed to tune accepted tcp stream");
                                }
                                let incoming = Incoming { stream: Box::new(stream), peer };
                                if incoming_tx.send(incoming).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "tcp accept failed");
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            udp,
            advertise_addr,
            packet_rx: Mutex::new(packet_rx),
            incoming_rx: Mutex::new(incoming_rx),
            shutdown_tx,
        })
    }

    fn configured_udp_socket(bind_addr: SocketAddr) -> Result<std::net::UdpSocket> {
        let domain = if bind_addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::DGRAM, None)?;
        socket.set_reuse_address(true)?;
        socket.bind(&bind_addr.into())?;
        Ok(socket.into())
    }

    fn tune_tcp_stream(stream: &TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        Ok(())
    }
}

#[async_trait]
impl Transport for NetTransport {
    async fn send_packet(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        self.udp.send_to(data, addr).await?;
        Ok(())
    }

    async fn dial_stream(&self, addr: SocketAddr, timeout: Duration) -> Result<Box<dyn Stream>> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| AgentError::Timeout(format!("dial {addr} timed out")))??;
        Self::tune_tcp_stream(&stream)?;
        Ok(Box::new(stream))
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
        self.advertise_addr
    }

    async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Read a length-prefixed frame ([4-byte big-endian length][body]) from a
/// stream.
pub async fn read_frame(stream: &mut (dyn Stream)) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

/// Write a length-prefixed frame to a stream.
pub async fn write_frame(stream: &mut (dyn Stream), body: &[u8]) -> Result<()> {
    let len = (body.len() as u32).to_be_bytes();
    stream.write_all(&len).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}
