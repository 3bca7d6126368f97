// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connected reliable UDP stream and its driver task.

use super::packet::{Packet, PacketKind};
use super::reliable::{ReliableReceiver, ReliableSender};
use super::{RudpError, MAX_DATAGRAM};
use crate::config::RudpConfig;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Bytes buffered between the application and the driver.
const STREAM_BUFFER: usize = 256 * 1024;

/// Datagrams queued for one driver before new ones are dropped.
pub(crate) const INBOX_CAPACITY: usize = 1024;

/// One reliable UDP connection.
///
/// Reads yield the peer's bytes in order; writes are chunked into DATA
/// packets. Dropping or shutting down the stream flushes outstanding data
/// and sends FIN. A failed link reads as end of stream.
#[derive(Debug)]
pub struct RudpStream {
    inner: DuplexStream,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl RudpStream {
    /// Connect to a listening peer.
    pub async fn connect(addr: SocketAddr, config: &RudpConfig) -> Result<Self, RudpError> {
        let bind: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = Arc::new(UdpSocket::bind(bind).await?);

        handshake(&socket, addr, config).await?;
        debug!("Reliable UDP link to {} established", addr);

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let reader = tokio::spawn(read_datagrams(socket.clone(), addr, tx));

        spawn_driver(socket, addr, rx, config.clone(), false, move || reader.abort())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl AsyncRead for RudpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RudpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Client side of the handshake: SYN until SYN_ACK or retries run out.
async fn handshake(
    socket: &UdpSocket,
    addr: SocketAddr,
    config: &RudpConfig,
) -> Result<(), RudpError> {
    let syn = Packet::syn().encode();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    for attempt in 0..=config.max_retries {
        socket.send_to(&syn, addr).await?;
        let deadline = tokio::time::Instant::now() + config.retransmit_timeout();

        loop {
            match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => break,
                Ok(Err(e)) => {
                    trace!("Handshake recv error from {}: {}", addr, e);
                    tokio::time::sleep_until(deadline).await;
                    break;
                }
                Ok(Ok((n, from))) => {
                    if from != addr {
                        continue;
                    }
                    if let Ok(pkt) = Packet::decode(&buf[..n]) {
                        if pkt.kind == PacketKind::SynAck {
                            return Ok(());
                        }
                    }
                }
            }
        }
        trace!("SYN attempt {} to {} unanswered", attempt + 1, addr);
    }

    Err(RudpError::HandshakeTimeout(addr))
}

/// Client-side socket reader: forwards the peer's datagrams to the driver.
async fn read_datagrams(socket: Arc<UdpSocket>, peer: SocketAddr, inbox: mpsc::Sender<Packet>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Reliable UDP recv error on link to {}: {}", peer, e);
                break;
            }
        };
        if from != peer {
            continue;
        }
        match Packet::decode(&buf[..n]) {
            Ok(pkt) => {
                if inbox.send(pkt).await.is_err() {
                    break;
                }
            }
            Err(e) => trace!("Dropping datagram from {}: {}", from, e),
        }
    }
}

/// Start the driver for an established link and return the app-side stream.
///
/// `on_close` runs once the driver exits, whatever the reason.
pub(crate) fn spawn_driver<F>(
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    inbox: mpsc::Receiver<Packet>,
    config: RudpConfig,
    accepting: bool,
    on_close: F,
) -> Result<RudpStream, RudpError>
where
    F: FnOnce() + Send + 'static,
{
    let local_addr = socket.local_addr()?;
    let (app, transport) = tokio::io::duplex(STREAM_BUFFER);

    tokio::spawn(async move {
        let driver = Driver {
            sender: ReliableSender::new(&config),
            receiver: ReliableReceiver::new(),
            socket,
            peer,
            config,
            accepting,
        };
        let socket = driver.socket.clone();

        match driver.run(transport, inbox).await {
            Ok(()) => debug!("Reliable UDP link to {} closed", peer),
            Err(e) => {
                warn!("Reliable UDP link to {} failed: {}", peer, e);
                // Best effort, the peer may already be gone
                let _ = socket.send_to(&Packet::fin().encode(), peer).await;
            }
        }
        on_close();
    });

    Ok(RudpStream {
        inner: app,
        local_addr,
        peer_addr: peer,
    })
}

struct Driver {
    sender: ReliableSender,
    receiver: ReliableReceiver,
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    config: RudpConfig,
    /// Server side answers repeated SYNs.
    accepting: bool,
}

impl Driver {
    async fn run(
        mut self,
        transport: DuplexStream,
        mut inbox: mpsc::Receiver<Packet>,
    ) -> Result<(), RudpError> {
        let (mut app_rd, mut app_wr) = tokio::io::split(transport);
        let mut chunk = vec![0u8; self.config.max_payload];
        let mut app_open = true;
        let keepalive = self.config.keepalive_interval();
        let idle_timeout = self.config.idle_timeout();
        let mut last_heard = Instant::now();
        let mut last_sent = Instant::now();

        loop {
            let now = Instant::now();
            while let Some(pkt) = self.sender.poll_transmit(now) {
                self.send(&pkt).await?;
                last_sent = now;
            }
            if self.sender.has_failed() {
                return Err(RudpError::PeerUnreachable(self.peer));
            }
            if !app_open && self.sender.is_idle() {
                self.send(&Packet::fin()).await?;
                return Ok(());
            }
            if now.duration_since(last_heard) >= idle_timeout {
                return Err(RudpError::PeerUnreachable(self.peer));
            }
            if now.duration_since(last_sent) >= keepalive {
                self.send(&Packet::ack(self.receiver.next_expected())).await?;
                last_sent = now;
            }

            let mut deadline = (last_sent + keepalive).min(last_heard + idle_timeout);
            if let Some(retransmit) = self.sender.next_deadline() {
                deadline = deadline.min(retransmit);
            }
            let window_open = app_open && self.sender.window_available();

            tokio::select! {
                read = app_rd.read(&mut chunk), if window_open => {
                    match read? {
                        0 => app_open = false,
                        n => {
                            self.sender.push(chunk[..n].to_vec());
                        }
                    }
                }
                pkt = inbox.recv() => {
                    let Some(pkt) = pkt else {
                        return Err(RudpError::Closed);
                    };
                    last_heard = Instant::now();
                    match pkt.kind {
                        PacketKind::Data => {
                            if let Some(data) = self.receiver.on_data(pkt.seq, pkt.payload) {
                                app_wr.write_all(&data).await?;
                            }
                            self.send(&Packet::ack(self.receiver.next_expected())).await?;
                            last_sent = Instant::now();
                        }
                        PacketKind::Ack => {
                            self.sender.on_ack(pkt.seq);
                        }
                        PacketKind::Fin => {
                            trace!("FIN from {}", self.peer);
                            return Ok(());
                        }
                        PacketKind::Syn => {
                            if self.accepting {
                                self.send(&Packet::syn_ack()).await?;
                            }
                        }
                        PacketKind::SynAck => {}
                    }
                }
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
            }
        }
    }

    async fn send(&self, pkt: &Packet) -> Result<(), RudpError> {
        self.socket.send_to(&pkt.encode(), self.peer).await?;
        Ok(())
    }
}
