// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listening side: one socket, many peers.
//!
//! A demux task owns the socket's receive side and routes each datagram to
//! the driver of its source address. A SYN from an unknown address opens a
//! new connection and is answered with SYN_ACK.

use super::packet::{Packet, PacketKind};
use super::stream::{spawn_driver, INBOX_CAPACITY};
use super::{RudpError, RudpStream, MAX_DATAGRAM};
use crate::config::RudpConfig;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, trace, warn};

/// Connections waiting for `accept`.
const ACCEPT_BACKLOG: usize = 128;

type PeerMap = DashMap<SocketAddr, mpsc::Sender<Packet>>;

/// Reliable UDP listener.
///
/// Dropping it stops accepting. Established connections keep the socket
/// until they close.
pub struct RudpListener {
    local_addr: SocketAddr,
    incoming: Mutex<mpsc::Receiver<(RudpStream, SocketAddr)>>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl RudpListener {
    /// Bind and start the demux task.
    pub async fn bind(addr: SocketAddr, config: RudpConfig) -> Result<Self, RudpError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_BACKLOG);
        let shutdown = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());

        let demux = Demux {
            socket,
            config,
            peers: Arc::new(DashMap::new()),
            accept_tx,
            shutdown: shutdown.clone(),
            wake: wake.clone(),
        };
        tokio::spawn(demux.run());

        info!("Reliable UDP listening on {}", local_addr);
        Ok(Self {
            local_addr,
            incoming: Mutex::new(accept_rx),
            shutdown,
            wake,
        })
    }

    /// Wait for the next inbound connection.
    pub async fn accept(&self) -> Result<(RudpStream, SocketAddr), RudpError> {
        self.incoming.lock().await.recv().await.ok_or(RudpError::Closed)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for RudpListener {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}

struct Demux {
    socket: Arc<UdpSocket>,
    config: RudpConfig,
    peers: Arc<PeerMap>,
    accept_tx: mpsc::Sender<(RudpStream, SocketAddr)>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Demux {
    async fn run(self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            if self.shutdown.load(Ordering::Acquire) && self.peers.is_empty() {
                break;
            }

            tokio::select! {
                res = self.socket.recv_from(&mut buf) => match res {
                    Ok((n, from)) => match Packet::decode(&buf[..n]) {
                        Ok(pkt) => self.route(pkt, from).await,
                        Err(e) => trace!("Dropping datagram from {}: {}", from, e),
                    },
                    Err(e) => debug!("Reliable UDP recv error: {}", e),
                },
                _ = self.wake.notified() => {}
            }
        }

        debug!("Reliable UDP demux stopped");
    }

    async fn route(&self, pkt: Packet, from: SocketAddr) {
        let existing = self.peers.get(&from).map(|entry| entry.value().clone());

        let pkt = match existing {
            Some(tx) => match tx.try_send(pkt) {
                Ok(()) => return,
                Err(TrySendError::Full(_)) => {
                    trace!("Inbox for {} full, dropping datagram", from);
                    return;
                }
                // Driver gone; a SYN may reopen the link below
                Err(TrySendError::Closed(pkt)) => {
                    self.peers.remove_if(&from, |_, tx| tx.is_closed());
                    pkt
                }
            },
            None => pkt,
        };

        if pkt.kind != PacketKind::Syn {
            trace!("Stray {:?} from {}", pkt.kind, from);
            return;
        }
        if self.shutdown.load(Ordering::Acquire) || self.accept_tx.is_closed() {
            return;
        }

        self.open(from).await;
    }

    async fn open(&self, from: SocketAddr) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.peers.insert(from, tx);

        let peers = self.peers.clone();
        let wake = self.wake.clone();
        let stream = match spawn_driver(
            self.socket.clone(),
            from,
            rx,
            self.config.clone(),
            true,
            move || {
                peers.remove_if(&from, |_, tx| tx.is_closed());
                wake.notify_one();
            },
        ) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot start link for {}: {}", from, e);
                self.peers.remove(&from);
                return;
            }
        };

        if let Err(e) = self.socket.send_to(&Packet::syn_ack().encode(), from).await {
            debug!("SYN_ACK to {} failed: {}", from, e);
        }

        // Dropping the stream on a full backlog closes the link with FIN
        if self.accept_tx.try_send((stream, from)).is_err() {
            warn!("Accept backlog full, refusing {}", from);
        } else {
            debug!("Reliable UDP link from {}", from);
        }
    }
}
