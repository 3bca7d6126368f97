// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection hub.
//!
//! Keeps every live connection with its outbound queue, fans outgoing
//! messages out across them, and funnels inbound traffic to the upstream
//! [`MessageListener`].
//!
//! # Routing
//!
//! A message whose `sender` is set came in on that connection; broadcasts
//! skip it so nothing echoes back to its origin.
//!
//! ```text
//!  A ──► [A recv] ──► inbound(A) ──► hub ──► listener
//!                                     │
//!        listener relays ──► hub.send_message(msg from A)
//!                                     ├──► outbound(B) ──► B
//!                                     └──► outbound(C) ──► C
//! ```

use crate::codec::{BoxedReader, BoxedWriter};
use crate::config::{CommConfig, RudpConfig};
use crate::conn_handler::{ConnHandler, ConnOptions};
use crate::error::{CommError, CommResult};
use crate::identity::ConnectionId;
use crate::listener::MessageListener;
use crate::message::{ClientMode, ControlMessage, Message};
use crate::queue::{MessageQueue, MessageSink};
use crate::transport::rudp::RudpStream;
use crate::transport::{PeerUri, TransportKind};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Registry entry: a handler and its outbound queue live and die together.
struct Peer {
    handler: Arc<ConnHandler>,
    outbound: MessageQueue,
}

struct HubInner {
    connections: DashMap<ConnectionId, Peer>,
    listener: Arc<dyn MessageListener>,
    options: ConnOptions,
    rudp: RudpConfig,
}

/// Message hub shared by servers and clients. Cheap to clone.
#[derive(Clone)]
pub struct MessageHandler {
    inner: Arc<HubInner>,
}

/// Inbound-queue consumer. Weak so queues never keep the hub alive.
struct HubSink(Weak<HubInner>);

impl MessageSink for HubSink {
    async fn deliver(&self, msg: Message) {
        if let Some(inner) = self.0.upgrade() {
            MessageHandler { inner }.message_arrived(msg);
        }
    }
}

impl MessageHandler {
    pub fn new(listener: Arc<dyn MessageListener>, config: &CommConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                connections: DashMap::new(),
                listener,
                options: ConnOptions::from(config),
                rudp: config.rudp.clone(),
            }),
        }
    }

    /// Register a connected stream split into halves.
    pub fn create_conn_handler(
        &self,
        reader: BoxedReader,
        writer: BoxedWriter,
        transport: TransportKind,
        peer_addr: Option<SocketAddr>,
    ) -> Arc<ConnHandler> {
        let sink = Arc::new(HubSink(Arc::downgrade(&self.inner)));
        let handler = ConnHandler::new(
            writer,
            transport,
            peer_addr,
            self.inner.options.clone(),
            sink,
        );
        let outbound = MessageQueue::spawn(handler.id().clone(), "outbound", handler.clone());

        // Registered before the receive loop runs, so a fast failure still
        // finds its entry.
        self.inner.connections.insert(
            handler.id().clone(),
            Peer {
                handler: handler.clone(),
                outbound,
            },
        );
        handler.start(reader);

        info!(
            "Connection {} registered ({}, {:?}), {} total",
            handler.id(),
            transport,
            peer_addr,
            self.inner.connections.len()
        );
        handler
    }

    /// Register an accepted or connected TCP stream.
    pub fn attach_tcp(&self, stream: TcpStream) -> Arc<ConnHandler> {
        let peer_addr = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {:?}: {}", peer_addr, e);
        }
        let (reader, writer) = stream.into_split();
        self.create_conn_handler(
            Box::new(reader),
            Box::new(writer),
            TransportKind::Tcp,
            peer_addr,
        )
    }

    /// Register any connected byte stream.
    pub fn attach_stream<S>(
        &self,
        stream: S,
        transport: TransportKind,
        peer_addr: Option<SocketAddr>,
    ) -> Arc<ConnHandler>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        self.create_conn_handler(Box::new(reader), Box::new(writer), transport, peer_addr)
    }

    /// Connect to `tcp://host:port` or `rudp://host:port` and register the link.
    pub async fn connect(&self, uri: &str) -> CommResult<Arc<ConnHandler>> {
        let uri: PeerUri = uri.parse()?;
        let addr = uri.resolve().await?;

        let handler = match uri.transport {
            TransportKind::Tcp => {
                let stream = TcpStream::connect(addr).await?;
                self.attach_tcp(stream)
            }
            TransportKind::Rudp => {
                let stream = RudpStream::connect(addr, &self.inner.rudp).await?;
                self.attach_stream(stream, TransportKind::Rudp, Some(addr))
            }
        };
        info!("Connected to {} as {}", uri, handler.id());
        Ok(handler)
    }

    /// Queue `msg` on every connection except its sender.
    ///
    /// Returns the number of queues it was placed on.
    pub fn send_message(&self, msg: Message) -> usize {
        match msg.sender.clone() {
            Some(origin) => self.send_except_to(msg, &origin),
            None => self.fan_out(msg, None),
        }
    }

    /// Send `msg` to every connection except its sender and wait for each
    /// acknowledgement in turn. The first failure stops the fan-out.
    ///
    /// One slow peer delays every peer after it.
    pub async fn send_blocking_message(&self, msg: &Message) -> CommResult<()> {
        let targets: Vec<Arc<ConnHandler>> = self
            .inner
            .connections
            .iter()
            .filter(|entry| Some(entry.key()) != msg.sender.as_ref())
            .map(|entry| entry.value().handler.clone())
            .collect();

        for handler in targets {
            if let Err(e) = handler.send_blocking_message(msg).await {
                if e.is_fatal() {
                    warn!(
                        "Blocking broadcast of {} stopped, {} is gone: {}",
                        msg.id,
                        handler.id(),
                        e
                    );
                } else {
                    debug!(
                        "Blocking broadcast of {} stopped at {}: {}",
                        msg.id,
                        handler.id(),
                        e
                    );
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Queue `msg` on exactly one connection.
    pub fn send_reply_to(&self, msg: Message, id: &ConnectionId) -> CommResult<()> {
        match self.inner.connections.get(id) {
            Some(peer) => peer.outbound.enqueue(msg),
            None => Err(CommError::UnknownConnection(id.clone())),
        }
    }

    /// Queue `msg` on every connection except `id`.
    pub fn send_except_to(&self, msg: Message, id: &ConnectionId) -> usize {
        self.fan_out(msg, Some(id))
    }

    fn fan_out(&self, msg: Message, except: Option<&ConnectionId>) -> usize {
        let mut queued = 0;
        for entry in self.inner.connections.iter() {
            if Some(entry.key()) == except {
                continue;
            }
            match entry.value().outbound.enqueue(msg.clone()) {
                Ok(()) => queued += 1,
                Err(e) => debug!("Skipping {}: {}", entry.key(), e),
            }
        }
        queued
    }

    /// Drop a connection and tell the listener, once.
    pub fn lost_connection(&self, id: &ConnectionId) {
        let Some((_, peer)) = self.inner.connections.remove(id) else {
            debug!("Connection {} already gone", id);
            return;
        };
        peer.outbound.terminate();
        peer.handler.terminate();

        info!(
            "Connection {} removed, {} remaining",
            id,
            self.inner.connections.len()
        );
        self.inner.listener.lost_connection(id);
    }

    /// Inbound-queue consumer: lifecycle control here, the rest upstream.
    pub fn message_arrived(&self, msg: Message) {
        match (msg.as_control(), msg.sender.clone()) {
            (Some(ControlMessage::ConnectionLost), Some(origin)) => self.lost_connection(&origin),
            (Some(ControlMessage::Connected), Some(origin)) => {
                self.inner.listener.connected(&origin)
            }
            (Some(ControlMessage::ConnectionLost | ControlMessage::Connected), None) => {
                warn!("Lifecycle message {} without a sender", msg.id);
            }
            _ => self.inner.listener.message_arrived(msg),
        }
    }

    /// Terminate every connection without notifying the listener.
    pub fn close(&self) {
        let ids = self.connection_ids();
        for id in &ids {
            if let Some((_, peer)) = self.inner.connections.remove(id) {
                peer.outbound.terminate();
                peer.handler.terminate();
            }
        }
        if !ids.is_empty() {
            info!("Closed {} connections", ids.len());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.inner
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<ConnHandler>> {
        self.inner
            .connections
            .get(id)
            .map(|peer| peer.handler.clone())
    }

    /// Client mode last announced by the peer on `id`.
    pub fn client_mode(&self, id: &ConnectionId) -> Option<ClientMode> {
        self.inner
            .connections
            .get(id)
            .map(|peer| peer.handler.client_mode())
    }
}
