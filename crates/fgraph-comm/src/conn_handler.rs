// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection handler.
//!
//! Owns one transport byte stream. A receive task decodes frames and
//! classifies them; writes go through a shared [`FrameWriter`]. Everything
//! the receive task does not consume itself is stamped with this
//! connection's ID and pushed onto the inbound queue.
//!
//! The handler fails exactly once: the first receive error, end of stream
//! or write error moves it to [`ConnectionState::Disconnected`] and puts a
//! `ConnectionLost` control message on the inbound queue.

use crate::ack::{AckOutcome, AckTable};
use crate::codec::{self, BoxedReader, BoxedWriter, FrameReader, FrameWriter};
use crate::config::CommConfig;
use crate::error::{CommError, CommResult};
use crate::identity::ConnectionId;
use crate::message::{AckStatus, ClientMode, ControlMessage, Message, MessageBody};
use crate::queue::{MessageQueue, MessageSink};
use crate::transport::TransportKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Per-connection tuning.
#[derive(Debug, Clone)]
pub struct ConnOptions {
    /// How long a blocking send waits for its acknowledgement.
    pub ack_timeout: Duration,
    /// Maximum encoded message size.
    pub max_message_size: usize,
}

impl Default for ConnOptions {
    fn default() -> Self {
        Self::from(&CommConfig::default())
    }
}

impl From<&CommConfig> for ConnOptions {
    fn from(config: &CommConfig) -> Self {
        Self {
            ack_timeout: config.ack_timeout(),
            max_message_size: config.max_message_size,
        }
    }
}

/// Connection lifecycle. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Active = 1,
    Disconnected = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Active,
            _ => Self::Disconnected,
        }
    }
}

/// Handler for one peer connection.
pub struct ConnHandler {
    id: ConnectionId,
    transport: TransportKind,
    peer_addr: Option<SocketAddr>,
    options: ConnOptions,
    writer: Arc<tokio::sync::Mutex<FrameWriter>>,
    writer_closed: AtomicBool,
    acks: AckTable,
    state: AtomicU8,
    client_mode: parking_lot::Mutex<ClientMode>,
    inbound: MessageQueue,
    recv_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ConnHandler {
    /// Create a handler around the write half of a stream.
    ///
    /// Nothing is read until [`start`](Self::start). Inbound traffic is
    /// delivered to `inbound_sink` in arrival order.
    pub fn new<S: MessageSink>(
        writer: BoxedWriter,
        transport: TransportKind,
        peer_addr: Option<SocketAddr>,
        options: ConnOptions,
        inbound_sink: Arc<S>,
    ) -> Arc<Self> {
        let id = ConnectionId::generate();
        let inbound = MessageQueue::spawn(id.clone(), "inbound", inbound_sink);

        Arc::new(Self {
            writer: Arc::new(tokio::sync::Mutex::new(FrameWriter::new(
                writer,
                options.max_message_size,
            ))),
            id,
            transport,
            peer_addr,
            options,
            writer_closed: AtomicBool::new(false),
            acks: AckTable::new(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            client_mode: parking_lot::Mutex::new(ClientMode::default()),
            inbound,
            recv_task: parking_lot::Mutex::new(None),
        })
    }

    /// Spawn the receive task over the read half.
    pub fn start(self: &Arc<Self>, reader: BoxedReader) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        let reader = FrameReader::new(reader, self.options.max_message_size);
        let task = tokio::spawn(self.clone().receive_loop(reader));
        *self.recv_task.lock() = Some(task);

        // Lost a race with terminate()
        if self.state() == ConnectionState::Disconnected {
            if let Some(task) = self.recv_task.lock().take() {
                task.abort();
            }
        }
    }

    async fn receive_loop(self: Arc<Self>, mut reader: FrameReader) {
        let _ = self.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        debug!(
            "Connection {} ({}, {:?}) receiving",
            self.id, self.transport, self.peer_addr
        );

        let connected = Message::control(ControlMessage::Connected).with_sender(self.id.clone());
        if self.inbound.enqueue(connected).is_err() {
            return;
        }

        loop {
            match reader.read_message().await {
                Ok(Some(msg)) => {
                    if !self.classify(msg) {
                        return;
                    }
                }
                Ok(None) => {
                    debug!("Connection {} closed by peer", self.id);
                    break;
                }
                Err(e) => {
                    warn!("Connection {} receive error: {}", self.id, e);
                    break;
                }
            }
        }

        self.fail();
    }

    /// Route one inbound message. Returns `false` once the inbound queue is closed.
    fn classify(&self, mut msg: Message) -> bool {
        match msg.body {
            MessageBody::Ack(ack) => {
                self.acks.resolve(ack);
                true
            }
            MessageBody::Control {
                control: ControlMessage::SetClientMode { mode },
            } => {
                debug!("Connection {} client mode -> {:?}", self.id, mode);
                *self.client_mode.lock() = mode;
                true
            }
            _ => {
                trace!("Connection {} received {}", self.id, msg.id);
                msg.sender = Some(self.id.clone());
                self.inbound.enqueue(msg).is_ok()
            }
        }
    }

    /// Write one message.
    ///
    /// The write is bounded by the ACK timeout. A transport failure or a
    /// stalled write disconnects the handler before the error is returned.
    pub async fn send_message(&self, msg: &Message) -> CommResult<()> {
        let deadline = Instant::now() + self.options.ack_timeout;
        self.send_message_until(msg, deadline).await
    }

    async fn send_message_until(&self, msg: &Message, deadline: Instant) -> CommResult<()> {
        if self.state() == ConnectionState::Disconnected {
            return Err(CommError::ConnectionClosed(self.id.clone()));
        }
        let frame = codec::encode(msg, self.options.max_message_size)?;

        let write = async { self.writer.lock().await.write_frame(&frame).await };
        let result = match tokio::time::timeout_at(deadline, write).await {
            Ok(result) => result,
            Err(_) => Err(CommError::WriteStalled {
                timeout: self.options.ack_timeout,
            }),
        };
        if let Err(e) = &result {
            warn!("Send on connection {} failed: {}", self.id, e);
            self.fail();
        }
        result
    }

    /// Write one message and wait for the peer's acknowledgement.
    ///
    /// The write and the wait share one deadline, `ack_timeout` from now.
    pub async fn send_blocking_message(&self, msg: &Message) -> CommResult<()> {
        let deadline = Instant::now() + self.options.ack_timeout;
        let waiter = self.acks.register(msg.id.clone())?;

        if let Err(e) = self.send_message_until(msg, deadline).await {
            self.acks.cancel(waiter.message_id());
            return Err(match e {
                CommError::WriteStalled { timeout } => CommError::AckTimeout {
                    message_id: msg.id.clone(),
                    timeout,
                },
                other => other,
            });
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.acks.wait(waiter, remaining).await {
            AckOutcome::Acked(AckStatus::Success) => Ok(()),
            AckOutcome::Acked(AckStatus::Error { message }) => Err(CommError::Remote(message)),
            AckOutcome::TimedOut => Err(CommError::AckTimeout {
                message_id: msg.id.clone(),
                timeout: self.options.ack_timeout,
            }),
            AckOutcome::Dropped => Err(CommError::ConnectionClosed(self.id.clone())),
        }
    }

    /// Tear the connection down. Idempotent; never reports a disconnect.
    pub fn terminate(&self) {
        let prev = self
            .state
            .swap(ConnectionState::Disconnected as u8, Ordering::AcqRel);
        self.inbound.terminate();
        self.stop_io();
        if prev != ConnectionState::Disconnected as u8 {
            debug!("Connection {} terminated", self.id);
        }
    }

    /// First failure wins: report once, then stop I/O.
    fn fail(&self) {
        let prev = self
            .state
            .swap(ConnectionState::Disconnected as u8, Ordering::AcqRel);
        if prev != ConnectionState::Disconnected as u8 {
            info!("Connection {} lost", self.id);
            let lost =
                Message::control(ControlMessage::ConnectionLost).with_sender(self.id.clone());
            if self.inbound.enqueue(lost).is_err() {
                debug!("Inbound queue of {} already closed", self.id);
            }
        }
        self.stop_io();
    }

    fn stop_io(&self) {
        if let Some(task) = self.recv_task.lock().take() {
            task.abort();
        }
        self.acks.clear();

        if !self.writer_closed.swap(true, Ordering::AcqRel) {
            let writer = self.writer.clone();
            let id = self.id.clone();
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                rt.spawn(async move {
                    if let Err(e) = writer.lock().await.shutdown().await {
                        trace!("Writer shutdown for {}: {}", id, e);
                    }
                });
            }
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn client_mode(&self) -> ClientMode {
        *self.client_mode.lock()
    }

    /// Blocking sends still waiting for an acknowledgement.
    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }
}

impl MessageSink for ConnHandler {
    /// Outbound queue consumer.
    async fn deliver(&self, msg: Message) {
        if let Err(e) = self.send_message(&msg).await {
            debug!("Dropping {} for {}: {}", msg.id, self.id, e);
        }
    }
}

impl std::fmt::Debug for ConnHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnHandler")
            .field("id", &self.id)
            .field("transport", &self.transport)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}
