// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FGraph peer messaging dispatcher
//!
//! Moves graph replication messages between peers over TCP and reliable UDP.
//!
//! # Features
//!
//! - **Connection handlers**: one receive task per peer, framed JSON messages
//! - **Fan-out**: broadcast to every peer except the one a message came from
//! - **Blocking sends**: wait for the peer's ACK, bounded by a timeout
//! - **Lifecycle**: connection loss reported upstream exactly once
//! - **Two carriers**: `tcp://host:port` and `rudp://host:port`
//!
//! # Quick Start
//!
//! ```bash
//! # Hub relaying every message to all other peers
//! fgraph-comm serve --port 4800
//!
//! # Send one message and wait for its acknowledgement
//! fgraph-comm send tcp://127.0.0.1:4800 --kind vertex_added --payload v1
//!
//! # Print relayed messages
//! fgraph-comm listen rudp://127.0.0.1:4800
//! ```
//!
//! # Embedding
//!
//! ```ignore
//! let (listener, mut events) = ChannelListener::new();
//! let hub = MessageHandler::new(Arc::new(listener), &config);
//! let server = TcpServer::start(&config, hub.clone()).await?;
//!
//! while let Some(CommEvent::Message(msg)) = events.recv().await {
//!     if let Some(origin) = msg.sender.clone() {
//!         hub.send_reply_to(Message::ack_success(&msg), &origin)?;
//!     }
//!     hub.send_message(msg);
//! }
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! port = 4800
//! ack_timeout_ms = 6000
//!
//! [rudp]
//! window_size = 8
//! retransmit_timeout_ms = 200
//! ```

pub mod ack;
pub mod codec;
pub mod config;
pub mod conn_handler;
pub mod error;
pub mod identity;
pub mod listener;
pub mod message;
pub mod message_handler;
pub mod queue;
pub mod server;
pub mod transport;

pub use config::{CommConfig, ConfigError, RudpConfig};
pub use conn_handler::{ConnHandler, ConnOptions, ConnectionState};
pub use error::{CommError, CommResult};
pub use identity::{ConnectionId, MessageId};
pub use listener::{ChannelListener, CommEvent, MessageListener};
pub use message::{AckMessage, AckStatus, ClientMode, ControlMessage, Message, MessageBody};
pub use message_handler::MessageHandler;
pub use server::{RudpServer, TcpServer};
pub use transport::rudp::{RudpError, RudpListener, RudpStream};
pub use transport::{PeerUri, TransportKind};
