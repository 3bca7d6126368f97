// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable UDP carrier.
//!
//! Connection-oriented, in-order byte stream over UDP datagrams:
//! - **Handshake**: SYN / SYN_ACK, SYN retried every retransmit timeout
//! - **Sliding window** of DATA packets with cumulative ACKs
//! - **Timeout-based retransmission**, connection fails after `max_retries`
//! - **In-order delivery only**: duplicates re-ACKed, gaps dropped
//! - **Keepalive**: idle peers exchange empty ACKs; prolonged silence fails
//!   the connection
//!
//! A connection is exposed as [`RudpStream`], which implements tokio's
//! `AsyncRead`/`AsyncWrite`, so the frame codec runs over it unchanged.
//! A driver task per connection moves bytes between the stream and the
//! socket.
//!
//! ```ignore
//! let listener = RudpListener::bind(addr, RudpConfig::default()).await?;
//! let client = RudpStream::connect(listener.local_addr(), &RudpConfig::default()).await?;
//! let (server_side, peer) = listener.accept().await?;
//! ```

mod listener;
mod packet;
mod reliable;
mod stream;

pub use listener::RudpListener;
pub use packet::{Packet, PacketKind};
pub use reliable::{ReliableReceiver, ReliableSender};
pub use stream::RudpStream;

use std::net::SocketAddr;
use thiserror::Error;

/// Largest datagram we ever read.
pub(crate) const MAX_DATAGRAM: usize = 65_536;

/// Reliable UDP errors.
#[derive(Debug, Error)]
pub enum RudpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("No handshake reply from {0}")]
    HandshakeTimeout(SocketAddr),

    #[error("Peer {0} unreachable")]
    PeerUnreachable(SocketAddr),

    #[error("Listener closed")]
    Closed,
}
