// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the messaging dispatcher.

use crate::identity::{ConnectionId, MessageId};
use std::time::Duration;
use thiserror::Error;

/// Result type for dispatcher operations.
pub type CommResult<T> = Result<T, CommError>;

/// Dispatcher errors.
#[derive(Debug, Error)]
pub enum CommError {
    /// Transport read or write failure. Always fatal to the connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or oversized frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No acknowledgement arrived in time for a blocking send.
    #[error("No acknowledgement for message {message_id} after {timeout:?}")]
    AckTimeout {
        message_id: MessageId,
        timeout: Duration,
    },

    /// A frame could not be written before its deadline. The peer stopped
    /// reading; the connection is dropped.
    #[error("Write stalled for {timeout:?}")]
    WriteStalled { timeout: Duration },

    /// The peer acknowledged with an error.
    #[error("Remote error: {0}")]
    Remote(String),

    /// A blocking send for the same message ID is already waiting.
    #[error("Message {0} already awaiting acknowledgement")]
    DuplicateWait(MessageId),

    /// The connection was torn down.
    #[error("Connection {0} closed")]
    ConnectionClosed(ConnectionId),

    /// No connection registered under this ID.
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// Could not bind a listening transport.
    #[error("Bind error: {0}")]
    Bind(String),

    /// No candidate port could be bound.
    #[error("No port available in {base}..{end}")]
    NoPortAvailable { base: u16, end: u32 },

    /// Unsupported or malformed peer URI.
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Reliable UDP transport failure.
    #[error("Reliable UDP error: {0}")]
    Rudp(#[from] crate::transport::rudp::RudpError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl CommError {
    /// Whether this error means the connection itself is gone.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Protocol(_)
                | Self::WriteStalled { .. }
                | Self::ConnectionClosed(_)
                | Self::Rudp(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommError::AckTimeout {
            message_id: MessageId::from("M1"),
            timeout: Duration::from_millis(6000),
        };
        assert!(err.to_string().contains("M1"));
        assert!(err.to_string().contains("6s"));

        let err = CommError::Remote("vertex exists".into());
        assert!(err.to_string().contains("vertex exists"));
    }

    #[test]
    fn test_is_fatal() {
        assert!(CommError::Protocol("bad".into()).is_fatal());
        assert!(CommError::ConnectionClosed(ConnectionId::from("CH1")).is_fatal());
        assert!(CommError::WriteStalled {
            timeout: Duration::from_millis(200)
        }
        .is_fatal());
        assert!(!CommError::Remote("x".into()).is_fatal());
        assert!(!CommError::UnknownConnection(ConnectionId::from("CH1")).is_fatal());
    }
}
