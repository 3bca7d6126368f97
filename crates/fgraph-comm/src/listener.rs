// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Upstream callbacks.

use crate::identity::ConnectionId;
use crate::message::Message;
use tokio::sync::mpsc;
use tracing::debug;

/// Receives what the dispatcher does not handle itself.
///
/// Called from the per-connection inbound queue task, so callbacks for one
/// connection never overlap. Implementations must not block.
pub trait MessageListener: Send + Sync + 'static {
    /// An application (or unclassified control) message arrived.
    fn message_arrived(&self, msg: Message);

    /// A connection is gone. Called exactly once per connection.
    fn lost_connection(&self, id: &ConnectionId);

    /// A connection started its receive loop.
    fn connected(&self, _id: &ConnectionId) {}
}

/// Event forwarded by [`ChannelListener`].
#[derive(Debug, Clone)]
pub enum CommEvent {
    Message(Message),
    Connected(ConnectionId),
    Lost(ConnectionId),
}

/// Listener that forwards every callback onto a channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<CommEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CommEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: CommEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

impl MessageListener for ChannelListener {
    fn message_arrived(&self, msg: Message) {
        self.forward(CommEvent::Message(msg));
    }

    fn lost_connection(&self, id: &ConnectionId) {
        self.forward(CommEvent::Lost(id.clone()));
    }

    fn connected(&self, id: &ConnectionId) {
        self.forward(CommEvent::Connected(id.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwards_in_order() {
        let (listener, mut rx) = ChannelListener::new();
        let id = ConnectionId::from("CH1");

        listener.connected(&id);
        listener.message_arrived(Message::application("x", Vec::new()));
        listener.lost_connection(&id);

        assert!(matches!(rx.try_recv(), Ok(CommEvent::Connected(c)) if c == id));
        assert!(matches!(rx.try_recv(), Ok(CommEvent::Message(_))));
        assert!(matches!(rx.try_recv(), Ok(CommEvent::Lost(c)) if c == id));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let (listener, rx) = ChannelListener::new();
        drop(rx);
        listener.lost_connection(&ConnectionId::from("CH1"));
    }
}
