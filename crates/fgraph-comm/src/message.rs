// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message envelope carried between peers.
//!
//! Three kinds matter to the dispatcher:
//!
//! - **Application**: opaque payload for the upstream listener
//! - **Control**: connection lifecycle and client-mode switches
//! - **Ack**: reply to a blocking send, keyed by the original message ID
//!
//! JSON shape:
//! ```text
//! {"id":"M1a2b..","body":{"type":"application","kind":"vertex_added","payload":[..]}}
//! {"id":"M..","body":{"type":"ack","reference_id":"M1a2b..","status":"success"}}
//! ```

use crate::identity::{ConnectionId, MessageId};
use serde::{Deserialize, Serialize};

/// A message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID.
    pub id: MessageId,

    /// Connection the message arrived on, or originated from.
    ///
    /// Local routing metadata only; never sent on the wire.
    #[serde(skip)]
    pub sender: Option<ConnectionId>,

    /// Message payload.
    pub body: MessageBody,
}

/// Message payload variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageBody {
    /// Application message, opaque to the dispatcher.
    #[serde(rename = "application")]
    Application {
        kind: String,
        #[serde(default)]
        payload: Vec<u8>,
    },

    /// Connection control.
    #[serde(rename = "control")]
    Control { control: ControlMessage },

    /// Acknowledgement of an earlier message.
    #[serde(rename = "ack")]
    Ack(AckMessage),
}

/// Control message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMessage {
    /// The connection named by the message sender is gone.
    ConnectionLost,
    /// The connection named by the message sender is up.
    Connected,
    /// Peer asks to be treated as a full or thin client.
    SetClientMode { mode: ClientMode },
}

/// Client mode of a peer connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMode {
    /// Keeps a full replica and receives every update.
    #[default]
    Full,
    /// Keeps no replica.
    Thin,
}

/// Acknowledgement payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    /// ID of the message being acknowledged.
    pub reference_id: MessageId,
    /// Outcome.
    pub status: AckStatus,
}

/// Outcome carried by an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Success,
    Error { message: String },
}

impl Message {
    /// Create a message with a fresh ID.
    pub fn new(body: MessageBody) -> Self {
        Self {
            id: MessageId::generate(),
            sender: None,
            body,
        }
    }

    /// Create an application message.
    pub fn application(kind: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageBody::Application {
            kind: kind.into(),
            payload: payload.into(),
        })
    }

    /// Create a control message.
    pub fn control(control: ControlMessage) -> Self {
        Self::new(MessageBody::Control { control })
    }

    /// Successful acknowledgement of `original`.
    pub fn ack_success(original: &Message) -> Self {
        Self::new(MessageBody::Ack(AckMessage {
            reference_id: original.id.clone(),
            status: AckStatus::Success,
        }))
    }

    /// Failed acknowledgement of `original`.
    pub fn ack_error(original: &Message, message: impl Into<String>) -> Self {
        Self::new(MessageBody::Ack(AckMessage {
            reference_id: original.id.clone(),
            status: AckStatus::Error {
                message: message.into(),
            },
        }))
    }

    /// Set the sender connection.
    pub fn with_sender(mut self, sender: ConnectionId) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Control payload, if this is a control message.
    pub fn as_control(&self) -> Option<ControlMessage> {
        match self.body {
            MessageBody::Control { control } => Some(control),
            _ => None,
        }
    }
}

impl AckStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_serialize() {
        let msg = Message::application("vertex_added", b"v1".to_vec());
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"application\""));
        assert!(json.contains("vertex_added"));

        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, msg.id);
        assert_eq!(parsed.body, msg.body);
    }

    #[test]
    fn test_sender_not_on_wire() {
        let msg = Message::application("x", Vec::new()).with_sender(ConnectionId::from("CH1"));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("CH1"));

        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert!(parsed.sender.is_none());
    }

    #[test]
    fn test_ack_references_original() {
        let original = Message::application("edge_added", Vec::new());
        let ack = Message::ack_error(&original, "duplicate edge");

        match &ack.body {
            MessageBody::Ack(a) => {
                assert_eq!(a.reference_id, original.id);
                assert_eq!(
                    a.status,
                    AckStatus::Error {
                        message: "duplicate edge".into()
                    }
                );
                assert!(!a.status.is_success());
            }
            _ => panic!("Wrong message type"),
        }
        assert_ne!(ack.id, original.id);
    }

    #[test]
    fn test_control_serialize() {
        let msg = Message::control(ControlMessage::SetClientMode {
            mode: ClientMode::Thin,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("set_client_mode"));
        assert!(json.contains("thin"));

        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.as_control(),
            Some(ControlMessage::SetClientMode {
                mode: ClientMode::Thin
            })
        );
    }

    #[test]
    fn test_ack_status_wire_shape() {
        let original = Message::application("x", Vec::new());
        let json = serde_json::to_string(&Message::ack_success(&original)).unwrap();
        assert!(json.contains("\"status\":\"success\""));
    }
}
