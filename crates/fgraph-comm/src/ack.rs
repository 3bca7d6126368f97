// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pending acknowledgement table.
//!
//! A blocking send registers a oneshot waiter under the message ID before
//! the frame is written. The receive loop resolves it when the correlated
//! ACK arrives. Entries leave the table exactly once: on resolve, on
//! timeout, or when the connection is torn down.

use crate::error::{CommError, CommResult};
use crate::identity::MessageId;
use crate::message::{AckMessage, AckStatus};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Outcome of waiting on a pending acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// ACK arrived with this status.
    Acked(AckStatus),
    /// No ACK within the timeout.
    TimedOut,
    /// Waiter was dropped because the table was cleared.
    Dropped,
}

/// Handle returned by [`AckTable::register`].
#[derive(Debug)]
pub struct AckWaiter {
    id: MessageId,
    rx: oneshot::Receiver<AckStatus>,
}

impl AckWaiter {
    pub fn message_id(&self) -> &MessageId {
        &self.id
    }
}

/// Message ID -> waiter for its acknowledgement.
#[derive(Debug, Default)]
pub struct AckTable {
    pending: DashMap<MessageId, oneshot::Sender<AckStatus>>,
}

impl AckTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`.
    ///
    /// Fails if a waiter for the same ID is already pending.
    pub fn register(&self, id: MessageId) -> CommResult<AckWaiter> {
        let (tx, rx) = oneshot::channel();
        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => Err(CommError::DuplicateWait(id)),
            Entry::Vacant(slot) => {
                slot.insert(tx);
                Ok(AckWaiter { id, rx })
            }
        }
    }

    /// Deliver an acknowledgement.
    ///
    /// Returns `false` if nobody was waiting for it (late, replayed or
    /// unsolicited ACK).
    pub fn resolve(&self, ack: AckMessage) -> bool {
        match self.pending.remove(&ack.reference_id) {
            Some((_, tx)) => {
                trace!(
                    "ACK for {} resolved (success: {})",
                    ack.reference_id,
                    ack.status.is_success()
                );
                // Receiver may have just timed out
                tx.send(ack.status).is_ok()
            }
            None => {
                debug!("No waiter for ACK of {}", ack.reference_id);
                false
            }
        }
    }

    /// Wait for the acknowledgement, bounded by `timeout`.
    pub async fn wait(&self, waiter: AckWaiter, timeout: Duration) -> AckOutcome {
        let AckWaiter { id, rx } = waiter;

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(status)) => AckOutcome::Acked(status),
            Ok(Err(_)) => AckOutcome::Dropped,
            Err(_) => AckOutcome::TimedOut,
        };

        self.pending.remove(&id);
        outcome
    }

    /// Forget a waiter without resolving it.
    pub fn cancel(&self, id: &MessageId) {
        self.pending.remove(id);
    }

    /// Drop every waiter; each pending wait completes with `Dropped`.
    pub fn clear(&self) {
        self.pending.clear();
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &MessageId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn ack(id: &MessageId, status: AckStatus) -> AckMessage {
        AckMessage {
            reference_id: id.clone(),
            status,
        }
    }

    #[tokio::test]
    async fn test_resolve_before_timeout() {
        let table = Arc::new(AckTable::new());
        let id = MessageId::from("M1");
        let waiter = table.register(id.clone()).unwrap();
        assert!(table.contains(&id));

        let t = table.clone();
        let id2 = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(t.resolve(ack(&id2, AckStatus::Success)));
        });

        let outcome = table.wait(waiter, Duration::from_secs(5)).await;
        assert_eq!(outcome, AckOutcome::Acked(AckStatus::Success));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_replayed_ack_is_ignored() {
        let table = AckTable::new();
        let id = MessageId::from("M1");
        let waiter = table.register(id.clone()).unwrap();

        assert!(table.resolve(ack(&id, AckStatus::Success)));
        assert!(!table.resolve(ack(&id, AckStatus::Success)));

        let outcome = table.wait(waiter, Duration::from_secs(1)).await;
        assert_eq!(outcome, AckOutcome::Acked(AckStatus::Success));
        assert!(table.is_empty());

        // Replay after the wait completed does not create an entry
        assert!(!table.resolve(ack(&id, AckStatus::Success)));
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_window() {
        let table = AckTable::new();
        let id = MessageId::from("M1");
        let waiter = table.register(id.clone()).unwrap();

        let start = Instant::now();
        let outcome = table.wait(waiter, Duration::from_millis(6000)).await;
        let elapsed = start.elapsed();

        assert_eq!(outcome, AckOutcome::TimedOut);
        assert!(elapsed >= Duration::from_millis(6000));
        assert!(elapsed < Duration::from_millis(6100));
        assert!(!table.contains(&id));
    }

    #[tokio::test]
    async fn test_duplicate_register_rejected() {
        let table = AckTable::new();
        let id = MessageId::from("M1");
        let _waiter = table.register(id.clone()).unwrap();

        let err = table.register(id.clone()).unwrap_err();
        assert!(matches!(err, CommError::DuplicateWait(_)));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_drops_waiters() {
        let table = AckTable::new();
        let waiter = table.register(MessageId::from("M1")).unwrap();
        table.clear();

        let outcome = table.wait(waiter, Duration::from_secs(1)).await;
        assert_eq!(outcome, AckOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_error_status_delivered() {
        let table = AckTable::new();
        let id = MessageId::from("M7");
        let waiter = table.register(id.clone()).unwrap();
        table.resolve(ack(
            &id,
            AckStatus::Error {
                message: "vertex exists".into(),
            },
        ));

        match table.wait(waiter, Duration::from_secs(1)).await {
            AckOutcome::Acked(AckStatus::Error { message }) => assert_eq!(message, "vertex exists"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
