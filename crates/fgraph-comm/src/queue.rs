// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-consumer message queue.
//!
//! Decouples the producer (receive loop, fan-out) from the consumer
//! (upstream dispatch, socket writes). One task drains the queue in FIFO
//! order, so messages handed to one queue are delivered in the order they
//! were enqueued.

use crate::error::{CommError, CommResult};
use crate::identity::ConnectionId;
use crate::message::Message;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace};

/// Consumer side of a [`MessageQueue`].
pub trait MessageSink: Send + Sync + 'static {
    /// Handle one dequeued message.
    fn deliver(&self, msg: Message) -> impl Future<Output = ()> + Send;
}

/// FIFO queue drained by a dedicated task.
pub struct MessageQueue {
    owner: ConnectionId,
    tx: mpsc::UnboundedSender<Message>,
    closed: Arc<AtomicBool>,
    stop: Arc<Notify>,
}

impl MessageQueue {
    /// Create a queue and spawn its consumer task.
    ///
    /// `owner` names the connection the queue belongs to, for errors and logs.
    pub fn spawn<S: MessageSink>(owner: ConnectionId, label: &'static str, sink: Arc<S>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let closed = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(Notify::new());

        let task_owner = owner.clone();
        let task_stop = stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = task_stop.notified() => break,
                    next = rx.recv() => match next {
                        Some(msg) => {
                            trace!("{} queue {}: delivering {}", label, task_owner, msg.id);
                            sink.deliver(msg).await;
                        }
                        None => break,
                    },
                }
            }
            debug!("{} queue {} stopped", label, task_owner);
        });

        Self {
            owner,
            tx,
            closed,
            stop,
        }
    }

    /// Append a message.
    pub fn enqueue(&self, msg: Message) -> CommResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CommError::ConnectionClosed(self.owner.clone()));
        }
        self.tx
            .send(msg)
            .map_err(|_| CommError::ConnectionClosed(self.owner.clone()))
    }

    /// Stop the consumer. Messages still queued are discarded.
    ///
    /// Safe to call from inside the consumer's own `deliver`.
    pub fn terminate(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.stop.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn owner(&self) -> &ConnectionId {
        &self.owner
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::identity::MessageId;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Records delivered message IDs.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) seen: Mutex<Vec<MessageId>>,
    }

    impl MessageSink for RecordingSink {
        async fn deliver(&self, msg: Message) {
            self.seen.lock().push(msg.id);
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_fifo_delivery() {
        let sink = Arc::new(RecordingSink::default());
        let queue = MessageQueue::spawn(ConnectionId::from("CH1"), "test", sink.clone());

        let msgs: Vec<Message> = (0..100)
            .map(|i| Message::application(format!("m{}", i), Vec::new()))
            .collect();
        for m in &msgs {
            queue.enqueue(m.clone()).unwrap();
        }
        settle().await;

        let seen = sink.seen.lock().clone();
        let expected: Vec<MessageId> = msgs.iter().map(|m| m.id.clone()).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_enqueue_after_terminate_fails() {
        let sink = Arc::new(RecordingSink::default());
        let queue = MessageQueue::spawn(ConnectionId::from("CH1"), "test", sink.clone());

        queue.terminate();
        queue.terminate();
        assert!(queue.is_closed());

        let err = queue
            .enqueue(Message::application("late", Vec::new()))
            .unwrap_err();
        assert!(matches!(err, CommError::ConnectionClosed(_)));

        settle().await;
        assert!(sink.seen.lock().is_empty());
    }

    struct SelfStoppingSink {
        queue: Mutex<Option<Arc<MessageQueue>>>,
        delivered: Mutex<usize>,
    }

    impl MessageSink for SelfStoppingSink {
        async fn deliver(&self, _msg: Message) {
            *self.delivered.lock() += 1;
            if let Some(q) = self.queue.lock().as_ref() {
                q.terminate();
            }
        }
    }

    #[tokio::test]
    async fn test_terminate_from_consumer() {
        let sink = Arc::new(SelfStoppingSink {
            queue: Mutex::new(None),
            delivered: Mutex::new(0),
        });
        let queue = Arc::new(MessageQueue::spawn(
            ConnectionId::from("CH1"),
            "test",
            sink.clone(),
        ));
        *sink.queue.lock() = Some(queue.clone());

        queue.enqueue(Message::application("a", Vec::new())).unwrap();
        settle().await;

        assert!(queue.is_closed());
        assert_eq!(*sink.delivered.lock(), 1);

        // Break the test-only cycle
        sink.queue.lock().take();
    }
}
