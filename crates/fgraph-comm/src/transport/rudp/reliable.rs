// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sliding-window sender and in-order receiver.
//!
//! Pure state machines: no I/O, time passed in by the caller. The stream
//! driver feeds them datagrams and transmits what they hand back.
//!
//! ## Sender Side
//!
//! ```ignore
//! let mut sender = ReliableSender::new(&config);
//! if sender.window_available() {
//!     sender.push(chunk);
//! }
//! while let Some(pkt) = sender.poll_transmit(Instant::now()) {
//!     socket.send_to(&pkt.encode(), peer).await?;
//! }
//! sender.on_ack(next_expected);
//! ```
//!
//! ## Receiver Side
//!
//! ```ignore
//! if let Some(data) = receiver.on_data(seq, payload) {
//!     app.write_all(&data).await?;
//! }
//! send(Packet::ack(receiver.next_expected()));
//! ```

use super::packet::Packet;
use crate::config::RudpConfig;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// DATA packet awaiting acknowledgement.
#[derive(Debug, Clone)]
struct InFlight {
    seq: u32,
    data: Vec<u8>,
    /// `None` until first transmission.
    last_sent: Option<Instant>,
    /// Retransmissions so far.
    retries: u32,
}

/// Sender statistics.
#[derive(Debug, Default, Clone)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub retransmits: u64,
    pub packets_acked: u64,
}

/// Sliding-window sender.
#[derive(Debug)]
pub struct ReliableSender {
    window_size: usize,
    timeout: Duration,
    max_retries: u32,
    next_seq: u32,
    in_flight: VecDeque<InFlight>,
    failed: bool,
    stats: SenderStats,
}

impl ReliableSender {
    pub fn new(config: &RudpConfig) -> Self {
        Self {
            window_size: config.window_size as usize,
            timeout: config.retransmit_timeout(),
            max_retries: config.max_retries,
            next_seq: 0,
            in_flight: VecDeque::new(),
            failed: false,
            stats: SenderStats::default(),
        }
    }

    /// Whether another packet fits in the window.
    pub fn window_available(&self) -> bool {
        self.in_flight.len() < self.window_size
    }

    /// Queue a chunk; returns its sequence number.
    ///
    /// Callers check [`window_available`](Self::window_available) first.
    pub fn push(&mut self, data: Vec<u8>) -> u32 {
        let seq = self.next_seq;
        self.next_seq = seq.wrapping_add(1);
        self.in_flight.push_back(InFlight {
            seq,
            data,
            last_sent: None,
            retries: 0,
        });
        seq
    }

    /// Next packet to (re)transmit at `now`, if any.
    ///
    /// A packet whose last retransmission timed out marks the sender failed.
    pub fn poll_transmit(&mut self, now: Instant) -> Option<Packet> {
        for msg in self.in_flight.iter_mut() {
            match msg.last_sent {
                None => {
                    msg.last_sent = Some(now);
                    self.stats.packets_sent += 1;
                    return Some(Packet::data(msg.seq, msg.data.clone()));
                }
                Some(sent) if now.duration_since(sent) >= self.timeout => {
                    if msg.retries >= self.max_retries {
                        self.failed = true;
                        return None;
                    }
                    msg.last_sent = Some(now);
                    msg.retries += 1;
                    self.stats.retransmits += 1;
                    return Some(Packet::data(msg.seq, msg.data.clone()));
                }
                Some(_) => {}
            }
        }
        None
    }

    /// Handle a cumulative ACK. Returns how many packets it released.
    pub fn on_ack(&mut self, next_expected: u32) -> usize {
        let mut released = 0;
        while let Some(front) = self.in_flight.front() {
            if seq_lt(front.seq, next_expected) {
                self.in_flight.pop_front();
                released += 1;
            } else {
                break;
            }
        }
        self.stats.packets_acked += released as u64;
        released
    }

    /// Earliest time a retransmission may become due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.in_flight
            .iter()
            .filter_map(|m| m.last_sent)
            .min()
            .map(|t| t + self.timeout)
    }

    /// A packet exhausted its retries.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Nothing left to deliver.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }
}

/// Receiver statistics.
#[derive(Debug, Default, Clone)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub packets_delivered: u64,
    pub duplicates_dropped: u64,
    pub out_of_order_dropped: u64,
}

/// In-order receiver.
#[derive(Debug, Default)]
pub struct ReliableReceiver {
    next_expected: u32,
    stats: ReceiverStats,
}

impl ReliableReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a DATA packet.
    ///
    /// Returns the payload if it is the next one in order. Duplicates and
    /// packets past a gap return `None`; either way the caller ACKs with
    /// [`next_expected`](Self::next_expected).
    pub fn on_data(&mut self, seq: u32, data: Vec<u8>) -> Option<Vec<u8>> {
        self.stats.packets_received += 1;

        if seq == self.next_expected {
            self.next_expected = self.next_expected.wrapping_add(1);
            self.stats.packets_delivered += 1;
            Some(data)
        } else if seq_lt(seq, self.next_expected) {
            self.stats.duplicates_dropped += 1;
            None
        } else {
            self.stats.out_of_order_dropped += 1;
            None
        }
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }
}

/// `a < b` in sequence space (handles wraparound).
fn seq_lt(a: u32, b: u32) -> bool {
    a != b && b.wrapping_sub(a) < 0x8000_0000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::rudp::PacketKind;

    fn config(window: u32, retries: u32) -> RudpConfig {
        RudpConfig {
            window_size: window,
            retransmit_timeout_ms: 100,
            max_retries: retries,
            ..Default::default()
        }
    }

    #[test]
    fn test_window_limits_in_flight() {
        let mut sender = ReliableSender::new(&config(2, 3));
        sender.push(b"a".to_vec());
        assert!(sender.window_available());
        sender.push(b"b".to_vec());
        assert!(!sender.window_available());

        assert_eq!(sender.on_ack(1), 1);
        assert!(sender.window_available());
        assert_eq!(sender.in_flight(), 1);
    }

    #[test]
    fn test_initial_send_then_retransmit_after_timeout() {
        let mut sender = ReliableSender::new(&config(4, 3));
        let t0 = Instant::now();
        sender.push(b"hello".to_vec());

        let pkt = sender.poll_transmit(t0).unwrap();
        assert_eq!(pkt.kind, PacketKind::Data);
        assert_eq!(pkt.seq, 0);
        assert!(sender.poll_transmit(t0).is_none());

        // Lost; not yet due
        assert!(sender.poll_transmit(t0 + Duration::from_millis(50)).is_none());
        assert_eq!(
            sender.next_deadline(),
            Some(t0 + Duration::from_millis(100))
        );

        let again = sender.poll_transmit(t0 + Duration::from_millis(100)).unwrap();
        assert_eq!(again.seq, 0);
        assert_eq!(again.payload, b"hello");
        assert_eq!(sender.stats().retransmits, 1);
    }

    #[test]
    fn test_fails_after_max_retries() {
        let mut sender = ReliableSender::new(&config(4, 2));
        let mut now = Instant::now();
        sender.push(b"x".to_vec());

        assert!(sender.poll_transmit(now).is_some());
        for _ in 0..2 {
            now += Duration::from_millis(100);
            assert!(sender.poll_transmit(now).is_some());
        }
        assert!(!sender.has_failed());

        now += Duration::from_millis(100);
        assert!(sender.poll_transmit(now).is_none());
        assert!(sender.has_failed());
    }

    #[test]
    fn test_cumulative_ack_releases_prefix() {
        let mut sender = ReliableSender::new(&config(8, 3));
        let now = Instant::now();
        for i in 0..5u8 {
            sender.push(vec![i]);
        }
        while sender.poll_transmit(now).is_some() {}

        assert_eq!(sender.on_ack(3), 3);
        assert_eq!(sender.in_flight(), 2);
        // Stale ACK changes nothing
        assert_eq!(sender.on_ack(2), 0);
        assert_eq!(sender.on_ack(5), 2);
        assert!(sender.is_idle());
    }

    #[test]
    fn test_receiver_in_order_only() {
        let mut rx = ReliableReceiver::new();

        assert_eq!(rx.on_data(0, b"a".to_vec()), Some(b"a".to_vec()));
        // Gap: 2 before 1
        assert_eq!(rx.on_data(2, b"c".to_vec()), None);
        assert_eq!(rx.next_expected(), 1);
        assert_eq!(rx.on_data(1, b"b".to_vec()), Some(b"b".to_vec()));
        // Duplicate
        assert_eq!(rx.on_data(0, b"a".to_vec()), None);
        assert_eq!(rx.next_expected(), 2);

        let stats = rx.stats();
        assert_eq!(stats.packets_delivered, 2);
        assert_eq!(stats.duplicates_dropped, 1);
        assert_eq!(stats.out_of_order_dropped, 1);
    }

    #[test]
    fn test_lost_packet_recovered() {
        let cfg = config(4, 5);
        let mut sender = ReliableSender::new(&cfg);
        let mut rx = ReliableReceiver::new();
        let t0 = Instant::now();

        sender.push(b"one".to_vec());
        sender.push(b"two".to_vec());

        let first = sender.poll_transmit(t0).unwrap();
        let _lost = sender.poll_transmit(t0).unwrap();

        let mut delivered = Vec::new();
        delivered.extend(rx.on_data(first.seq, first.payload).unwrap_or_default());
        sender.on_ack(rx.next_expected());

        let resent = sender.poll_transmit(t0 + cfg.retransmit_timeout()).unwrap();
        assert_eq!(resent.seq, 1);
        delivered.extend(rx.on_data(resent.seq, resent.payload).unwrap_or_default());
        sender.on_ack(rx.next_expected());

        assert_eq!(delivered, b"onetwo");
        assert!(sender.is_idle());
    }

    #[test]
    fn test_seq_wraparound() {
        assert!(seq_lt(u32::MAX, 0));
        assert!(seq_lt(5, 6));
        assert!(!seq_lt(6, 5));
        assert!(!seq_lt(7, 7));
    }
}
