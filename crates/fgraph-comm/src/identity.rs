// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection and message identities.
//!
//! Identities are opaque strings built from the host address, wall-clock
//! time, a random nonce and a process-wide counter, folded through CRC32.
//! They are unique keys, not secrets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Unique ID of one peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

/// Unique ID of one message, used to correlate acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl ConnectionId {
    /// Generate a fresh connection ID.
    pub fn generate() -> Self {
        Self(unique_tag("CH"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl MessageId {
    /// Generate a fresh message ID.
    pub fn generate() -> Self {
        Self(unique_tag("M"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_id_impls {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id_impls!(ConnectionId);
string_id_impls!(MessageId);

/// Local host address, resolved once.
fn host_address() -> &'static str {
    static HOST: OnceLock<String> = OnceLock::new();
    HOST.get_or_init(|| {
        local_ip_address::local_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|_| "127.0.0.1".to_string())
    })
}

fn unique_tag(prefix: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let nonce = fastrand::u32(..);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);

    let banner = format!("{}:{}:{}:{}:{}", prefix, host_address(), millis, nonce, seq);
    let mut crc = flate2::Crc::new();
    crc.update(banner.as_bytes());

    format!("{}{:08x}-{}-{}", prefix, crc.sum(), millis, seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_connection_ids_are_distinct() {
        let ids: HashSet<ConnectionId> = (0..10_000).map(|_| ConnectionId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_connection_ids_distinct_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..1_000)
                        .map(|_| ConnectionId::generate())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(all.insert(id), "duplicate connection ID");
            }
        }
        assert_eq!(all.len(), 8_000);
    }

    #[test]
    fn test_prefixes() {
        assert!(ConnectionId::generate().as_str().starts_with("CH"));
        assert!(MessageId::generate().as_str().starts_with('M'));
    }

    #[test]
    fn test_serde_transparent() {
        let id = MessageId::from("M42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"M42\"");
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
