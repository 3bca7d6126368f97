// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Carriers and peer addressing.
//!
//! Two carriers move frames: plain TCP and reliable UDP. Peers are named
//! by URI, `tcp://host:port` or `rudp://host:port`.

pub mod rudp;

use crate::error::{CommError, CommResult};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Carrier of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Tcp,
    Rudp,
}

impl TransportKind {
    /// URI scheme of this carrier.
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Rudp => "rudp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Parsed `scheme://host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerUri {
    pub transport: TransportKind,
    pub host: String,
    pub port: u16,
}

impl PeerUri {
    pub fn new(transport: TransportKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            transport,
            host: host.into(),
            port,
        }
    }

    /// Resolve the host to a socket address.
    pub async fn resolve(&self) -> CommResult<SocketAddr> {
        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port)).await?;
        addrs
            .next()
            .ok_or_else(|| CommError::InvalidUri(format!("Cannot resolve {}", self)))
    }
}

impl FromStr for PeerUri {
    type Err = CommError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| CommError::InvalidUri(format!("Missing scheme: {}", s)))?;

        let transport = match scheme.to_ascii_lowercase().as_str() {
            "tcp" => TransportKind::Tcp,
            "rudp" => TransportKind::Rudp,
            other => {
                return Err(CommError::InvalidUri(format!(
                    "Unsupported scheme '{}' in {}",
                    other, s
                )))
            }
        };

        let rest = rest.trim_end_matches('/');
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| CommError::InvalidUri(format!("Missing port: {}", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(CommError::InvalidUri(format!("Missing host: {}", s)));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| CommError::InvalidUri(format!("Invalid port in {}", s)))?;

        Ok(Self::new(transport, host, port))
    }
}

impl fmt::Display for PeerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.transport, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.transport, self.host, self.port)
        }
    }
}

/// Address peers should use to reach a socket bound to `local`.
///
/// An unspecified bind address is replaced by the local interface address.
pub fn advertised_ip(local: SocketAddr) -> IpAddr {
    let ip = local.ip();
    if !ip.is_unspecified() {
        return ip;
    }
    local_ip_address::local_ip().unwrap_or(IpAddr::from([127, 0, 0, 1]))
}
