// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listening servers.
//!
//! Each server binds one carrier and hands every accepted connection to the
//! shared [`MessageHandler`](crate::MessageHandler).

pub mod rudp;
pub mod tcp;

pub use rudp::RudpServer;
pub use tcp::TcpServer;

use crate::config::CommConfig;
use crate::error::{CommError, CommResult};
use crate::transport::{advertised_ip, PeerUri, TransportKind};
use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::trace;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bind the configured port, or probe candidates when it is 0.
pub(crate) async fn bind_probing<T, E, F, Fut>(
    config: &CommConfig,
    kind: TransportKind,
    mut bind: F,
) -> CommResult<T>
where
    F: FnMut(SocketAddr) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    if config.port != 0 {
        let addr = SocketAddr::new(config.bind_address, config.port);
        return bind(addr)
            .await
            .map_err(|e| CommError::Bind(format!("{} {}: {}", kind, addr, e)));
    }

    let base = config.port_probe_base;
    let end = (base as u32 + config.port_probe_count as u32).min(u16::MAX as u32 + 1);
    for port in base as u32..end {
        let addr = SocketAddr::new(config.bind_address, port as u16);
        match bind(addr).await {
            Ok(bound) => return Ok(bound),
            Err(e) => trace!("{} port {} unavailable: {}", kind, port, e),
        }
    }

    Err(CommError::NoPortAvailable { base, end })
}

/// URI peers use to reach a server bound to `local`.
pub fn server_uri(kind: TransportKind, local: SocketAddr) -> String {
    PeerUri::new(kind, advertised_ip(local).to_string(), local.port()).to_string()
}
