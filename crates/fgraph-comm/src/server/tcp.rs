// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP server.

use super::{bind_probing, server_uri, ACCEPT_BACKOFF};
use crate::config::CommConfig;
use crate::error::CommResult;
use crate::message_handler::MessageHandler;
use crate::transport::TransportKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Accepts TCP connections into a hub.
pub struct TcpServer {
    local_addr: SocketAddr,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl TcpServer {
    /// Bind and start accepting.
    pub async fn start(config: &CommConfig, hub: MessageHandler) -> CommResult<Self> {
        let listener =
            bind_probing(config, TransportKind::Tcp, |addr| TcpListener::bind(addr)).await?;
        let local_addr = listener.local_addr()?;
        info!("TCP server listening on {}", local_addr);

        let shutdown = Arc::new(Notify::new());
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(Self::accept_loop(
            listener,
            local_addr,
            hub,
            shutdown.clone(),
            running.clone(),
        ));

        Ok(Self {
            local_addr,
            shutdown,
            running,
            task,
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        local_addr: SocketAddr,
        hub: MessageHandler,
        shutdown: Arc<Notify>,
        running: Arc<AtomicBool>,
    ) {
        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, peer_addr)) => {
                        debug!("TCP connection from {}", peer_addr);
                        hub.attach_tcp(stream);
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = shutdown.notified() => {
                    info!("TCP server on {} stopping", local_addr);
                    break;
                }
            }
        }
        running.store(false, Ordering::Release);
    }

    /// Stop accepting and release the listening socket.
    ///
    /// Established connections stay registered with the hub.
    pub fn stop_running(&self) {
        self.shutdown.notify_one();
    }

    /// Stop and wait until the socket is released.
    pub async fn shutdown(mut self) {
        self.stop_running();
        let _ = (&mut self.task).await;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `tcp://host:port` for peers to connect to.
    pub fn server_uri(&self) -> String {
        server_uri(TransportKind::Tcp, self.local_addr)
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop_running();
    }
}
