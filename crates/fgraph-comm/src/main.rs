// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FGraph messaging CLI
//!
//! # Usage
//!
//! ```bash
//! # Run a hub on TCP and reliable UDP, probing from port 4800
//! fgraph-comm serve
//!
//! # Fixed port, TCP only
//! fgraph-comm serve --port 5000 --no-rudp
//!
//! # Send one message, wait for the hub's acknowledgement
//! fgraph-comm send tcp://127.0.0.1:5000 --kind vertex_added --payload v1
//!
//! # Watch relayed traffic as a thin client
//! fgraph-comm listen rudp://127.0.0.1:4800 --thin
//!
//! # Configuration file
//! fgraph-comm gen-config -o fgraph-comm.toml
//! fgraph-comm --config fgraph-comm.toml serve
//! ```

use clap::{Parser, Subcommand};
use fgraph_comm::{
    ChannelListener, ClientMode, CommConfig, CommEvent, ControlMessage, Message, MessageBody,
    MessageHandler, RudpServer, TcpServer,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// FGraph peer messaging dispatcher
#[derive(Parser, Debug)]
#[command(name = "fgraph-comm")]
#[command(about = "FGraph peer messaging - hub, sender and listener over TCP and reliable UDP")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a hub that acknowledges and relays every message
    Serve {
        /// Address to bind to
        #[arg(short, long)]
        bind: Option<IpAddr>,

        /// Port to listen on (0 = probe from port_probe_base)
        #[arg(short, long)]
        port: Option<u16>,

        /// Disable the TCP server
        #[arg(long)]
        no_tcp: bool,

        /// Disable the reliable UDP server
        #[arg(long)]
        no_rudp: bool,
    },

    /// Send one message and wait for its acknowledgement
    Send {
        /// Hub URI (tcp://host:port or rudp://host:port)
        uri: String,

        /// Message kind
        #[arg(short, long, default_value = "ping")]
        kind: String,

        /// Message payload (UTF-8)
        #[arg(long, default_value = "")]
        payload: String,

        /// Announce this client as thin
        #[arg(long)]
        thin: bool,
    },

    /// Connect to a hub and print relayed messages
    Listen {
        /// Hub URI (tcp://host:port or rudp://host:port)
        uri: String,

        /// Announce this client as thin
        #[arg(long)]
        thin: bool,
    },

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "fgraph-comm.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => CommConfig::from_file(path)?,
        None => CommConfig::default(),
    };
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    // Initialize logging
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Commands::Serve {
            bind,
            port,
            no_tcp,
            no_rudp,
        } => {
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            if let Some(port) = port {
                config.port = port;
            }
            config.enable_tcp &= !no_tcp;
            config.enable_rudp &= !no_rudp;
            config.validate()?;
            cmd_serve(config).await
        }
        Commands::Send {
            uri,
            kind,
            payload,
            thin,
        } => cmd_send(config, &uri, kind, payload, thin).await,
        Commands::Listen { uri, thin } => cmd_listen(config, &uri, thin).await,
        Commands::GenConfig { output } => cmd_gen_config(output),
        Commands::Validate { path } => cmd_validate(path),
    }
}

async fn cmd_serve(config: CommConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (listener, mut events) = ChannelListener::new();
    let hub = MessageHandler::new(Arc::new(listener), &config);

    let tcp = if config.enable_tcp {
        Some(TcpServer::start(&config, hub.clone()).await?)
    } else {
        None
    };
    let rudp = if config.enable_rudp {
        Some(RudpServer::start(&config, hub.clone()).await?)
    } else {
        None
    };

    println!("FGraph Messaging Hub v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    if let Some(server) = &tcp {
        println!("  {}", server.server_uri());
    }
    if let Some(server) = &rudp {
        println!("  {}", server.server_uri());
    }
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(CommEvent::Message(msg)) => relay(&hub, msg),
                Some(CommEvent::Connected(id)) => {
                    tracing::info!("Peer {} connected ({} total)", id, hub.connection_count());
                }
                Some(CommEvent::Lost(id)) => {
                    tracing::info!("Peer {} left ({} total)", id, hub.connection_count());
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    if let Some(server) = tcp {
        server.shutdown().await;
    }
    if let Some(server) = rudp {
        server.shutdown().await;
    }
    hub.close();
    Ok(())
}

/// Acknowledge to the origin, then relay to everyone else.
fn relay(hub: &MessageHandler, msg: Message) {
    let Some(origin) = msg.sender.clone() else {
        return;
    };
    if let Err(e) = hub.send_reply_to(Message::ack_success(&msg), &origin) {
        tracing::debug!("Cannot acknowledge {}: {}", msg.id, e);
    }
    let relayed = hub.send_message(msg);
    tracing::debug!("Relayed from {} to {} peers", origin, relayed);
}

async fn cmd_send(
    config: CommConfig,
    uri: &str,
    kind: String,
    payload: String,
    thin: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (listener, _events) = ChannelListener::new();
    let hub = MessageHandler::new(Arc::new(listener), &config);
    let conn = hub.connect(uri).await?;

    if thin {
        conn.send_message(&Message::control(ControlMessage::SetClientMode {
            mode: ClientMode::Thin,
        }))
        .await?;
    }

    let msg = Message::application(kind, payload.into_bytes());
    let result = conn.send_blocking_message(&msg).await;
    hub.close();

    match result {
        Ok(()) => {
            println!("{} acknowledged", msg.id);
            Ok(())
        }
        Err(e) => {
            eprintln!("{} failed: {}", msg.id, e);
            std::process::exit(1);
        }
    }
}

async fn cmd_listen(
    config: CommConfig,
    uri: &str,
    thin: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (listener, mut events) = ChannelListener::new();
    let hub = MessageHandler::new(Arc::new(listener), &config);
    let conn = hub.connect(uri).await?;

    if thin {
        conn.send_message(&Message::control(ControlMessage::SetClientMode {
            mode: ClientMode::Thin,
        }))
        .await?;
    }
    println!("Listening on {} as {}", uri, conn.id());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(CommEvent::Message(msg)) => print_message(&msg),
                Some(CommEvent::Connected(_)) => {}
                Some(CommEvent::Lost(_)) | None => {
                    println!("Connection lost");
                    break;
                }
            },
            _ = &mut ctrl_c => break,
        }
    }

    hub.close();
    Ok(())
}

fn print_message(msg: &Message) {
    match &msg.body {
        MessageBody::Application { kind, payload } => {
            println!(
                "[{}] {} ({} bytes): {}",
                msg.id,
                kind,
                payload.len(),
                String::from_utf8_lossy(payload)
            );
        }
        other => println!("[{}] {:?}", msg.id, other),
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = CommConfig {
        port: 4800,
        ..Default::default()
    };
    let toml_str = toml::to_string_pretty(&config)?;

    let content = format!(
        r#"# FGraph Messaging Configuration
# Generated by fgraph-comm gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match CommConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Bind:        {}:{}", config.bind_address, config.port);
            println!("ACK timeout: {} ms", config.ack_timeout_ms);
            println!(
                "Carriers:    {}{}",
                if config.enable_tcp { "tcp " } else { "" },
                if config.enable_rudp { "rudp" } else { "" }
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
