// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable UDP carrier tests over loopback.

use fgraph_comm::transport::rudp::{Packet, PacketKind};
use fgraph_comm::{RudpConfig, RudpError, RudpListener, RudpStream};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn fast_config() -> RudpConfig {
    RudpConfig {
        retransmit_timeout_ms: 30,
        max_retries: 3,
        ..Default::default()
    }
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn recv_packet(socket: &UdpSocket) -> (Packet, SocketAddr) {
    let mut buf = vec![0u8; 65_536];
    let (n, from) = timeout(WAIT, socket.recv_from(&mut buf))
        .await
        .expect("timed out")
        .unwrap();
    (Packet::decode(&buf[..n]).unwrap(), from)
}

#[tokio::test]
async fn test_bulk_transfer_in_order() {
    let config = RudpConfig::default();
    let listener = RudpListener::bind(loopback(), config.clone()).await.unwrap();

    let client = RudpStream::connect(listener.local_addr(), &config)
        .await
        .unwrap();
    let (mut server, peer) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    assert_eq!(peer.port(), client.local_addr().port());

    // Many packets' worth, in both directions
    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let (mut rd, mut wr) = tokio::io::split(client);

    let expected = data.clone();
    let writer = tokio::spawn(async move {
        wr.write_all(&data).await.unwrap();
        wr.flush().await.unwrap();
        wr
    });

    let mut received = vec![0u8; expected.len()];
    timeout(WAIT, server.read_exact(&mut received))
        .await
        .expect("timed out")
        .unwrap();
    assert_eq!(received, expected);

    server.write_all(b"done").await.unwrap();
    let mut reply = [0u8; 4];
    timeout(WAIT, rd.read_exact(&mut reply))
        .await
        .expect("timed out")
        .unwrap();
    assert_eq!(&reply, b"done");

    writer.await.unwrap();
}

#[tokio::test]
async fn test_close_reads_as_eof() {
    let config = RudpConfig::default();
    let listener = RudpListener::bind(loopback(), config.clone()).await.unwrap();

    let mut client = RudpStream::connect(listener.local_addr(), &config)
        .await
        .unwrap();
    let (mut server, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();

    client.write_all(b"last words").await.unwrap();
    client.shutdown().await.unwrap();

    let mut buf = Vec::new();
    timeout(WAIT, server.read_to_end(&mut buf))
        .await
        .expect("timed out")
        .unwrap();
    assert_eq!(buf, b"last words");
}

#[tokio::test]
async fn test_handshake_times_out() {
    // Bound but silent: no SYN_ACK, no ICMP
    let silent = UdpSocket::bind(loopback()).await.unwrap();
    let config = fast_config();

    let err = RudpStream::connect(silent.local_addr().unwrap(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, RudpError::HandshakeTimeout(_)));
}

#[tokio::test]
async fn test_retransmits_lost_data() {
    let peer = UdpSocket::bind(loopback()).await.unwrap();
    let addr = peer.local_addr().unwrap();
    let config = fast_config();

    let connect = tokio::spawn(async move { RudpStream::connect(addr, &config).await });

    let (syn, client_addr) = recv_packet(&peer).await;
    assert_eq!(syn.kind, PacketKind::Syn);
    peer.send_to(&Packet::syn_ack().encode(), client_addr)
        .await
        .unwrap();
    let mut client = connect.await.unwrap().unwrap();

    client.write_all(b"hello").await.unwrap();

    // First copy "lost": ignore it and wait for the retransmission
    let mut copies = 0;
    loop {
        let (pkt, _) = recv_packet(&peer).await;
        if pkt.kind != PacketKind::Data {
            continue;
        }
        assert_eq!(pkt.seq, 0);
        assert_eq!(pkt.payload, b"hello");
        copies += 1;
        if copies == 2 {
            break;
        }
    }
    peer.send_to(&Packet::ack(1).encode(), client_addr)
        .await
        .unwrap();

    // Peer data reaches the client in order, duplicates are re-acknowledged
    peer.send_to(&Packet::data(0, b"hi".to_vec()).encode(), client_addr)
        .await
        .unwrap();
    peer.send_to(&Packet::data(0, b"hi".to_vec()).encode(), client_addr)
        .await
        .unwrap();

    let mut buf = [0u8; 2];
    timeout(WAIT, client.read_exact(&mut buf))
        .await
        .expect("timed out")
        .unwrap();
    assert_eq!(&buf, b"hi");

    let mut acks = 0;
    while acks < 2 {
        let (pkt, _) = recv_packet(&peer).await;
        if pkt.kind == PacketKind::Ack && pkt.seq == 1 {
            acks += 1;
        }
    }
}

#[tokio::test]
async fn test_fails_after_retries_exhausted() {
    let peer = UdpSocket::bind(loopback()).await.unwrap();
    let addr = peer.local_addr().unwrap();
    let config = fast_config();

    let connect = tokio::spawn(async move { RudpStream::connect(addr, &config).await });
    let (_, client_addr) = recv_packet(&peer).await;
    peer.send_to(&Packet::syn_ack().encode(), client_addr)
        .await
        .unwrap();
    let mut client = connect.await.unwrap().unwrap();

    // Never acknowledged
    client.write_all(b"into the void").await.unwrap();

    let mut buf = Vec::new();
    let n = timeout(WAIT, client.read_to_end(&mut buf))
        .await
        .expect("link never failed")
        .unwrap();
    assert_eq!(n, 0);
}
