// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram layout.
//!
//! ```text
//! +-------+------+-------------+-----------+
//! | 0xF6  | kind | seq (4B BE) | payload   |
//! +-------+------+-------------+-----------+
//! ```
//!
//! For DATA, `seq` is the packet sequence number. For ACK it is the next
//! sequence the receiver expects (cumulative). SYN, SYN_ACK and FIN carry 0.

use super::RudpError;

/// First byte of every datagram.
pub const MAGIC: u8 = 0xF6;

/// Header size in bytes.
pub const HEADER_LEN: usize = 6;

/// Packet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Syn = 1,
    SynAck = 2,
    Data = 3,
    Ack = 4,
    Fin = 5,
}

impl TryFrom<u8> for PacketKind {
    type Error = RudpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Syn),
            2 => Ok(Self::SynAck),
            3 => Ok(Self::Data),
            4 => Ok(Self::Ack),
            5 => Ok(Self::Fin),
            other => Err(RudpError::Malformed(format!("Unknown kind {}", other))),
        }
    }
}

/// One datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub seq: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn syn() -> Self {
        Self::control(PacketKind::Syn)
    }

    pub fn syn_ack() -> Self {
        Self::control(PacketKind::SynAck)
    }

    pub fn fin() -> Self {
        Self::control(PacketKind::Fin)
    }

    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        Self {
            kind: PacketKind::Data,
            seq,
            payload,
        }
    }

    /// Cumulative ACK: everything before `next_expected` has arrived.
    pub fn ack(next_expected: u32) -> Self {
        Self {
            kind: PacketKind::Ack,
            seq: next_expected,
            payload: Vec::new(),
        }
    }

    fn control(kind: PacketKind) -> Self {
        Self {
            kind,
            seq: 0,
            payload: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(MAGIC);
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RudpError> {
        if buf.len() < HEADER_LEN {
            return Err(RudpError::Malformed(format!(
                "Datagram too short: {} bytes",
                buf.len()
            )));
        }
        if buf[0] != MAGIC {
            return Err(RudpError::Malformed(format!("Bad magic 0x{:02x}", buf[0])));
        }
        let kind = PacketKind::try_from(buf[1])?;
        let seq = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
        let payload = buf[HEADER_LEN..].to_vec();

        if kind != PacketKind::Data && !payload.is_empty() {
            return Err(RudpError::Malformed(format!(
                "{:?} packet with {} byte payload",
                kind,
                payload.len()
            )));
        }

        Ok(Self { kind, seq, payload })
    }
}
