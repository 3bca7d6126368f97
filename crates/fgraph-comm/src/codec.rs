// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefixed JSON framing, shared by every transport.
//!
//! Wire format:
//! ```text
//! +----------------+-------------------+
//! | Length (4B BE) | JSON message      |
//! +----------------+-------------------+
//! ```

use crate::error::{CommError, CommResult};
use crate::message::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read half of a transport byte stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a transport byte stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Decodes one message per frame.
pub struct FrameReader {
    inner: BoxedReader,
    max_message_size: usize,
    buffer: Vec<u8>,
}

impl FrameReader {
    pub fn new(inner: BoxedReader, max_message_size: usize) -> Self {
        Self {
            inner,
            max_message_size,
            buffer: Vec::with_capacity(4096),
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` if the stream ends cleanly before a length prefix.
    pub async fn read_message(&mut self) -> CommResult<Option<Message>> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(CommError::Io(e)),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 {
            return Err(CommError::Protocol("Empty frame".into()));
        }
        if len > self.max_message_size {
            return Err(CommError::Protocol(format!(
                "Frame too large: {} > {}",
                len, self.max_message_size
            )));
        }

        self.buffer.clear();
        self.buffer.resize(len, 0);
        self.inner.read_exact(&mut self.buffer).await?;

        let msg = serde_json::from_slice(&self.buffer)
            .map_err(|e| CommError::Protocol(format!("Invalid JSON: {}", e)))?;
        Ok(Some(msg))
    }
}

/// Encodes one message per frame.
pub struct FrameWriter {
    inner: BoxedWriter,
    max_message_size: usize,
}

impl FrameWriter {
    pub fn new(inner: BoxedWriter, max_message_size: usize) -> Self {
        Self {
            inner,
            max_message_size,
        }
    }

    /// Write one message and flush.
    pub async fn write_message(&mut self, msg: &Message) -> CommResult<()> {
        let json = encode(msg, self.max_message_size)?;
        self.write_frame(&json).await
    }

    /// Write an already encoded body and flush.
    ///
    /// Bodies that are empty or over the size limit are rejected before
    /// anything is written.
    pub async fn write_frame(&mut self, json: &[u8]) -> CommResult<()> {
        let len = frame_len(json.len(), self.max_message_size)?;
        self.inner.write_all(&len.to_be_bytes()).await?;
        self.inner.write_all(json).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut the write side down.
    pub async fn shutdown(&mut self) -> CommResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Length prefix for a body of `len` bytes.
fn frame_len(len: usize, max_message_size: usize) -> CommResult<u32> {
    if len == 0 {
        return Err(CommError::Protocol("Empty frame".into()));
    }
    if len > max_message_size {
        return Err(CommError::Protocol(format!(
            "Message too large: {} > {}",
            len, max_message_size
        )));
    }
    u32::try_from(len)
        .map_err(|_| CommError::Protocol(format!("Frame length {} exceeds u32", len)))
}

/// Serialize a message body, enforcing the size limit.
pub fn encode(msg: &Message, max_message_size: usize) -> CommResult<Vec<u8>> {
    let json = serde_json::to_vec(msg)
        .map_err(|e| CommError::Protocol(format!("Serialize error: {}", e)))?;

    if json.len() > max_message_size {
        return Err(CommError::Protocol(format!(
            "Message too large: {} > {}",
            json.len(),
            max_message_size
        )));
    }
    Ok(json)
}
