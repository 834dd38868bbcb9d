// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mw-wire: MLLP framing for HL7 v2 transport.
//!
//! MLLP wraps each message as `<SB>payload<EB><CR>` where SB is 0x0B,
//! EB is 0x1C, and CR is 0x0D. Real-world senders are sloppy: bytes may
//! arrive before the start block (keepalives, stray whitespace) and some
//! widely deployed producers omit the trailing CR. The reader tolerates
//! both.

use bytes::Bytes;
use std::io::ErrorKind;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Start Block (vertical tab).
pub const START_BLOCK: u8 = 0x0b;
/// End Block (file separator).
pub const END_BLOCK: u8 = 0x1c;
/// Trailing carriage return.
pub const CARRIAGE_RETURN: u8 = 0x0d;

/// How long to wait for the optional CR after an end block.
const CR_PEEK_TIMEOUT: Duration = Duration::from_millis(100);

/// Errors from MLLP framing and transport.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("missing MLLP start block (0x0B)")]
    MissingStartBlock,

    #[error("missing MLLP end block (0x1C)")]
    MissingEndBlock,

    #[error("frame exceeds maximum size of {max} bytes")]
    TooLarge { max: usize },

    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed {0}")]
    ConnectionClosed(&'static str),

    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
}

impl FrameError {
    /// Frame-level errors leave the connection usable; the reader should
    /// log and continue. Everything else terminates the connection loop.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            FrameError::MissingStartBlock
                | FrameError::MissingEndBlock
                | FrameError::TooLarge { .. }
        )
    }
}

/// Wrap a payload in MLLP framing. Pure.
pub fn wrap(payload: &[u8]) -> Bytes {
    let mut framed = Vec::with_capacity(payload.len() + 3);
    framed.push(START_BLOCK);
    framed.extend_from_slice(payload);
    framed.push(END_BLOCK);
    framed.push(CARRIAGE_RETURN);
    Bytes::from(framed)
}

/// Unwrap a complete MLLP frame. Pure.
///
/// Accepts both `<SB>…<EB><CR>` and the non-compliant `<SB>…<EB>` form.
pub fn unwrap(data: &[u8]) -> Result<&[u8], FrameError> {
    let rest = data.strip_prefix(&[START_BLOCK]).ok_or(FrameError::MissingStartBlock)?;
    if let Some(payload) = rest.strip_suffix(&[END_BLOCK, CARRIAGE_RETURN]) {
        return Ok(payload);
    }
    rest.strip_suffix(&[END_BLOCK]).ok_or(FrameError::MissingEndBlock)
}

async fn read_byte<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
    closed_while: &'static str,
) -> Result<u8, FrameError> {
    match tokio::time::timeout(timeout, reader.read_u8()).await {
        Err(_) => Err(FrameError::Timeout(timeout)),
        Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => {
            Err(FrameError::ConnectionClosed(closed_while))
        }
        Ok(Err(e)) => Err(FrameError::Connection(e)),
        Ok(Ok(byte)) => Ok(byte),
    }
}

/// Read one complete MLLP frame, returning the unwrapped payload.
///
/// Bytes before the start block are discarded. After an end block the
/// reader peeks briefly for the optional CR; absence of the CR still
/// completes the frame. `read_timeout` bounds each read; `max_size`
/// bounds the accumulated payload.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    read_timeout: Duration,
    max_size: usize,
) -> Result<Bytes, FrameError> {
    // Scan to the start block.
    loop {
        let byte = read_byte(reader, read_timeout, "while waiting for start block").await?;
        if byte == START_BLOCK {
            break;
        }
    }

    let mut buf: Vec<u8> = Vec::new();
    loop {
        let byte = read_byte(reader, read_timeout, "while reading message").await?;
        buf.push(byte);
        if buf.len() > max_size {
            return Err(FrameError::TooLarge { max: max_size });
        }

        if buf.len() >= 2
            && buf[buf.len() - 2] == END_BLOCK
            && buf[buf.len() - 1] == CARRIAGE_RETURN
        {
            buf.truncate(buf.len() - 2);
            return Ok(Bytes::from(buf));
        }

        if buf.last() == Some(&END_BLOCK) {
            // Peek for the CR; a sender that omits it stays compatible.
            match tokio::time::timeout(CR_PEEK_TIMEOUT, reader.read_u8()).await {
                Ok(Ok(CARRIAGE_RETURN)) | Err(_) => {
                    buf.pop();
                    return Ok(Bytes::from(buf));
                }
                Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    buf.pop();
                    return Ok(Bytes::from(buf));
                }
                Ok(Err(e)) => return Err(FrameError::Connection(e)),
                Ok(Ok(other)) => {
                    // Not a CR: the end block was payload content.
                    buf.push(other);
                    if buf.len() > max_size {
                        return Err(FrameError::TooLarge { max: max_size });
                    }
                }
            }
        }
    }
}

/// Wrap, write, and flush a payload within the deadline.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    timeout: Duration,
) -> Result<(), FrameError> {
    let framed = wrap(payload);
    tokio::time::timeout(timeout, async {
        writer.write_all(&framed).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| FrameError::Timeout(timeout))?
    .map_err(FrameError::Connection)
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
