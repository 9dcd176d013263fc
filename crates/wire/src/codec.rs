// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! 0x1E-delimited frame reassembly.
//!
//! Incoming bytes are appended to a connection-local buffer; the codec
//! drains every complete frame before the delimiter and retains the
//! remainder for the next delivery. No frame boundary is ever inferred
//! from payload content.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// ASCII record separator terminating every message.
pub const DELIMITER: u8 = 0x1e;

/// Upper bound on a single buffered frame. A peer that streams more than
/// this without a delimiter is not speaking the protocol.
pub const MAX_FRAME: usize = 4 * 1024 * 1024;

/// Errors from framing and message encoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame exceeds {MAX_FRAME} bytes without a delimiter")]
    FrameTooLarge,

    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reassembles complete frames from arbitrarily split deliveries.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buf: Vec<u8>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and drain every complete frame.
    ///
    /// Frames are returned without the trailing delimiter, in arrival
    /// order. A partial tail stays buffered for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|b| *b == DELIMITER) {
            frames.push(self.buf[start..start + pos].to_vec());
            start += pos + 1;
        }
        if start > 0 {
            self.buf.drain(..start);
        }
        if self.buf.len() > MAX_FRAME {
            return Err(CodecError::FrameTooLarge);
        }
        Ok(frames)
    }

    /// Parse one drained frame into a typed message.
    pub fn parse<T: DeserializeOwned>(frame: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(frame)?)
    }

    /// Bytes currently buffered as a partial frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Serialize a message and append the frame delimiter.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, CodecError> {
    let mut bytes = serde_json::to_vec(msg)?;
    bytes.push(DELIMITER);
    Ok(bytes)
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
