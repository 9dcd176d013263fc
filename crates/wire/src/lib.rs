// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent wire protocol.
//!
//! Wire format: UTF-8 JSON objects with a `type` discriminator, terminated
//! by the ASCII record separator byte 0x1E. The delimiter never appears
//! inside a JSON payload, so frame boundaries come from it alone.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod codec;
mod message;

pub use codec::{encode, CodecError, FrameCodec, DELIMITER, MAX_FRAME};
pub use message::{
    AgentMessage, DataSource, OutputType, ScriptPayload, ServerMessage, StdinType,
};

#[cfg(test)]
mod property_tests;
