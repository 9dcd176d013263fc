// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed messages exchanged with fleet agents.
//!
//! `AgentMessage` is what the server receives, `ServerMessage` what it
//! sends. The `auth` message is only valid as an agent's first message;
//! everything else is correlated to a job by `id`.

use serde::{Deserialize, Serialize};

/// Which stream a `data` frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Stdout,
    Stderr,
}

fleet_core::simple_display! {
    DataSource {
        Stdout => "stdout",
        Stderr => "stderr",
    }
}

/// How the agent feeds the script's stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StdinType {
    #[default]
    None,
    Text,
    GivenJson,
}

/// How the agent forwards an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    #[default]
    None,
    Text,
    Binary,
    /// Newline-batched JSON objects, parsed agent-side and forwarded as
    /// structured `data` values. Used by the monitor job.
    BlockedJson,
}

/// Messages received from an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// First message only.
    Auth { hostname: String, password: String },
    Pong { id: u64 },
    Data {
        id: u64,
        source: DataSource,
        data: serde_json::Value,
    },
    Success { id: u64, code: i32 },
    Failure { id: u64 },
}

impl AgentMessage {
    /// The job id this message is routed by, if any.
    pub fn job_id(&self) -> Option<u64> {
        match self {
            AgentMessage::Data { id, .. }
            | AgentMessage::Success { id, .. }
            | AgentMessage::Failure { id } => Some(*id),
            AgentMessage::Auth { .. } | AgentMessage::Pong { .. } => None,
        }
    }
}

fleet_core::simple_display! {
    AgentMessage {
        Auth { .. } => "auth",
        Pong { .. } => "pong",
        Data { .. } => "data",
        Success { .. } => "success",
        Failure { .. } => "failure",
    }
}

/// Script dispatch payload carried by `run_script`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPayload {
    pub name: String,
    pub interpreter: String,
    pub content: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub stdin_type: StdinType,
    #[serde(default)]
    pub stdout_type: OutputType,
    #[serde(default)]
    pub stderr_type: OutputType,
}

/// Messages sent to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ping { id: u64 },
    RunScript {
        id: u64,
        #[serde(flatten)]
        script: ScriptPayload,
    },
    Kill { id: u64 },
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
