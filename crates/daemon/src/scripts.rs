// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-side scripts shipped inside `run_script` messages.
//!
//! Agents have no fleet-specific code installed; everything they run is
//! pushed over the wire. The monitor script streams inventory forever,
//! the deploy script logs into the registry with the one-shot credential
//! it is handed and swaps the container.

/// Pulls the image and replaces the named container.
///
/// Args: registry address, `repo@digest` image ref, container name,
/// base64 `user:secret` credential, runtime config JSON.
pub const DEPLOY_SCRIPT: &str = include_str!("scripts/deploy.sh");

/// Streams status, container and image inventory as blocked JSON.
pub const MONITOR_SCRIPT: &str = include_str!("scripts/monitor.py");
