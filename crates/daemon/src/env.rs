// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;

/// Resolve data directory: FLEET_DATA_DIR > XDG_STATE_HOME/fleet > ~/.local/state/fleet
pub fn data_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("FLEET_DATA_DIR") {
        return Some(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg).join("fleet"));
    }
    dirs::home_dir().map(|home| home.join(".local/state/fleet"))
}

/// Config file override (`FLEET_CONFIG`).
pub fn config_path() -> Option<PathBuf> {
    std::env::var("FLEET_CONFIG").ok().map(PathBuf::from)
}

/// Agent listener port override (`FLEET_AGENT_PORT`).
pub fn agent_port() -> Option<u16> {
    std::env::var("FLEET_AGENT_PORT").ok().and_then(|s| s.parse().ok())
}

/// Registry listener port override (`FLEET_REGISTRY_PORT`).
pub fn registry_port() -> Option<u16> {
    std::env::var("FLEET_REGISTRY_PORT").ok().and_then(|s| s.parse().ok())
}

/// GC interval override in seconds (`FLEET_GC_INTERVAL_SECS`).
pub fn gc_interval_secs() -> Option<u64> {
    std::env::var("FLEET_GC_INTERVAL_SECS").ok().and_then(|s| s.parse().ok())
}

/// Operator push credential (`FLEET_PUSH_TOKEN`, as `user:token`).
pub fn push_token() -> Option<(String, String)> {
    let raw = std::env::var("FLEET_PUSH_TOKEN").ok()?;
    let (user, token) = raw.split_once(':')?;
    if user.is_empty() || token.is_empty() {
        return None;
    }
    Some((user.to_string(), token.to_string()))
}
