// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inventory payloads streamed by the monitor job.
//!
//! The agent-side monitor emits one JSON object per block on stdout:
//! a status sample, or a container/image delta. Deltas carry `full: true`
//! when they are a complete snapshot replacing everything known for the
//! host, otherwise update/delete lists apply incrementally.

use serde::{Deserialize, Serialize};

/// A container as reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    /// Agent-local image id the container was started from.
    pub image: String,
    pub state: String,
    #[serde(default)]
    pub created: u64,
}

/// An image present on the agent host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    /// Repo digests, each `repository@sha256:<hex>`.
    #[serde(default)]
    pub digests: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ImageInfo {
    /// Iterate the bare `sha256:<hex>` parts of the repo digests.
    pub fn bare_digests(&self) -> impl Iterator<Item = &str> {
        self.digests
            .iter()
            .map(|d| d.split_once('@').map_or(d.as_str(), |(_, h)| h))
    }
}

/// One block from the monitor stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InventoryUpdate {
    /// Host status sample (load, disks, ...). Opaque to this core; the
    /// time-series store consuming it is an external collaborator.
    Status { payload: serde_json::Value },
    Containers {
        #[serde(default)]
        full: bool,
        #[serde(default)]
        update: Vec<ContainerInfo>,
        #[serde(default)]
        delete: Vec<String>,
    },
    ContainerState { id: String, state: String },
    Images {
        #[serde(default)]
        full: bool,
        #[serde(default)]
        update: Vec<ImageInfo>,
        #[serde(default)]
        delete: Vec<String>,
    },
}

impl InventoryUpdate {
    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            InventoryUpdate::Status { .. } => "status",
            InventoryUpdate::Containers { .. } => "containers",
            InventoryUpdate::ContainerState { .. } => "container_state",
            InventoryUpdate::Images { .. } => "images",
        }
    }
}

#[cfg(test)]
#[path = "inventory_tests.rs"]
mod tests;
