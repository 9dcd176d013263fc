// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deployment history records.
//!
//! One record per interval during which an image digest was believed to be
//! running as a named container on a host. The timeline per
//! (host, container) is append-only; reconciliation closes the open record
//! when the agent reports the container gone or replaced.

use crate::digest::Digest;
use crate::id::HostId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Runtime configuration handed to the deploy script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// One deployment interval for (host, repository, container).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: i64,
    pub host: HostId,
    pub repository: String,
    pub container: String,
    pub digest: Digest,
    /// User that submitted the deploy; absent for out-of-band containers
    /// the agent reported without a matching request.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub config: RuntimeConfig,
    pub started_at_ms: u64,
    /// None while this is believed to be the currently running instance.
    #[serde(default)]
    pub ended_at_ms: Option<u64>,
}

impl DeploymentRecord {
    pub fn is_open(&self) -> bool {
        self.ended_at_ms.is_none()
    }
}

crate::builder! {
    pub struct DeploymentRecordBuilder => DeploymentRecord {
        into {
            repository: String = "app",
            container: String = "web",
        }
        set {
            id: i64 = 1,
            host: HostId = HostId(7),
            digest: Digest = Digest::of_bytes(b"image"),
            config: RuntimeConfig = RuntimeConfig::default(),
            started_at_ms: u64 = 1_000_000,
        }
        option {
            user: String = None,
            ended_at_ms: u64 = None,
        }
    }
}

#[cfg(test)]
#[path = "deploy_tests.rs"]
mod tests;
