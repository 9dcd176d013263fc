// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from journal replay.
//!
//! Operations are facts about what happened; state is derived from them.
//! Every applier MUST be idempotent: applying the same op twice (snapshot
//! overlap, crash-replay) must produce the same state as applying it once.

use fleet_core::{DeploymentRecord, Digest, HostId, ManifestRecord, RuntimeConfig, TagPin};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Stored agent auth secret for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSecret {
    pub host: HostId,
    pub hostname: String,
    /// argon2 PHC string; never the cleartext.
    pub password_hash: String,
}

/// Journal operations.
///
/// Ids are assigned by the store at append time and embedded in the op so
/// that replay is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    ManifestAdded { record: ManifestRecord },
    ManifestPinSet { id: i64, pinned: bool },
    ManifestRemoved { id: i64, at_ms: u64 },
    TagPinSet { repository: String, tag: String, pinned: bool },
    DeploymentOpened { record: DeploymentRecord },
    DeploymentClosed { id: i64, ended_at_ms: u64 },
    /// A restore reopens an earlier record as the current instance.
    DeploymentReopened { id: i64 },
    /// Rows newer than `after` for the (host, repository, container)
    /// timeline are dropped as part of a restore.
    DeploymentsDroppedAfter {
        host: HostId,
        repository: String,
        container: String,
        after: i64,
    },
    HostSecretSet { secret: HostSecret },
}

/// Inputs for inserting a manifest row (id assigned by the store).
#[derive(Debug, Clone)]
pub struct NewManifest {
    pub repository: String,
    pub tag: String,
    pub digest: Digest,
    pub layers: Vec<Digest>,
    pub config_digest: Digest,
    pub body: String,
    pub labels: HashMap<String, String>,
    pub pushed_by: String,
    pub pushed_at_ms: u64,
}

/// Inputs for opening a deployment record (id assigned by the store).
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub host: HostId,
    pub repository: String,
    pub container: String,
    pub digest: Digest,
    pub user: Option<String>,
    pub config: RuntimeConfig,
    pub started_at_ms: u64,
}

/// Materialized tables built from journal replay.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    /// Full manifest push history, ordered by insertion (= by id).
    pub manifests: Vec<ManifestRecord>,
    pub tag_pins: BTreeSet<TagPin>,
    /// Full deployment history, ordered by insertion (= by id).
    pub deployments: Vec<DeploymentRecord>,
    /// hostname → stored secret.
    pub host_secrets: HashMap<String, HostSecret>,
    next_manifest_id: i64,
    next_deployment_id: i64,
    next_host_id: i64,
}

impl MaterializedState {
    /// Apply an operation. Idempotent.
    pub fn apply(&mut self, op: &Op) {
        match op {
            Op::ManifestAdded { record } => {
                if !self.manifests.iter().any(|m| m.id == record.id) {
                    self.next_manifest_id = self.next_manifest_id.max(record.id + 1);
                    self.manifests.push(record.clone());
                }
            }
            Op::ManifestPinSet { id, pinned } => {
                if let Some(m) = self.manifests.iter_mut().find(|m| m.id == *id) {
                    m.pinned = *pinned;
                }
            }
            Op::ManifestRemoved { id, at_ms } => {
                if let Some(m) = self.manifests.iter_mut().find(|m| m.id == *id) {
                    if m.removed_at_ms.is_none() {
                        m.removed_at_ms = Some(*at_ms);
                    }
                }
            }
            Op::TagPinSet { repository, tag, pinned } => {
                let pin = TagPin { repository: repository.clone(), tag: tag.clone() };
                if *pinned {
                    self.tag_pins.insert(pin);
                } else {
                    self.tag_pins.remove(&pin);
                }
            }
            Op::DeploymentOpened { record } => {
                if !self.deployments.iter().any(|d| d.id == record.id) {
                    self.next_deployment_id = self.next_deployment_id.max(record.id + 1);
                    self.deployments.push(record.clone());
                }
            }
            Op::DeploymentClosed { id, ended_at_ms } => {
                if let Some(d) = self.deployments.iter_mut().find(|d| d.id == *id) {
                    if d.ended_at_ms.is_none() {
                        d.ended_at_ms = Some(*ended_at_ms);
                    }
                }
            }
            Op::DeploymentReopened { id } => {
                if let Some(d) = self.deployments.iter_mut().find(|d| d.id == *id) {
                    d.ended_at_ms = None;
                }
            }
            Op::DeploymentsDroppedAfter { host, repository, container, after } => {
                self.deployments.retain(|d| {
                    d.id <= *after
                        || d.host != *host
                        || d.repository != *repository
                        || d.container != *container
                });
            }
            Op::HostSecretSet { secret } => {
                self.next_host_id = self.next_host_id.max(secret.host.as_i64() + 1);
                self.host_secrets.insert(secret.hostname.clone(), secret.clone());
            }
        }
    }

    pub fn allocate_manifest_id(&self) -> i64 {
        self.next_manifest_id.max(1)
    }

    pub fn allocate_deployment_id(&self) -> i64 {
        self.next_deployment_id.max(1)
    }

    pub fn allocate_host_id(&self) -> HostId {
        HostId::new(self.next_host_id.max(1))
    }

    /// Most recent non-removed manifest row matching a tag or digest.
    pub fn resolve_manifest(&self, repository: &str, reference: &str) -> Option<&ManifestRecord> {
        self.manifests
            .iter()
            .rev()
            .find(|m| m.repository == repository && !m.is_removed() && m.matches_reference(reference))
    }

    /// Newest row id per (repository, tag), ignoring soft-deletion.
    pub fn newest_for_tag(&self, repository: &str, tag: &str) -> Option<i64> {
        self.manifests
            .iter()
            .rev()
            .find(|m| m.repository == repository && m.tag == tag)
            .map(|m| m.id)
    }

    /// Most recent deployment row for (host, container), open or closed.
    pub fn latest_deployment(&self, host: HostId, container: &str) -> Option<&DeploymentRecord> {
        self.deployments
            .iter()
            .rev()
            .find(|d| d.host == host && d.container == container)
    }

    /// All deployment rows referencing a digest.
    pub fn deployments_referencing<'a>(
        &'a self,
        digest: &'a Digest,
    ) -> impl Iterator<Item = &'a DeploymentRecord> {
        self.deployments.iter().filter(move |d| d.digest == *digest)
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
