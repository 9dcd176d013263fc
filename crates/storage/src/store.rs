// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable table store.
//!
//! Wraps the journal + materialized state behind one mutex: mutators
//! append the op, then apply it, so the journal is always at least as new
//! as memory. Reads clone rows out; callers must re-validate after any
//! await since another task may have advanced the state meanwhile.

use crate::journal::{self, Journal, JournalError, Snapshot, CURRENT_SNAPSHOT_VERSION};
use crate::state::{HostSecret, MaterializedState, NewDeployment, NewManifest, Op};
use chrono::Utc;
use fleet_core::{DeploymentRecord, Digest, HostId, ManifestRecord, TagPin};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const JOURNAL_FILE: &str = "journal.log";
const SNAPSHOT_FILE: &str = "state.snap";
const LOCK_FILE: &str = "lock";

/// Compact once the journal grows past this many bytes.
const COMPACT_BYTES: u64 = 8 * 1024 * 1024;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("data dir is locked by another process: {0}")]
    Locked(PathBuf),

    #[error("no such row: {0}")]
    NoSuchRow(i64),
}

struct StoreInner {
    journal: Journal,
    state: MaterializedState,
}

/// Durable manifest / deployment / host-secret tables.
pub struct Store {
    dir: PathBuf,
    inner: Mutex<StoreInner>,
    _lock: File,
}

impl Store {
    /// Open the store in `dir`, creating it if needed.
    ///
    /// Takes an exclusive advisory lock so a second daemon pointed at the
    /// same data dir fails fast instead of corrupting the journal.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let lock = File::create(dir.join(LOCK_FILE))?;
        lock.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(dir.to_path_buf()))?;

        let snapshot = journal::load_snapshot(&dir.join(SNAPSHOT_FILE))?;
        let (mut journal, entries) = Journal::open(&dir.join(JOURNAL_FILE))?;

        let (mut state, snap_seq) = match snapshot {
            Some(s) => (s.state, s.seq),
            None => (MaterializedState::default(), 0),
        };
        journal.fast_forward(snap_seq);
        let mut replayed = 0usize;
        for entry in &entries {
            if entry.seq > snap_seq {
                state.apply(&entry.op);
                replayed += 1;
            }
        }
        info!(
            dir = %dir.display(),
            snapshot_seq = snap_seq,
            replayed,
            "store opened"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            inner: Mutex::new(StoreInner { journal, state }),
            _lock: lock,
        })
    }

    fn commit(inner: &mut StoreInner, op: Op) -> Result<(), StoreError> {
        inner.journal.append(&op)?;
        inner.state.apply(&op);
        Ok(())
    }

    // ---- manifests ----

    pub fn insert_manifest(&self, new: NewManifest) -> Result<ManifestRecord, StoreError> {
        let mut inner = self.inner.lock();
        let record = ManifestRecord {
            id: inner.state.allocate_manifest_id(),
            repository: new.repository,
            tag: new.tag,
            digest: new.digest,
            layers: new.layers,
            config_digest: new.config_digest,
            body: new.body,
            labels: new.labels,
            pinned: false,
            pushed_by: new.pushed_by,
            pushed_at_ms: new.pushed_at_ms,
            removed_at_ms: None,
        };
        Self::commit(&mut inner, Op::ManifestAdded { record: record.clone() })?;
        Ok(record)
    }

    /// Most recent non-removed row for (repository, tag-or-digest).
    pub fn resolve_manifest(&self, repository: &str, reference: &str) -> Option<ManifestRecord> {
        self.inner
            .lock()
            .state
            .resolve_manifest(repository, reference)
            .cloned()
    }

    /// Every manifest row, including soft-deleted history.
    pub fn manifest_rows(&self) -> Vec<ManifestRecord> {
        self.inner.lock().state.manifests.clone()
    }

    /// Push history for one (repository, tag).
    pub fn manifest_history(&self, repository: &str, tag: &str) -> Vec<ManifestRecord> {
        self.inner
            .lock()
            .state
            .manifests
            .iter()
            .filter(|m| m.repository == repository && m.tag == tag)
            .cloned()
            .collect()
    }

    pub fn newest_for_tag(&self, repository: &str, tag: &str) -> Option<i64> {
        self.inner.lock().state.newest_for_tag(repository, tag)
    }

    pub fn set_manifest_pin(&self, id: i64, pinned: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.manifests.iter().any(|m| m.id == id) {
            return Err(StoreError::NoSuchRow(id));
        }
        Self::commit(&mut inner, Op::ManifestPinSet { id, pinned })
    }

    pub fn mark_manifest_removed(&self, id: i64, at_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.manifests.iter().any(|m| m.id == id) {
            return Err(StoreError::NoSuchRow(id));
        }
        Self::commit(&mut inner, Op::ManifestRemoved { id, at_ms })
    }

    pub fn set_tag_pin(&self, repository: &str, tag: &str, pinned: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::commit(
            &mut inner,
            Op::TagPinSet { repository: repository.to_string(), tag: tag.to_string(), pinned },
        )
    }

    pub fn tag_pins(&self) -> Vec<TagPin> {
        self.inner.lock().state.tag_pins.iter().cloned().collect()
    }

    // ---- deployments ----

    pub fn insert_deployment(&self, new: NewDeployment) -> Result<DeploymentRecord, StoreError> {
        let mut inner = self.inner.lock();
        let record = DeploymentRecord {
            id: inner.state.allocate_deployment_id(),
            host: new.host,
            repository: new.repository,
            container: new.container,
            digest: new.digest,
            user: new.user,
            config: new.config,
            started_at_ms: new.started_at_ms,
            ended_at_ms: None,
        };
        Self::commit(&mut inner, Op::DeploymentOpened { record: record.clone() })?;
        Ok(record)
    }

    pub fn close_deployment(&self, id: i64, ended_at_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.deployments.iter().any(|d| d.id == id) {
            return Err(StoreError::NoSuchRow(id));
        }
        Self::commit(&mut inner, Op::DeploymentClosed { id, ended_at_ms })
    }

    pub fn reopen_deployment(&self, id: i64) -> Result<DeploymentRecord, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.deployments.iter().any(|d| d.id == id) {
            return Err(StoreError::NoSuchRow(id));
        }
        Self::commit(&mut inner, Op::DeploymentReopened { id })?;
        let record = inner
            .state
            .deployments
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or(StoreError::NoSuchRow(id))?;
        Ok(record)
    }

    /// Drop rows newer than `after` on one (host, repository, container)
    /// timeline; part of restoring an earlier deployment.
    pub fn drop_deployments_after(
        &self,
        host: HostId,
        repository: &str,
        container: &str,
        after: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::commit(
            &mut inner,
            Op::DeploymentsDroppedAfter {
                host,
                repository: repository.to_string(),
                container: container.to_string(),
                after,
            },
        )
    }

    pub fn latest_deployment(&self, host: HostId, container: &str) -> Option<DeploymentRecord> {
        self.inner.lock().state.latest_deployment(host, container).cloned()
    }

    pub fn deployment_history(&self, host: HostId, container: &str) -> Vec<DeploymentRecord> {
        self.inner
            .lock()
            .state
            .deployments
            .iter()
            .filter(|d| d.host == host && d.container == container)
            .cloned()
            .collect()
    }

    pub fn deployments_referencing(&self, digest: &Digest) -> Vec<DeploymentRecord> {
        self.inner
            .lock()
            .state
            .deployments_referencing(digest)
            .cloned()
            .collect()
    }

    // ---- host secrets ----

    /// Insert or replace a host's agent secret, allocating an id for new
    /// hostnames. Returns the host id.
    pub fn set_host_secret(
        &self,
        hostname: &str,
        password_hash: &str,
    ) -> Result<HostId, StoreError> {
        let mut inner = self.inner.lock();
        let host = inner
            .state
            .host_secrets
            .get(hostname)
            .map(|s| s.host)
            .unwrap_or_else(|| inner.state.allocate_host_id());
        let secret = HostSecret {
            host,
            hostname: hostname.to_string(),
            password_hash: password_hash.to_string(),
        };
        Self::commit(&mut inner, Op::HostSecretSet { secret })?;
        Ok(host)
    }

    pub fn host_secret(&self, hostname: &str) -> Option<HostSecret> {
        self.inner.lock().state.host_secrets.get(hostname).cloned()
    }

    // ---- maintenance ----

    /// Write a snapshot and truncate the journal if it has grown enough.
    pub fn maybe_compact(&self) -> Result<(), StoreError> {
        let inner = self.inner.lock();
        if inner.journal.len_since_truncate()? < COMPACT_BYTES {
            return Ok(());
        }
        drop(inner);
        self.compact()
    }

    /// Unconditionally snapshot the state and truncate the journal.
    pub fn compact(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let snapshot = Snapshot {
            version: CURRENT_SNAPSHOT_VERSION,
            seq: inner.journal.seq(),
            state: inner.state.clone(),
            created_at: Utc::now(),
        };
        journal::save_snapshot(&self.dir.join(SNAPSHOT_FILE), &snapshot)?;
        inner.journal.truncate()?;
        info!(seq = snapshot.seq, "store compacted");
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
