// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Garbage collection of manifests and blobs.
//!
//! A manifest row is kept while anything still wants it: a pin, a tag pin
//! or head-of-tag position for `latest`/`master`, a running deployment, a
//! recently ended deployment (grace proportional to how long it ran), or
//! a recent push. Everything else is soft-deleted and blobs referenced by
//! no kept manifest are removed from storage.

use fleet_core::{Clock, ManifestRecord, TagPin};
use fleet_storage::{BlobStore, Store};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::manifests::RegistryError;

/// Tunables for a collection pass.
#[derive(Debug, Clone)]
pub struct GcPolicy {
    /// Flat keep window after push, and the constant term of the
    /// deployment-proportional window.
    pub grace: Duration,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self { grace: Duration::from_secs(60 * 60 * 24 * 14) }
    }
}

/// What a collection pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GcOutcome {
    pub kept: usize,
    pub removed_manifests: usize,
    pub deleted_blobs: usize,
}

/// Tags whose newest manifest is always kept.
const PROTECTED_TAGS: [&str; 2] = ["latest", "master"];

fn keep_row(
    row: &ManifestRecord,
    store: &Store,
    tag_pins: &HashSet<TagPin>,
    grace_ms: u64,
    now_ms: u64,
) -> bool {
    if row.pinned {
        return true;
    }
    let newest = store.newest_for_tag(&row.repository, &row.tag) == Some(row.id);
    if newest {
        let pin = TagPin { repository: row.repository.clone(), tag: row.tag.clone() };
        if tag_pins.contains(&pin) || PROTECTED_TAGS.contains(&row.tag.as_str()) {
            return true;
        }
    }

    let deployments = store.deployments_referencing(&row.digest);
    if deployments.iter().any(|d| d.is_open()) {
        return true;
    }
    let start = deployments.iter().map(|d| d.started_at_ms).min();
    let end = deployments.iter().filter_map(|d| d.ended_at_ms).max();
    if let (Some(start), Some(end)) = (start, end) {
        // Things that ran long get to stick around proportionally longer.
        if 2 * end.saturating_sub(start) + grace_ms > now_ms.saturating_sub(start) {
            return true;
        }
    }

    row.pushed_at_ms + grace_ms > now_ms
}

/// One collection pass.
///
/// Read failures abort the pass; failing to record a single soft-delete is
/// logged and skipped so one bad row cannot wedge collection forever.
pub fn run_gc(
    store: &Arc<Store>,
    blobs: &Arc<BlobStore>,
    policy: &GcPolicy,
    clock: &impl Clock,
) -> Result<GcOutcome, RegistryError> {
    let now_ms = clock.epoch_ms();
    let grace_ms = policy.grace.as_millis() as u64;

    let files: HashSet<String> = blobs.list()?.into_iter().collect();
    let tag_pins: HashSet<TagPin> = store.tag_pins().into_iter().collect();
    info!(files = files.len(), "gc started");

    let mut used: HashSet<String> = HashSet::new();
    let mut outcome = GcOutcome::default();

    for row in store.manifest_rows() {
        if row.is_removed() {
            continue;
        }
        let mut keep = keep_row(&row, store, &tag_pins, grace_ms, now_ms);

        // A manifest whose blobs are already gone is not servable no
        // matter what wants it.
        let blob_names: Vec<String> = row
            .layers
            .iter()
            .chain(std::iter::once(&row.config_digest))
            .map(|d| d.as_str().to_string())
            .collect();
        if !blob_names.iter().all(|n| files.contains(n)) {
            keep = false;
        }

        if keep {
            outcome.kept += 1;
            used.extend(blob_names);
        } else {
            match store.mark_manifest_removed(row.id, now_ms) {
                Ok(()) => outcome.removed_manifests += 1,
                Err(e) => {
                    warn!(id = row.id, error = %e, "failed to record manifest removal");
                }
            }
        }
    }

    for name in files.difference(&used) {
        match blobs.remove(name) {
            Ok(()) => outcome.deleted_blobs += 1,
            Err(e) => warn!(blob = %name, error = %e, "unable to remove blob"),
        }
    }

    info!(
        kept = outcome.kept,
        removed = outcome.removed_manifests,
        deleted_blobs = outcome.deleted_blobs,
        "gc done"
    );
    Ok(outcome)
}

#[cfg(test)]
#[path = "gc_tests.rs"]
mod tests;
