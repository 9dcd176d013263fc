// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Image manifests and their stored records.
//!
//! An [`ImageManifest`] is the wire shape pushed by a client; a
//! [`ManifestRecord`] is the row the registry keeps per push. Superseded
//! records for the same (repository, tag) stay in history — the most recent
//! row is authoritative for the tag.

use crate::digest::Digest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Media type required for image layers.
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Media type of a manifest response.
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// The parsed body of a pushed manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub config: ManifestConfig,
    pub layers: Vec<ManifestLayer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestConfig {
    pub digest: Digest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestLayer {
    pub digest: Digest,
    pub size: u64,
    pub media_type: String,
}

impl ImageManifest {
    /// Every blob digest the manifest references (layers + config).
    pub fn referenced_digests(&self) -> impl Iterator<Item = &Digest> {
        self.layers
            .iter()
            .map(|l| &l.digest)
            .chain(std::iter::once(&self.config.digest))
    }
}

/// One stored manifest push.
///
/// Never mutated after insert except `pinned` and `removed_at_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub id: i64,
    pub repository: String,
    pub tag: String,
    /// Digest of the manifest body itself.
    pub digest: Digest,
    pub layers: Vec<Digest>,
    pub config_digest: Digest,
    /// Exact bytes as pushed; fetch must return these verbatim.
    pub body: String,
    /// Labels lifted from the config blob at push time.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub pinned: bool,
    pub pushed_by: String,
    pub pushed_at_ms: u64,
    /// Soft-deletion marker set by garbage collection.
    #[serde(default)]
    pub removed_at_ms: Option<u64>,
}

impl ManifestRecord {
    pub fn is_removed(&self) -> bool {
        self.removed_at_ms.is_some()
    }

    /// True if `reference` names this record by tag or digest.
    pub fn matches_reference(&self, reference: &str) -> bool {
        self.tag == reference || self.digest == *reference
    }
}

crate::builder! {
    pub struct ManifestRecordBuilder => ManifestRecord {
        into {
            repository: String = "app",
            tag: String = "latest",
            body: String = "{}",
            pushed_by: String = "tester",
        }
        set {
            id: i64 = 1,
            digest: Digest = Digest::of_bytes(b"{}"),
            layers: Vec<Digest> = Vec::new(),
            config_digest: Digest = Digest::of_bytes(b"config"),
            labels: HashMap<String, String> = HashMap::new(),
            pinned: bool = false,
            pushed_at_ms: u64 = 1_000_000,
        }
        option {
            removed_at_ms: u64 = None,
        }
    }
}

/// A pin on every future newest manifest of (repository, tag).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagPin {
    pub repository: String,
    pub tag: String,
}

#[cfg(test)]
#[path = "image_tests.rs"]
mod tests;
