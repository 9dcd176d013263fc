// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for registry tests.

use crate::manifests::ManifestStore;
use fleet_core::ManifestLayer;
use fleet_storage::{BlobStore, Store};
use std::sync::Arc;

pub(crate) struct Fixture {
    pub _dir: tempfile::TempDir,
    pub store: Arc<Store>,
    pub blobs: Arc<BlobStore>,
    pub manifests: ManifestStore,
}

pub(crate) fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(&dir.path().join("tables")).unwrap());
    let blobs = Arc::new(BlobStore::open(&dir.path().join("registry")).unwrap());
    let manifests = ManifestStore::new(Arc::clone(&store), Arc::clone(&blobs));
    Fixture { _dir: dir, store, blobs, manifests }
}

/// Upload the given layers and config as blobs and return a manifest body
/// referencing them.
pub(crate) fn manifest_body(blobs: &BlobStore, layers: &[&[u8]], config: &[u8]) -> Vec<u8> {
    let config_digest = blobs.put(config).unwrap();
    let mut layer_entries = Vec::new();
    for bytes in layers {
        let digest = blobs.put(bytes).unwrap();
        layer_entries.push(ManifestLayer {
            digest,
            size: bytes.len() as u64,
            media_type: fleet_core::LAYER_MEDIA_TYPE.to_string(),
        });
    }
    serde_json::to_vec(&serde_json::json!({
        "config": {"digest": config_digest},
        "layers": layer_entries,
    }))
    .unwrap()
}
