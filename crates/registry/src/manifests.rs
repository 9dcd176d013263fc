// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manifest push validation and resolution.
//!
//! A push is checked completely before any row is written: every layer
//! digest and the config digest must already exist as blobs, layer media
//! types and declared sizes must match, and the manifest's own digest is
//! the SHA-256 of the exact bytes received.

use fleet_core::{
    Digest, DigestError, DomainEvent, ImageManifest, ManifestRecord, NotificationSink, NullSink,
    LAYER_MEDIA_TYPE,
};
use fleet_storage::{BlobError, BlobStore, NewManifest, Store, StoreError};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no such manifest")]
    NotFound,

    #[error("manifest references missing blob {0}")]
    MissingBlob(Digest),

    #[error("layer {digest} has unsupported media type {media_type}")]
    BadMediaType { digest: Digest, media_type: String },

    #[error("layer {digest} size mismatch: stored {stored}, declared {declared}")]
    SizeMismatch { digest: Digest, stored: u64, declared: u64 },

    #[error("invalid manifest body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error("manifest body is not UTF-8")]
    NotUtf8,

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Shape of the config blob, as far as labels are concerned.
#[derive(Deserialize)]
struct ConfigBlob {
    #[serde(default)]
    config: ConfigSection,
}

#[derive(Deserialize, Default)]
struct ConfigSection {
    #[serde(default, rename = "Labels")]
    labels: Option<HashMap<String, String>>,
}

/// Versioned manifest storage keyed by (repository, tag-or-digest).
pub struct ManifestStore {
    store: Arc<Store>,
    blobs: Arc<BlobStore>,
    sink: Arc<dyn NotificationSink>,
}

impl ManifestStore {
    pub fn new(store: Arc<Store>, blobs: Arc<BlobStore>) -> Self {
        Self { store, blobs, sink: Arc::new(NullSink) }
    }

    /// Replace the observer notified on pushes and pin changes.
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validate and store a pushed manifest.
    pub fn push(
        &self,
        repository: &str,
        tag: &str,
        body: &[u8],
        pushed_by: &str,
        now_ms: u64,
    ) -> Result<ManifestRecord, RegistryError> {
        let text = std::str::from_utf8(body).map_err(|_| RegistryError::NotUtf8)?;
        let manifest: ImageManifest = serde_json::from_str(text)?;

        for layer in &manifest.layers {
            if layer.media_type != LAYER_MEDIA_TYPE {
                return Err(RegistryError::BadMediaType {
                    digest: layer.digest.clone(),
                    media_type: layer.media_type.clone(),
                });
            }
            let stored = self
                .blobs
                .size(&layer.digest)
                .ok_or_else(|| RegistryError::MissingBlob(layer.digest.clone()))?;
            if stored != layer.size {
                return Err(RegistryError::SizeMismatch {
                    digest: layer.digest.clone(),
                    stored,
                    declared: layer.size,
                });
            }
        }

        let config_bytes = self
            .blobs
            .read(&manifest.config.digest)?
            .ok_or_else(|| RegistryError::MissingBlob(manifest.config.digest.clone()))?;
        let labels = serde_json::from_slice::<ConfigBlob>(&config_bytes)
            .ok()
            .and_then(|c| c.config.labels)
            .unwrap_or_default();

        let digest = Digest::of_bytes(body);
        let record = self.store.insert_manifest(NewManifest {
            repository: repository.to_string(),
            tag: tag.to_string(),
            digest: digest.clone(),
            layers: manifest.layers.iter().map(|l| l.digest.clone()).collect(),
            config_digest: manifest.config.digest.clone(),
            body: text.to_string(),
            labels,
            pushed_by: pushed_by.to_string(),
            pushed_at_ms: now_ms,
        })?;

        info!(repository, tag, digest = %digest, "manifest pushed");
        self.sink.emit(&DomainEvent::ImagePushed {
            repository: repository.to_string(),
            tag: tag.to_string(),
            digest,
        });
        Ok(record)
    }

    /// Most recent row for (repository, tag-or-digest).
    pub fn fetch(&self, repository: &str, reference: &str) -> Result<ManifestRecord, RegistryError> {
        self.store
            .resolve_manifest(repository, reference)
            .ok_or(RegistryError::NotFound)
    }

    /// Resolve an image reference (`repo:tag`, `repo@sha256:...`, bare
    /// `repo` meaning `repo:latest`) to a concrete manifest digest.
    pub fn resolve_image(&self, image: &str) -> Result<(String, Digest), RegistryError> {
        let (repository, reference) = match image.split_once('@') {
            Some((repo, digest)) => (repo, digest.to_string()),
            None => match image.split_once(':') {
                Some((repo, tag)) => (repo, tag.to_string()),
                None => (image, "latest".to_string()),
            },
        };
        let record = self.fetch(repository, &reference)?;
        Ok((repository.to_string(), record.digest))
    }

    pub fn set_pin(&self, id: i64, pinned: bool) -> Result<(), RegistryError> {
        self.store.set_manifest_pin(id, pinned)?;
        self.sink.emit(&DomainEvent::ImagePinChanged { manifest_id: id, pinned });
        Ok(())
    }

    pub fn set_tag_pin(&self, repository: &str, tag: &str, pinned: bool) -> Result<(), RegistryError> {
        self.store.set_tag_pin(repository, tag, pinned)?;
        Ok(())
    }

    pub fn blob_store(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

#[cfg(test)]
#[path = "manifests_tests.rs"]
mod tests;
