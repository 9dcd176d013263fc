// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Content-addressed blob storage.
//!
//! Blobs live as files named by their digest under the blob directory.
//! Uploads accumulate in a sessions directory, tracking length and a
//! running hash, and are renamed into the store on finalize once the
//! declared digest matches the recomputed one. Concurrent uploads of the
//! same digest are independent until finalize; the later rename overwrites,
//! which is safe because identical digests mean identical content.

use fleet_core::{Digest, UploadId};
use parking_lot::Mutex;
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors from blob storage operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown upload session {0}")]
    UnknownUpload(UploadId),

    #[error("digest mismatch: declared {declared}, content is {actual}")]
    DigestMismatch { declared: Digest, actual: Digest },
}

/// One in-flight resumable upload.
struct UploadSession {
    file: File,
    path: PathBuf,
    written: u64,
    hash: Sha256,
}

/// Content-addressed store of registry blobs.
pub struct BlobStore {
    blob_dir: PathBuf,
    upload_dir: PathBuf,
    sessions: Mutex<HashMap<UploadId, UploadSession>>,
}

impl BlobStore {
    /// Open (creating directories as needed) a blob store rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self, BlobError> {
        let blob_dir = dir.join("blobs");
        let upload_dir = dir.join("uploads");
        fs::create_dir_all(&blob_dir)?;
        fs::create_dir_all(&upload_dir)?;
        Ok(Self { blob_dir, upload_dir, sessions: Mutex::new(HashMap::new()) })
    }

    /// Start a resumable upload and return its session id.
    pub fn begin_upload(&self) -> Result<UploadId, BlobError> {
        let id = UploadId::new();
        let path = self.upload_dir.join(id.as_str());
        let file = OpenOptions::new().create_new(true).write(true).open(&path)?;
        let session = UploadSession { file, path, written: 0, hash: Sha256::new() };
        self.sessions.lock().insert(id.clone(), session);
        Ok(id)
    }

    /// Append a chunk to an upload. Returns total bytes written so far.
    ///
    /// Completeness is not validated here; only finalize checks the digest.
    pub fn append_chunk(&self, id: &UploadId, chunk: &[u8]) -> Result<u64, BlobError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| BlobError::UnknownUpload(id.clone()))?;
        session.file.write_all(chunk)?;
        session.hash.update(chunk);
        session.written += chunk.len() as u64;
        Ok(session.written)
    }

    /// Bytes accumulated by an open upload, if the session exists.
    pub fn upload_status(&self, id: &UploadId) -> Option<u64> {
        self.sessions.lock().get(id).map(|s| s.written)
    }

    /// Finalize an upload, promoting it into the content-addressed store.
    ///
    /// The declared digest must match the hash of everything written or the
    /// session is discarded and the call fails.
    pub fn finish_upload(&self, id: &UploadId, declared: &Digest) -> Result<u64, BlobError> {
        let session = self
            .sessions
            .lock()
            .remove(id)
            .ok_or_else(|| BlobError::UnknownUpload(id.clone()))?;
        let UploadSession { mut file, path, written, hash } = session;
        file.flush()?;
        drop(file);

        let actual = Digest::from_hash(hash);
        if actual != *declared {
            let _ = fs::remove_file(&path);
            return Err(BlobError::DigestMismatch { declared: declared.clone(), actual });
        }
        fs::rename(&path, self.blob_path(declared))?;
        debug!(digest = %declared, bytes = written, "blob stored");
        Ok(written)
    }

    /// Drop an upload without promoting it.
    pub fn abandon_upload(&self, id: &UploadId) {
        if let Some(session) = self.sessions.lock().remove(id) {
            let _ = fs::remove_file(session.path);
        }
    }

    /// Store a complete blob in one call.
    pub fn put(&self, bytes: &[u8]) -> Result<Digest, BlobError> {
        let digest = Digest::of_bytes(bytes);
        let tmp = self.upload_dir.join(format!("put-{}", digest.hex()));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, self.blob_path(&digest))?;
        Ok(digest)
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.blob_path(digest).exists()
    }

    /// Read a blob's content; `None` if the digest is unknown.
    pub fn read(&self, digest: &Digest) -> Result<Option<Vec<u8>>, BlobError> {
        match fs::read(self.blob_path(digest)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Size in bytes of a stored blob, if present.
    pub fn size(&self, digest: &Digest) -> Option<u64> {
        fs::metadata(self.blob_path(digest)).ok().map(|m| m.len())
    }

    /// Names of every stored blob (digest strings).
    pub fn list(&self) -> Result<Vec<String>, BlobError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.blob_dir)? {
            let entry = entry?;
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Delete a blob by its stored name. Missing files are not an error.
    pub fn remove(&self, name: &str) -> Result<(), BlobError> {
        match fs::remove_file(self.blob_dir.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.blob_dir.join(digest.as_str())
    }
}

#[cfg(test)]
#[path = "blobs_tests.rs"]
mod tests;
