// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only operation journal with snapshot compaction.
//!
//! The journal is one JSON object per line. Recovery loads the newest
//! snapshot (zstd-compressed JSON of the full materialized state) and
//! replays journal entries with a higher sequence number. A truncated
//! final line — the crash case — is tolerated and dropped.

use crate::state::{MaterializedState, Op};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Current snapshot schema version
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

/// Errors from journal and snapshot operations.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot version {0} is newer than this build understands")]
    UnknownSnapshotVersion(u32),
}

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub seq: u64,
    pub op: Op,
}

/// A snapshot of the materialized state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version for migrations
    #[serde(rename = "v")]
    pub version: u32,
    /// Journal sequence number at the time of snapshot
    pub seq: u64,
    /// The complete materialized state
    pub state: MaterializedState,
    /// When this snapshot was created
    pub created_at: DateTime<Utc>,
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

/// The append side of the operation log.
pub struct Journal {
    path: PathBuf,
    file: File,
    seq: u64,
}

impl Journal {
    /// Open the journal, returning it plus every recovered entry in order.
    pub fn open(path: &Path) -> Result<(Self, Vec<Entry>), JournalError> {
        let mut entries = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Entry>(&line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        // A torn final write is expected after a crash; any
                        // earlier corruption would already have failed replay.
                        warn!(error = %e, "dropping unparsable journal tail");
                        break;
                    }
                }
            }
        }
        let seq = entries.last().map(|e| e.seq).unwrap_or(0);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok((Self { path: path.to_path_buf(), file, seq }, entries))
    }

    /// Append one operation, fsyncing the line out.
    pub fn append(&mut self, op: &Op) -> Result<u64, JournalError> {
        self.seq += 1;
        let entry = Entry { seq: self.seq, op: op.clone() };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_data()?;
        Ok(self.seq)
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Advance the sequence past a snapshot's cut-over point so entries
    /// appended after a restart sort after everything the snapshot covers.
    pub fn fast_forward(&mut self, seq: u64) {
        self.seq = self.seq.max(seq);
    }

    /// Entries appended since the last compaction.
    pub fn len_since_truncate(&self) -> Result<u64, JournalError> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Drop all entries; called after a snapshot covering them was written.
    pub fn truncate(&mut self) -> Result<(), JournalError> {
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }
}

/// Write a snapshot next to the journal, rotating previous ones to `.bak`.
pub fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), JournalError> {
    let json = serde_json::to_vec(snapshot)?;
    let compressed = zstd::encode_all(json.as_slice(), 3)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &compressed)?;
    if path.exists() {
        let _ = fs::rename(path, rotate_bak_path(path));
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load the snapshot if one exists.
pub fn load_snapshot(path: &Path) -> Result<Option<Snapshot>, JournalError> {
    if !path.exists() {
        return Ok(None);
    }
    let compressed = fs::read(path)?;
    let json = zstd::decode_all(compressed.as_slice())?;
    let snapshot: Snapshot = serde_json::from_slice(&json)?;
    if snapshot.version > CURRENT_SNAPSHOT_VERSION {
        return Err(JournalError::UnknownSnapshotVersion(snapshot.version));
    }
    Ok(Some(snapshot))
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
