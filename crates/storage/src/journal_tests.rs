// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fleet_core::ManifestRecord;

fn op(id: i64) -> Op {
    Op::ManifestAdded { record: ManifestRecord::builder().id(id).build() }
}

#[test]
fn append_and_recover() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.log");

    let (mut journal, entries) = Journal::open(&path).unwrap();
    assert!(entries.is_empty());
    journal.append(&op(1)).unwrap();
    journal.append(&op(2)).unwrap();
    drop(journal);

    let (journal, entries) = Journal::open(&path).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].seq, 2);
    assert_eq!(journal.seq(), 2);
}

#[test]
fn torn_tail_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.log");
    {
        let (mut journal, _) = Journal::open(&path).unwrap();
        journal.append(&op(1)).unwrap();
    }
    // Simulate a crash mid-write
    let mut contents = std::fs::read(&path).unwrap();
    contents.extend_from_slice(b"{\"seq\":2,\"op\":{\"op\":\"manifest_");
    std::fs::write(&path, contents).unwrap();

    let (journal, entries) = Journal::open(&path).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(journal.seq(), 1);
}

#[test]
fn snapshot_round_trips_through_zstd() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.snap");

    let mut state = MaterializedState::default();
    state.apply(&op(5));
    let snapshot = Snapshot {
        version: CURRENT_SNAPSHOT_VERSION,
        seq: 9,
        state,
        created_at: Utc::now(),
    };
    save_snapshot(&path, &snapshot).unwrap();

    let loaded = load_snapshot(&path).unwrap().unwrap();
    assert_eq!(loaded.seq, 9);
    assert_eq!(loaded.state.manifests.len(), 1);
}

#[test]
fn snapshot_rotation_keeps_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.snap");
    let snap = |seq| Snapshot {
        version: CURRENT_SNAPSHOT_VERSION,
        seq,
        state: MaterializedState::default(),
        created_at: Utc::now(),
    };
    save_snapshot(&path, &snap(1)).unwrap();
    save_snapshot(&path, &snap(2)).unwrap();
    assert!(path.with_extension("bak").exists());
    assert_eq!(load_snapshot(&path).unwrap().unwrap().seq, 2);
}

#[test]
fn missing_snapshot_is_none() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_snapshot(&dir.path().join("none.snap")).unwrap().is_none());
}

#[test]
fn newer_snapshot_version_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.snap");
    let snapshot = Snapshot {
        version: CURRENT_SNAPSHOT_VERSION + 1,
        seq: 0,
        state: MaterializedState::default(),
        created_at: Utc::now(),
    };
    save_snapshot(&path, &snapshot).unwrap();
    assert!(matches!(
        load_snapshot(&path),
        Err(JournalError::UnknownSnapshotVersion(_))
    ));
}

#[test]
fn truncate_resets_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.log");
    let (mut journal, _) = Journal::open(&path).unwrap();
    journal.append(&op(1)).unwrap();
    journal.truncate().unwrap();
    assert_eq!(journal.len_since_truncate().unwrap(), 0);
    // Sequence keeps counting so snapshot cut-over stays monotonic
    journal.append(&op(2)).unwrap();
    assert_eq!(journal.seq(), 2);
}
