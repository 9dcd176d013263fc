// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fleet-storage: persistence for the fleet management server.
//!
//! Two halves: a content-addressed [`BlobStore`] for registry layer/config
//! blobs with resumable upload sessions, and a [`Store`] holding the
//! manifest / deployment / host-secret tables as an append-only journal of
//! operations replayed into a [`MaterializedState`].

pub mod blobs;
pub mod journal;
pub mod state;
pub mod store;

pub use blobs::{BlobError, BlobStore};
pub use journal::{Journal, JournalError, Snapshot};
pub use state::{HostSecret, MaterializedState, NewDeployment, NewManifest, Op};
pub use store::{Store, StoreError};
