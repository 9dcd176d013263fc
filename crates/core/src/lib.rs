// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fleet-core: Domain types for the fleet management server

pub mod macros;

pub mod backoff;
pub mod clock;
pub mod deploy;
pub mod digest;
pub mod event;
pub mod id;
pub mod image;
pub mod inventory;

pub use backoff::Backoff;
pub use clock::{Clock, FakeClock, SystemClock};
#[cfg(any(test, feature = "test-support"))]
pub use deploy::DeploymentRecordBuilder;
pub use deploy::{DeploymentRecord, RuntimeConfig};
pub use digest::{Digest, DigestError};
pub use event::{DomainEvent, NotificationSink, NullSink};
pub use id::{short, GrantId, HostId, UploadId};
#[cfg(any(test, feature = "test-support"))]
pub use image::ManifestRecordBuilder;
pub use image::{
    ImageManifest, ManifestConfig, ManifestLayer, ManifestRecord, TagPin, LAYER_MEDIA_TYPE,
    MANIFEST_MEDIA_TYPE,
};
pub use inventory::{ContainerInfo, ImageInfo, InventoryUpdate};
