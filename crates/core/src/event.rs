// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain events fanned out to notification sinks.

use crate::deploy::DeploymentRecord;
use crate::digest::Digest;
use crate::id::HostId;
use serde::{Deserialize, Serialize};

/// Events that observers (UI bridges, alerting) care about.
///
/// Serializes with `{"type": "kind", ...fields}` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    HostUp { host: HostId, hostname: String },
    HostDown { host: HostId, hostname: String },
    /// The host has been down for the whole notice delay without reconnecting.
    HostStillDown { host: HostId, hostname: String },
    ImagePushed { repository: String, tag: String, digest: Digest },
    ImagePinChanged { manifest_id: i64, pinned: bool },
    DeploymentChanged { record: DeploymentRecord },
}

/// Observer seam for domain events.
///
/// Implementations must not block: emit is called from async tasks and
/// should hand off (log, channel send) rather than do I/O inline.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, event: &DomainEvent);
}

/// Sink that drops everything; useful as a default and in tests.
#[derive(Debug, Default, Clone)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn emit(&self, _event: &DomainEvent) {}
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::HostUp { .. } => "host_up",
            DomainEvent::HostDown { .. } => "host_down",
            DomainEvent::HostStillDown { .. } => "host_still_down",
            DomainEvent::ImagePushed { .. } => "image_pushed",
            DomainEvent::ImagePinChanged { .. } => "image_pin_changed",
            DomainEvent::DeploymentChanged { .. } => "deployment_changed",
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
