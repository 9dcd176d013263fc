// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification sinks.
//!
//! Domain events (host up/down, image pushed, deployment changed) fan out
//! to whatever observers are wired in at startup. The default sink writes
//! structured log lines; UI bridges and alerting attach their own.

use fleet_core::{DomainEvent, NotificationSink};
use std::sync::Arc;
use tracing::info;

/// Sink that logs every event with structured fields.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn emit(&self, event: &DomainEvent) {
        match event {
            DomainEvent::HostUp { host, hostname } => {
                info!(%host, %hostname, "host up");
            }
            DomainEvent::HostDown { host, hostname } => {
                info!(%host, %hostname, "host down");
            }
            DomainEvent::HostStillDown { host, hostname } => {
                info!(%host, %hostname, "host still down");
            }
            DomainEvent::ImagePushed { repository, tag, digest } => {
                info!(repository, tag, %digest, "image pushed");
            }
            DomainEvent::ImagePinChanged { manifest_id, pinned } => {
                info!(manifest_id, pinned, "image pin changed");
            }
            DomainEvent::DeploymentChanged { record } => {
                info!(
                    host = %record.host,
                    container = %record.container,
                    digest = %record.digest,
                    open = record.is_open(),
                    "deployment changed"
                );
            }
        }
    }
}

/// Broadcast to several sinks in registration order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for FanoutSink {
    fn emit(&self, event: &DomainEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
