// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide directory of connected hosts.
//!
//! Connections register themselves after auth and deregister on close; a
//! close also schedules a delayed "host still down" notice that the next
//! reconnect cancels. Deregistration is pointer-guarded so an old
//! connection cannot evict the newer one that replaced it.

use crate::connection::HostConnection;
use fleet_core::{DomainEvent, HostId, NotificationSink};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct DownNotice {
    generation: u64,
    token: CancellationToken,
}

/// Directory of currently-connected agents keyed by host id.
#[derive(Default)]
pub struct HostRegistry {
    connections: Mutex<HashMap<HostId, Arc<HostConnection>>>,
    notices: Mutex<HashMap<HostId, DownNotice>>,
    generation: AtomicU64,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated connection, cancelling any pending down
    /// notice for the host. A previous connection for the same id is
    /// replaced; its own close will not evict this one.
    pub fn register(&self, host: HostId, conn: Arc<HostConnection>) {
        self.cancel_down_notice(host);
        if let Some(old) = self.connections.lock().insert(host, conn) {
            warn!(%host, "replacing existing connection for host");
            old.closed_token().cancel();
        }
    }

    /// Remove the entry for `host` if it is still this connection.
    ///
    /// Returns false when a newer connection already replaced it, in which
    /// case the caller must not treat the host as down.
    pub fn deregister(&self, host: HostId, conn: &Arc<HostConnection>) -> bool {
        let mut connections = self.connections.lock();
        if connections
            .get(&host)
            .is_some_and(|current| Arc::ptr_eq(current, conn))
        {
            connections.remove(&host);
            true
        } else {
            false
        }
    }

    pub fn get(&self, host: HostId) -> Option<Arc<HostConnection>> {
        self.connections.lock().get(&host).cloned()
    }

    pub fn connected(&self) -> Vec<HostId> {
        self.connections.lock().keys().copied().collect()
    }

    /// Arm the delayed "host still down" notice.
    ///
    /// Replaces any notice already pending for the host. The fired callback
    /// re-checks its generation so a cancelled timer that already started
    /// is a no-op.
    pub fn schedule_down_notice(
        self: &Arc<Self>,
        host: HostId,
        hostname: String,
        delay: Duration,
        sink: Arc<dyn NotificationSink>,
    ) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        if let Some(previous) = self
            .notices
            .lock()
            .insert(host, DownNotice { generation, token: token.clone() })
        {
            previous.token.cancel();
        }

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    // Only fire if this notice is still the armed one.
                    let still_armed = {
                        let mut notices = registry.notices.lock();
                        match notices.get(&host) {
                            Some(n) if n.generation == generation => {
                                notices.remove(&host);
                                true
                            }
                            _ => false,
                        }
                    };
                    if still_armed {
                        info!(%host, %hostname, "host has stayed down past the notice delay");
                        sink.emit(&DomainEvent::HostStillDown { host, hostname });
                    }
                }
            }
        });
    }

    /// Drop a pending down notice, e.g. because the host reconnected.
    pub fn cancel_down_notice(&self, host: HostId) {
        if let Some(notice) = self.notices.lock().remove(&host) {
            notice.token.cancel();
        }
    }

    #[cfg(test)]
    pub(crate) fn notice_pending(&self, host: HostId) -> bool {
        self.notices.lock().contains_key(&host)
    }
}

#[cfg(test)]
#[path = "hosts_tests.rs"]
mod tests;
