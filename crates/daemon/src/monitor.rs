// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monitor job supervision.
//!
//! Every authenticated connection carries one long-lived monitor job that
//! streams inventory blocks. The monitor is expected to run forever; when
//! it dies it is restarted after a backoff that grows 1.5x per consecutive
//! failure and resets when the monitor script is replaced from outside.

use crate::connection::{decode_text, ConnCtx, HostConnection};
use crate::job::JobEvent;
use fleet_core::{Backoff, HostId, InventoryUpdate};
use fleet_wire::DataSource;
use std::sync::Arc;
use tracing::{debug, warn};

/// Start the supervision task for a freshly authenticated connection.
pub fn spawn_supervisor(conn: Arc<HostConnection>, ctx: Arc<ConnCtx>) {
    tokio::spawn(supervise(conn, ctx));
}

enum RunEnd {
    Died,
    Replaced,
    ConnectionClosed,
}

async fn supervise(conn: Arc<HostConnection>, ctx: Arc<ConnCtx>) {
    let Some((host, hostname)) = conn.host() else {
        return;
    };
    let mut backoff = Backoff::new(
        ctx.tunables.monitor_backoff_initial,
        1.5,
        ctx.tunables.monitor_backoff_cap,
    );

    loop {
        if conn.is_closed() {
            return;
        }
        let script = ctx.monitor_script.read().clone();
        match conn.start_monitor_job(script).await {
            Ok((job, mut events)) => {
                match run_monitor(&conn, &ctx, host, &mut events).await {
                    RunEnd::Replaced => {
                        // New script; kill the old instance and start over
                        // with a fresh backoff.
                        job.kill(None);
                        while events.recv().await.is_some() {}
                        backoff.reset();
                        continue;
                    }
                    RunEnd::ConnectionClosed => return,
                    RunEnd::Died => {}
                }
            }
            Err(e) => {
                warn!(%hostname, error = %e, "unable to start monitor job");
            }
        }
        if conn.is_closed() {
            return;
        }
        let delay = backoff.next_delay();
        warn!(%hostname, ?delay, "monitor job died, restarting");
        let closed = conn.closed_token();
        tokio::select! {
            _ = closed.cancelled() => return,
            _ = conn.monitor_replaced.notified() => backoff.reset(),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_monitor(
    conn: &Arc<HostConnection>,
    ctx: &Arc<ConnCtx>,
    host: HostId,
    events: &mut tokio::sync::mpsc::UnboundedReceiver<JobEvent>,
) -> RunEnd {
    loop {
        tokio::select! {
            _ = conn.monitor_replaced.notified() => return RunEnd::Replaced,
            event = events.recv() => match event {
                Some(JobEvent::Data { source: DataSource::Stdout, data }) => {
                    route_block(ctx, host, data).await;
                }
                Some(JobEvent::Data { source: DataSource::Stderr, data }) => {
                    let text = decode_text(&data);
                    if !text.trim().is_empty() {
                        debug!(%host, stderr = %text, "monitor stderr");
                    }
                }
                Some(JobEvent::Done(outcome)) => {
                    debug!(%host, ?outcome, "monitor job ended");
                    return if conn.is_closed() {
                        RunEnd::ConnectionClosed
                    } else {
                        RunEnd::Died
                    };
                }
                None => {
                    return if conn.is_closed() {
                        RunEnd::ConnectionClosed
                    } else {
                        RunEnd::Died
                    };
                }
            }
        }
    }
}

/// Parse one streamed stdout block and hand it to the reconciler.
///
/// Unknown block types are tolerated; agents may be newer than the server.
async fn route_block(ctx: &Arc<ConnCtx>, host: HostId, data: serde_json::Value) {
    match serde_json::from_value::<InventoryUpdate>(data) {
        Ok(update) => {
            debug!(%host, kind = update.kind(), "inventory block");
            ctx.inventory.handle(host, update).await;
        }
        Err(e) => {
            debug!(%host, error = %e, "ignoring unknown monitor block");
        }
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
