// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::connection::MONITOR_JOB_ID;
use crate::test_support::{connect_authed, harness};
use fleet_wire::AgentMessage;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn monitor_stream_routes_inventory_blocks() {
    let h = harness();
    let (_conn, mut agent) = connect_authed(&h.ctx).await;

    agent
        .send(&AgentMessage::Data {
            id: MONITOR_JOB_ID,
            source: fleet_wire::DataSource::Stdout,
            data: json!({
                "type": "images",
                "full": true,
                "update": [{"id": "img1", "digests": ["app@sha256:abc"], "tags": []}],
                "delete": [],
            }),
        })
        .await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    let routed = h.router.0.lock();
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].0, h.host_id);
    assert_eq!(routed[0].1.kind(), "images");
}

#[tokio::test]
async fn unknown_blocks_are_tolerated() {
    let h = harness();
    let (_conn, mut agent) = connect_authed(&h.ctx).await;

    agent
        .send(&AgentMessage::Data {
            id: MONITOR_JOB_ID,
            source: fleet_wire::DataSource::Stdout,
            data: json!({"type": "future_block", "anything": 1}),
        })
        .await;
    agent
        .send(&AgentMessage::Data {
            id: MONITOR_JOB_ID,
            source: fleet_wire::DataSource::Stdout,
            data: json!({"type": "status", "payload": {"load": 1.0}}),
        })
        .await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    // The bad block was skipped, the good one routed
    assert_eq!(h.router.0.lock().len(), 1);
}

#[tokio::test]
async fn dead_monitor_is_restarted_with_backoff() {
    let h = harness();
    let (_conn, mut agent) = connect_authed(&h.ctx).await;

    let died_at = tokio::time::Instant::now();
    agent.send(&AgentMessage::Failure { id: MONITOR_JOB_ID }).await;

    // The supervisor restarts the monitor on the same reserved id
    let (id, script) = agent.expect_script().await;
    assert_eq!(id, MONITOR_JOB_ID);
    assert_eq!(script.name, "monitor.py");
    assert!(died_at.elapsed() >= h.ctx.tunables.monitor_backoff_initial);

    // And again after a second failure
    agent.send(&AgentMessage::Failure { id: MONITOR_JOB_ID }).await;
    let (id, _) = agent.expect_script().await;
    assert_eq!(id, MONITOR_JOB_ID);
}

#[tokio::test]
async fn replace_monitor_swaps_the_script() {
    let h = harness();
    let (conn, mut agent) = connect_authed(&h.ctx).await;

    conn.replace_monitor(&h.ctx, "replacement-script".to_string());

    // The running instance is killed and a new one dispatched
    let killed = agent.expect_kill().await;
    assert_eq!(killed, MONITOR_JOB_ID);
    let (id, script) = agent.expect_script().await;
    assert_eq!(id, MONITOR_JOB_ID);
    assert_eq!(script.content, "replacement-script");
}
