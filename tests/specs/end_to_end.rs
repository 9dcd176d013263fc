// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The full push → deploy → confirm → disappear scenario.

use super::util::{connect_agent, stack};
use fleet_daemon::deploy::DeployRequest;
use fleet_wire::AgentMessage;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn push_deploy_confirm_and_disappear() {
    let s = stack();

    // Push app:latest referencing two layer blobs
    let digest = s.push_manifest("app", "latest", &[b"blob-a", b"blob-b"]);

    // Agent for host 7 connects and authenticates
    let (_conn, mut agent) = connect_agent(&s).await;

    // Deploy app:latest to container "web"
    let reconciler = std::sync::Arc::clone(&s.reconciler);
    let host = s.host_id;
    let deploy = tokio::spawn(async move {
        reconciler
            .deploy(DeployRequest {
                host,
                image: "app:latest".to_string(),
                container: "web".to_string(),
                user: "spec".to_string(),
                config: Default::default(),
                rollback_on_failure: false,
            })
            .await
    });

    // The agent runs the deploy script and reports success
    let (job_id, script) = agent.expect_script().await;
    assert_eq!(script.name, "deploy.sh");
    assert_eq!(script.args[1], format!("app@{digest}"));
    agent.send(&AgentMessage::Success { id: job_id, code: 0 }).await;
    deploy.await.unwrap().unwrap();

    // The monitor stream confirms the container before the timeout
    agent
        .monitor_block(json!({
            "type": "images",
            "full": true,
            "update": [{"id": "img-1", "digests": [format!("app@{digest}")], "tags": []}],
            "delete": [],
        }))
        .await;
    agent
        .monitor_block(json!({
            "type": "containers",
            "full": true,
            "update": [{
                "id": "c-web", "name": "/web", "image": "img-1",
                "state": "running", "created": 1,
            }],
            "delete": [],
        }))
        .await;

    // Exactly one open record for (host 7, "web") with the pushed digest
    wait_for(|| {
        let history = s.store.deployment_history(s.host_id, "web");
        history.len() == 1 && history[0].digest == digest && history[0].is_open()
    })
    .await;

    // The optimistic timer was defused: nothing new appears later
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(s.store.deployment_history(s.host_id, "web").len(), 1);

    // The container disappears; the record closes and nothing replaces it
    agent
        .monitor_block(json!({
            "type": "containers",
            "full": false,
            "update": [],
            "delete": ["c-web"],
        }))
        .await;
    wait_for(|| {
        let history = s.store.deployment_history(s.host_id, "web");
        history.len() == 1 && !history[0].is_open()
    })
    .await;
}

#[tokio::test]
async fn redeploy_closes_previous_record() {
    let s = stack();
    let v1 = s.push_manifest("app", "v1", &[b"one"]);
    let v2 = s.push_manifest("app", "v2", &[b"two"]);
    let (_conn, mut agent) = connect_agent(&s).await;

    for image in ["app:v1", "app:v2"] {
        let reconciler = std::sync::Arc::clone(&s.reconciler);
        let host = s.host_id;
        let image = image.to_string();
        let deploy = tokio::spawn(async move {
            reconciler
                .deploy(DeployRequest {
                    host,
                    image,
                    container: "web".to_string(),
                    user: "spec".to_string(),
                    config: Default::default(),
                    rollback_on_failure: false,
                })
                .await
        });
        let (job_id, _) = agent.expect_script().await;
        agent.send(&AgentMessage::Success { id: job_id, code: 0 }).await;
        deploy.await.unwrap().unwrap();
        // Let the optimistic timer commit each deploy
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    let history = s.store.deployment_history(s.host_id, "web");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].digest, v1);
    assert!(!history[0].is_open());
    assert_eq!(history[1].digest, v2);
    assert!(history[1].is_open());
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
