// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared stack fixture for the specs.

use fleet_core::{Digest, HostId, ManifestLayer, NotificationSink, NullSink, SystemClock};
use fleet_daemon::config::Tunables;
use fleet_daemon::connection::{ConnCtx, HostConnection, MONITOR_JOB_ID};
use fleet_daemon::deploy::{InventoryRouter, Reconciler};
use fleet_daemon::HostRegistry;
use fleet_registry::{hash_password, GrantTable, ManifestStore};
use fleet_storage::{BlobStore, Store};
use fleet_wire::{encode, AgentMessage, FrameCodec, ScriptPayload, ServerMessage};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const AGENT_PASSWORD: &str = "spec-password";

pub struct Stack {
    pub _dir: tempfile::TempDir,
    pub store: Arc<Store>,
    pub blobs: Arc<BlobStore>,
    pub manifests: Arc<ManifestStore>,
    pub hosts: Arc<HostRegistry>,
    pub reconciler: Arc<Reconciler<SystemClock>>,
    pub ctx: Arc<ConnCtx>,
    pub host_id: HostId,
}

fn fast_tunables() -> Tunables {
    Tunables {
        auth_timeout: Duration::from_millis(500),
        auth_floor: Duration::from_millis(5),
        ping_interval: Duration::from_millis(200),
        pong_timeout: Duration::from_millis(500),
        down_notice_delay: Duration::from_millis(100),
        deploy_commit_timeout: Duration::from_millis(100),
        monitor_backoff_initial: Duration::from_millis(20),
        monitor_backoff_cap: Duration::from_millis(100),
    }
}

/// Build the whole in-process stack with one provisioned host.
pub fn stack() -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(&dir.path().join("tables")).unwrap());
    let blobs = Arc::new(BlobStore::open(&dir.path().join("registry")).unwrap());
    let manifests = Arc::new(ManifestStore::new(Arc::clone(&store), Arc::clone(&blobs)));
    let hosts = Arc::new(HostRegistry::new());
    let clock = SystemClock;
    let grants = Arc::new(GrantTable::new(clock.clone()));
    let sink: Arc<dyn NotificationSink> = Arc::new(NullSink);

    let host_id = store
        .set_host_secret("host7", &hash_password(AGENT_PASSWORD).unwrap())
        .unwrap();

    let reconciler = Reconciler::new(
        Arc::clone(&store),
        Arc::clone(&manifests),
        Arc::clone(&hosts),
        grants,
        Arc::clone(&sink),
        clock,
        "registry.spec:8443".to_string(),
        fast_tunables(),
    );

    let ctx = Arc::new(ConnCtx {
        store: Arc::clone(&store),
        hosts: Arc::clone(&hosts),
        sink,
        inventory: Arc::clone(&reconciler) as Arc<dyn InventoryRouter>,
        monitor_script: RwLock::new("monitor-spec".to_string()),
        tunables: fast_tunables(),
    });

    Stack { _dir: dir, store, blobs, manifests, hosts, reconciler, ctx, host_id }
}

impl Stack {
    /// Push a manifest for `repository:tag` with the given layer blobs.
    pub fn push_manifest(&self, repository: &str, tag: &str, layers: &[&[u8]]) -> Digest {
        let config_digest = self.blobs.put(b"{\"config\":{}}").unwrap();
        let mut entries = Vec::new();
        for layer in layers {
            let digest = self.blobs.put(layer).unwrap();
            entries.push(ManifestLayer {
                digest,
                size: layer.len() as u64,
                media_type: fleet_core::LAYER_MEDIA_TYPE.to_string(),
            });
        }
        let body = serde_json::to_vec(&serde_json::json!({
            "config": {"digest": config_digest},
            "layers": entries,
        }))
        .unwrap();
        self.manifests
            .push(repository, tag, &body, "spec", 1_000)
            .unwrap()
            .digest
    }
}

/// The agent end of a connection.
pub struct Agent {
    stream: DuplexStream,
    codec: FrameCodec,
    pending: Vec<Vec<u8>>,
}

impl Agent {
    pub async fn send(&mut self, msg: &AgentMessage) {
        self.stream.write_all(&encode(msg).unwrap()).await.unwrap();
    }

    pub async fn recv(&mut self) -> Option<ServerMessage> {
        loop {
            if !self.pending.is_empty() {
                let frame = self.pending.remove(0);
                return Some(FrameCodec::parse(&frame).unwrap());
            }
            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            self.pending = self.codec.feed(&buf[..n]).unwrap();
        }
    }

    /// Next run_script, answering pings along the way.
    pub async fn expect_script(&mut self) -> (u64, ScriptPayload) {
        loop {
            match self.recv().await {
                Some(ServerMessage::Ping { id }) => {
                    self.send(&AgentMessage::Pong { id }).await;
                }
                Some(ServerMessage::RunScript { id, script }) => return (id, script),
                Some(other) => panic!("expected run_script, got {other:?}"),
                None => panic!("connection closed while waiting for run_script"),
            }
        }
    }

    /// Stream one inventory block on the monitor job.
    pub async fn monitor_block(&mut self, block: serde_json::Value) {
        self.send(&AgentMessage::Data {
            id: MONITOR_JOB_ID,
            source: fleet_wire::DataSource::Stdout,
            data: block,
        })
        .await;
    }
}

/// Connect and authenticate an agent; consumes the monitor run_script.
pub async fn connect_agent(stack: &Stack) -> (Arc<HostConnection>, Agent) {
    let (agent_end, server_end) = tokio::io::duplex(256 * 1024);
    let (reader, writer) = tokio::io::split(server_end);
    let conn = HostConnection::new("spec-agent".to_string(), Box::new(writer));
    tokio::spawn(Arc::clone(&conn).run(reader, Arc::clone(&stack.ctx)));

    let mut agent = Agent { stream: agent_end, codec: FrameCodec::new(), pending: Vec::new() };
    agent
        .send(&AgentMessage::Auth {
            hostname: "host7".to_string(),
            password: AGENT_PASSWORD.to_string(),
        })
        .await;
    let (id, _script) = agent.expect_script().await;
    assert_eq!(id, MONITOR_JOB_ID);
    (conn, agent)
}
