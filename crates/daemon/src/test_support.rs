// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for daemon tests: an in-memory agent endpoint speaking
//! the real wire protocol over a duplex pipe, and a ready-made context.

use crate::config::Tunables;
use crate::connection::{ConnCtx, HostConnection};
use crate::deploy::InventoryRouter;
use crate::hosts::HostRegistry;
use async_trait::async_trait;
use fleet_core::{DomainEvent, HostId, InventoryUpdate, NotificationSink};
use fleet_storage::Store;
use fleet_wire::{encode, AgentMessage, FrameCodec, ScriptPayload, ServerMessage};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub(crate) const TEST_PASSWORD: &str = "agent-password";

/// Collects emitted domain events.
#[derive(Default)]
pub(crate) struct CaptureSink(pub Mutex<Vec<DomainEvent>>);

impl NotificationSink for CaptureSink {
    fn emit(&self, event: &DomainEvent) {
        self.0.lock().push(event.clone());
    }
}

/// Records everything the monitor stream routed.
#[derive(Default)]
pub(crate) struct CaptureRouter(pub Mutex<Vec<(HostId, InventoryUpdate)>>);

#[async_trait]
impl InventoryRouter for CaptureRouter {
    async fn handle(&self, host: HostId, update: InventoryUpdate) {
        self.0.lock().push((host, update));
    }
}

pub(crate) struct Harness {
    pub _dir: tempfile::TempDir,
    pub store: Arc<Store>,
    pub hosts: Arc<HostRegistry>,
    pub sink: Arc<CaptureSink>,
    pub router: Arc<CaptureRouter>,
    pub ctx: Arc<ConnCtx>,
    pub host_id: HostId,
}

/// Store + registry + context with one provisioned host ("node1").
pub(crate) fn harness() -> Harness {
    harness_with_router(Arc::new(CaptureRouter::default()))
}

pub(crate) fn harness_with_router(router: Arc<CaptureRouter>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(&dir.path().join("tables")).unwrap());
    let hash = fleet_registry::hash_password(TEST_PASSWORD).unwrap();
    let host_id = store.set_host_secret("node1", &hash).unwrap();

    let hosts = Arc::new(HostRegistry::new());
    let sink = Arc::new(CaptureSink::default());
    let ctx = Arc::new(ConnCtx {
        store: Arc::clone(&store),
        hosts: Arc::clone(&hosts),
        sink: Arc::clone(&sink) as Arc<dyn fleet_core::NotificationSink>,
        inventory: Arc::clone(&router) as Arc<dyn InventoryRouter>,
        monitor_script: RwLock::new("monitor-stub".to_string()),
        tunables: Tunables::fast(),
    });
    Harness { _dir: dir, store, hosts, sink, router, ctx, host_id }
}

/// The agent end of a connection, speaking real frames.
pub(crate) struct TestAgent {
    stream: DuplexStream,
    codec: FrameCodec,
    pending: Vec<Vec<u8>>,
}

impl TestAgent {
    pub fn new(stream: DuplexStream) -> Self {
        Self { stream, codec: FrameCodec::new(), pending: Vec::new() }
    }

    pub async fn send(&mut self, msg: &AgentMessage) {
        self.stream.write_all(&encode(msg).unwrap()).await.unwrap();
    }

    /// Next message from the server; `None` when the connection closed.
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

    /// Wait for a run_script, transparently answering pings.
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

    /// Wait for a kill, transparently answering pings.
    pub async fn expect_kill(&mut self) -> u64 {
        loop {
            match self.recv().await {
                Some(ServerMessage::Ping { id }) => {
                    self.send(&AgentMessage::Pong { id }).await;
                }
                Some(ServerMessage::Kill { id }) => return id,
                Some(other) => panic!("expected kill, got {other:?}"),
                None => panic!("connection closed while waiting for kill"),
            }
        }
    }
}

/// Spin up a connection against the context and return both ends.
pub(crate) fn connect(ctx: &Arc<ConnCtx>) -> (Arc<HostConnection>, TestAgent) {
    let (agent_end, server_end) = tokio::io::duplex(256 * 1024);
    let (reader, writer) = tokio::io::split(server_end);
    let conn = HostConnection::new("test-peer".to_string(), Box::new(writer));
    tokio::spawn(Arc::clone(&conn).run(reader, Arc::clone(ctx)));
    (conn, TestAgent::new(agent_end))
}

/// Connect and authenticate; consumes the initial monitor run_script so
/// tests start from a quiet line.
pub(crate) async fn connect_authed(ctx: &Arc<ConnCtx>) -> (Arc<HostConnection>, TestAgent) {
    let (conn, mut agent) = connect(ctx);
    agent
        .send(&AgentMessage::Auth {
            hostname: "node1".to_string(),
            password: TEST_PASSWORD.to_string(),
        })
        .await;
    let (id, script) = agent.expect_script().await;
    assert_eq!(id, crate::connection::MONITOR_JOB_ID);
    assert_eq!(script.name, "monitor.py");
    (conn, agent)
}
