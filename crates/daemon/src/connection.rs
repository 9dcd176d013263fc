// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One connection to one fleet agent.
//!
//! The connection is a state machine `unauthenticated → authenticated →
//! closed` (with a terminal `failed` after a bad first message), driven by
//! a message-receive loop. The first inbound message must be auth; after
//! that, messages route to jobs by id, pings keep the link alive, and a
//! close while authenticated tears down jobs and schedules the delayed
//! host-down notice.

use crate::config::Tunables;
use crate::deploy::InventoryRouter;
use crate::hosts::HostRegistry;
use crate::job::{teardown, Job, JobEvent, JobOutcome, JobOwner};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use fleet_core::{DomainEvent, HostId, NotificationSink};
use fleet_storage::Store;
use fleet_wire::{
    encode, AgentMessage, CodecError, DataSource, FrameCodec, OutputType, ScriptPayload,
    ServerMessage, StdinType,
};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The monitor job's reserved id.
pub const MONITOR_JOB_ID: u64 = 0;

/// First id handed to ordinary jobs; low ids are reserved.
const FIRST_JOB_ID: u64 = 100;

/// Write timeout for a single outbound message.
const SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from connection handling.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("unexpected {got} message in state {state}")]
    UnexpectedMessage { got: &'static str, state: &'static str },

    #[error("auth deadline passed")]
    AuthTimeout,

    #[error("ping timeout")]
    PingTimeout,

    #[error("connection closed")]
    Closed,

    #[error("job id {0} already in use")]
    JobIdInUse(u64),

    #[error("send failed: {0}")]
    Send(std::io::Error),

    #[error("send timed out")]
    SendTimeout,

    #[error("script failed with code {code:?}")]
    ScriptFailed { code: Option<i32> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared context the connection layer runs against.
pub struct ConnCtx {
    pub store: Arc<Store>,
    pub hosts: Arc<HostRegistry>,
    pub sink: Arc<dyn NotificationSink>,
    pub inventory: Arc<dyn InventoryRouter>,
    /// Content of the agent-side monitor script; replaced at runtime when
    /// the script changes, which also resets restart backoff.
    pub monitor_script: RwLock<String>,
    pub tunables: Tunables,
}

/// Authentication state machine.
enum AuthState {
    Unauthenticated,
    Authenticated { host: HostId, hostname: String },
    /// Bad first message or failed auth; nothing further is processed.
    Failed,
    Closed,
}

impl AuthState {
    fn name(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticated { .. } => "authenticated",
            AuthState::Failed => "failed",
            AuthState::Closed => "closed",
        }
    }
}

/// One TLS connection to one agent.
pub struct HostConnection {
    peer: String,
    auth: Mutex<AuthState>,
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    jobs: Mutex<IndexMap<u64, Arc<Job>>>,
    next_job_id: AtomicU64,
    closed: CancellationToken,
    /// Signalled when the monitor script was replaced externally.
    pub(crate) monitor_replaced: Notify,
}

impl JobOwner for HostConnection {
    fn jobs(&self) -> &Mutex<IndexMap<u64, Arc<Job>>> {
        &self.jobs
    }
}

enum Flow {
    Continue,
    /// Auth just succeeded; the loop arms the heartbeat.
    Authenticated,
    Close,
}

impl HostConnection {
    pub fn new(peer: String, writer: Box<dyn AsyncWrite + Send + Unpin>) -> Arc<Self> {
        Arc::new(Self {
            peer,
            auth: Mutex::new(AuthState::Unauthenticated),
            writer: tokio::sync::Mutex::new(writer),
            jobs: Mutex::new(IndexMap::new()),
            next_job_id: AtomicU64::new(FIRST_JOB_ID),
            closed: CancellationToken::new(),
            monitor_replaced: Notify::new(),
        })
    }

    /// Host identity once authenticated.
    pub fn host(&self) -> Option<(HostId, String)> {
        match &*self.auth.lock() {
            AuthState::Authenticated { host, hostname } => Some((*host, hostname.clone())),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Swap in a new monitor script and restart the monitor for it.
    pub fn replace_monitor(&self, ctx: &ConnCtx, script: String) {
        *ctx.monitor_script.write() = script;
        self.monitor_replaced.notify_waiters();
    }

    pub fn next_job_id(&self) -> u64 {
        self.next_job_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Serialize and write one message, framed.
    pub async fn send_message(&self, msg: &ServerMessage) -> Result<(), ConnectionError> {
        let bytes = encode(msg)?;
        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(SEND_TIMEOUT, writer.write_all(&bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.closed.cancel();
                Err(ConnectionError::Send(e))
            }
            Err(_) => {
                self.closed.cancel();
                Err(ConnectionError::SendTimeout)
            }
        }
    }

    /// Fire-and-forget a kill message for a job id.
    pub fn spawn_kill(self: &Arc<Self>, id: u64) {
        let conn = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = conn.send_message(&ServerMessage::Kill { id }).await {
                debug!(peer = %conn.peer, job = id, error = %e, "kill message not delivered");
            }
        });
    }

    /// Dispatch a script job with a fresh id.
    ///
    /// `owner` defaults to the connection itself; pass a controller to have
    /// the job appear in its table as well.
    pub async fn start_job(
        self: &Arc<Self>,
        kind: &'static str,
        script: ScriptPayload,
        owner: Option<Weak<dyn JobOwner>>,
    ) -> Result<(Arc<Job>, UnboundedReceiver<JobEvent>), ConnectionError> {
        let id = self.next_job_id();
        self.start_job_with_id(id, kind, script, owner).await
    }

    /// Dispatch the long-lived monitor job on its reserved id, replacing
    /// any previous instance.
    pub async fn start_monitor_job(
        self: &Arc<Self>,
        content: String,
    ) -> Result<(Arc<Job>, UnboundedReceiver<JobEvent>), ConnectionError> {
        if let Some(existing) = self.jobs.lock().get(&MONITOR_JOB_ID).cloned() {
            existing.kill(None);
        }
        let script = ScriptPayload {
            name: "monitor.py".to_string(),
            interpreter: "/usr/bin/python3".to_string(),
            content,
            args: Vec::new(),
            stdin_type: StdinType::None,
            stdout_type: OutputType::BlockedJson,
            stderr_type: OutputType::Text,
        };
        self.start_job_with_id(MONITOR_JOB_ID, "monitor", script, None).await
    }

    async fn start_job_with_id(
        self: &Arc<Self>,
        id: u64,
        kind: &'static str,
        script: ScriptPayload,
        owner: Option<Weak<dyn JobOwner>>,
    ) -> Result<(Arc<Job>, UnboundedReceiver<JobEvent>), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let (tx, rx) = unbounded_channel();
        let owner = owner.or_else(|| {
            let as_owner: Arc<dyn JobOwner> = Arc::clone(self) as Arc<dyn JobOwner>;
            Some(Arc::downgrade(&as_owner))
        });
        let job = Job::new(id, kind, Arc::downgrade(self), owner.clone(), tx);
        {
            let mut jobs = self.jobs.lock();
            if jobs.contains_key(&id) {
                return Err(ConnectionError::JobIdInUse(id));
            }
            jobs.insert(id, Arc::clone(&job));
        }
        if let Some(owner) = owner.as_ref().and_then(Weak::upgrade) {
            owner.jobs().lock().insert(id, Arc::clone(&job));
        }
        let msg = ServerMessage::RunScript { id, script };
        if let Err(e) = self.send_message(&msg).await {
            job.kill(None);
            return Err(e);
        }
        job.mark_running();
        debug!(peer = %self.peer, job = id, kind, "job dispatched");
        Ok((job, rx))
    }

    /// Run a one-shot shell command, returning its stdout.
    pub async fn run_shell(self: &Arc<Self>, command: &str) -> Result<String, ConnectionError> {
        self.run_instant(
            "runShell.sh",
            "/bin/sh",
            command.to_string(),
            Vec::new(),
        )
        .await
    }

    /// Read a small text file off the host.
    pub async fn read_file(self: &Arc<Self>, path: &str) -> Result<String, ConnectionError> {
        self.run_instant(
            "readFile.sh",
            "/bin/sh",
            "cat \"$1\"".to_string(),
            vec![path.to_string()],
        )
        .await
    }

    /// Nudge a service on the host to pick up new state.
    pub async fn poke_service(self: &Arc<Self>, service: &str) -> Result<(), ConnectionError> {
        self.run_instant(
            "pokeService.sh",
            "/bin/sh",
            "systemctl reload-or-restart \"$1\"".to_string(),
            vec![service.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn run_instant(
        self: &Arc<Self>,
        name: &str,
        interpreter: &str,
        content: String,
        args: Vec<String>,
    ) -> Result<String, ConnectionError> {
        let script = ScriptPayload {
            name: name.to_string(),
            interpreter: interpreter.to_string(),
            content,
            args,
            stdin_type: StdinType::None,
            stdout_type: OutputType::Text,
            stderr_type: OutputType::Text,
        };
        let (_job, mut rx) = self.start_job("shell", script, None).await?;
        let mut stdout = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                JobEvent::Data { source: DataSource::Stdout, data } => {
                    stdout.push_str(&decode_text(&data));
                }
                JobEvent::Data { source: DataSource::Stderr, .. } => {}
                JobEvent::Done(Some(outcome)) if outcome.is_clean() => return Ok(stdout),
                JobEvent::Done(Some(outcome)) => {
                    return Err(ConnectionError::ScriptFailed { code: outcome.code() })
                }
                JobEvent::Done(None) => return Err(ConnectionError::Closed),
            }
        }
        Err(ConnectionError::Closed)
    }

    /// Drive the connection until it closes, then run close bookkeeping.
    pub async fn run(
        self: Arc<Self>,
        mut reader: impl AsyncRead + Send + Unpin,
        ctx: Arc<ConnCtx>,
    ) {
        match self.read_loop(&mut reader, &ctx).await {
            Ok(()) => info!(peer = %self.peer, "agent disconnected"),
            Err(e) => warn!(peer = %self.peer, error = %e, "agent connection error"),
        }
        self.finish(&ctx);
    }

    async fn read_loop(
        self: &Arc<Self>,
        reader: &mut (impl AsyncRead + Send + Unpin),
        ctx: &Arc<ConnCtx>,
    ) -> Result<(), ConnectionError> {
        let mut codec = FrameCodec::new();
        let mut buf = vec![0u8; 64 * 1024];

        let auth_deadline = Instant::now() + ctx.tunables.auth_timeout;
        let mut authed = false;
        let mut ping_id: u64 = 10;
        let mut ping_at = far_future();
        let mut pong_deadline: Option<Instant> = None;

        loop {
            let pong_at = pong_deadline.unwrap_or_else(far_future);
            tokio::select! {
                read = reader.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(());
                    }
                    for frame in codec.feed(&buf[..n])? {
                        let msg: AgentMessage = FrameCodec::parse(&frame)?;
                        match self.on_message(msg, ctx, &mut pong_deadline, &mut ping_at, ping_id).await? {
                            Flow::Continue => {}
                            Flow::Authenticated => {
                                authed = true;
                                ping_at = Instant::now() + ctx.tunables.ping_interval;
                            }
                            Flow::Close => return Ok(()),
                        }
                    }
                }
                _ = tokio::time::sleep_until(auth_deadline), if !authed => {
                    warn!(peer = %self.peer, "auth deadline passed");
                    *self.auth.lock() = AuthState::Failed;
                    return Err(ConnectionError::AuthTimeout);
                }
                _ = tokio::time::sleep_until(ping_at), if authed && pong_deadline.is_none() => {
                    ping_id = ping_id.wrapping_add(1);
                    pong_deadline = Some(Instant::now() + ctx.tunables.pong_timeout);
                    ping_at = far_future();
                    self.send_message(&ServerMessage::Ping { id: ping_id }).await?;
                }
                _ = tokio::time::sleep_until(pong_at), if pong_deadline.is_some() => {
                    warn!(peer = %self.peer, "ping timeout");
                    return Err(ConnectionError::PingTimeout);
                }
                _ = self.closed.cancelled() => {
                    return Err(ConnectionError::Closed);
                }
            }
        }
    }

    async fn on_message(
        self: &Arc<Self>,
        msg: AgentMessage,
        ctx: &Arc<ConnCtx>,
        pong_deadline: &mut Option<Instant>,
        ping_at: &mut Instant,
        ping_id: u64,
    ) -> Result<Flow, ConnectionError> {
        let state = self.auth.lock().name();
        match (state, msg) {
            ("failed", _) => Ok(Flow::Close),

            ("unauthenticated", AgentMessage::Auth { hostname, password }) => {
                self.handle_auth(ctx, hostname, password).await
            }
            ("unauthenticated", other) => {
                warn!(peer = %self.peer, got = %other, "first message was not auth");
                *self.auth.lock() = AuthState::Failed;
                Err(ConnectionError::UnexpectedMessage {
                    got: "non-auth",
                    state: "unauthenticated",
                })
            }

            ("authenticated", AgentMessage::Auth { .. }) => {
                warn!(peer = %self.peer, "repeated auth message");
                Err(ConnectionError::UnexpectedMessage { got: "auth", state: "authenticated" })
            }
            ("authenticated", AgentMessage::Pong { id }) => {
                if pong_deadline.is_some() && id == ping_id {
                    *pong_deadline = None;
                    *ping_at = Instant::now() + ctx.tunables.ping_interval;
                }
                Ok(Flow::Continue)
            }
            ("authenticated", msg) => {
                // Everything else routes by job id.
                if let Some(id) = msg.job_id() {
                    let job = self.jobs.lock().get(&id).cloned();
                    match job {
                        Some(job) => job.handle_message(msg),
                        None => {
                            debug!(peer = %self.peer, job = id, "message for unknown job");
                            self.spawn_kill(id);
                        }
                    }
                }
                Ok(Flow::Continue)
            }

            (state, _) => Err(ConnectionError::UnexpectedMessage { got: "message", state }),
        }
    }

    async fn handle_auth(
        self: &Arc<Self>,
        ctx: &Arc<ConnCtx>,
        hostname: String,
        password: String,
    ) -> Result<Flow, ConnectionError> {
        // Race validation against the floor delay so the reply never comes
        // back faster than the floor, bounding the timing signal.
        let (validated, ()) = tokio::join!(
            validate_auth(ctx, &hostname, &password),
            tokio::time::sleep(ctx.tunables.auth_floor),
        );

        match validated {
            Some(host) => {
                info!(peer = %self.peer, %hostname, %host, "agent authorized");
                *self.auth.lock() =
                    AuthState::Authenticated { host, hostname: hostname.clone() };
                ctx.hosts.register(host, Arc::clone(self));
                ctx.sink.emit(&DomainEvent::HostUp { host, hostname });
                crate::monitor::spawn_supervisor(Arc::clone(self), Arc::clone(ctx));
                Ok(Flow::Authenticated)
            }
            None => {
                warn!(peer = %self.peer, %hostname, "agent auth rejected");
                *self.auth.lock() = AuthState::Failed;
                Ok(Flow::Close)
            }
        }
    }

    /// Close bookkeeping: deregister, notify, kill jobs.
    fn finish(self: &Arc<Self>, ctx: &Arc<ConnCtx>) {
        let previous = std::mem::replace(&mut *self.auth.lock(), AuthState::Closed);
        self.closed.cancel();
        if let AuthState::Authenticated { host, hostname } = previous {
            // A newer connection may have taken the host id already; only
            // the current holder reports the host as down.
            if ctx.hosts.deregister(host, self) {
                ctx.sink.emit(&DomainEvent::HostDown { host, hostname: hostname.clone() });
                ctx.hosts.schedule_down_notice(
                    host,
                    hostname,
                    ctx.tunables.down_notice_delay,
                    Arc::clone(&ctx.sink),
                );
            }
        }
        teardown(self);
    }
}

async fn validate_auth(ctx: &ConnCtx, hostname: &str, password: &str) -> Option<HostId> {
    let secret = ctx.store.host_secret(hostname)?;
    fleet_registry::verify_password(password, &secret.password_hash).then_some(secret.host)
}

/// Decode a `data` frame from a text stream (base64 on the wire).
pub(crate) fn decode_text(data: &serde_json::Value) -> String {
    let Some(b64) = data.as_str() else {
        return String::new();
    };
    match BASE64_STANDARD.decode(b64) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => b64.to_string(),
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60 * 60 * 24)
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
