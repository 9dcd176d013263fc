// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Jobs and job ownership.
//!
//! A job is one correlated unit of work on an agent connection, keyed by a
//! small integer id. It has up to two owners holding it in their tables:
//! the connection executing it and a controller consuming its result.
//! Either back-reference can be cleared independently without destroying
//! the job while the other remains valid; `kill` detaches from both and is
//! idempotent.

use crate::connection::HostConnection;
use fleet_wire::{AgentMessage, DataSource};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Terminal result of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success { code: i32 },
    Failure,
}

impl JobOutcome {
    /// True for a clean zero exit.
    pub fn is_clean(&self) -> bool {
        matches!(self, JobOutcome::Success { code: 0 })
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            JobOutcome::Success { code } => Some(*code),
            JobOutcome::Failure => None,
        }
    }
}

/// What a job's consumer receives.
///
/// `Done(None)` means the job was killed without a terminal message, e.g.
/// because its connection closed.
#[derive(Debug)]
pub enum JobEvent {
    Data { source: DataSource, data: serde_json::Value },
    Done(Option<JobOutcome>),
}

/// Something that holds jobs in a table keyed by id.
///
/// Both connections and controllers implement this; bulk teardown drains
/// the table and kills everything in it.
pub trait JobOwner: Send + Sync {
    fn jobs(&self) -> &Mutex<IndexMap<u64, Arc<Job>>>;

    fn remove_job(&self, job: &Job) {
        self.jobs().lock().shift_remove(&job.id);
    }
}

/// Kill every job the owner holds.
///
/// References the drained jobs hold back to this owner are cleared first,
/// so the kill does not call back into a table we are draining. Jobs whose
/// opposite collaborator already went away have a dead weak ref there,
/// which `kill` tolerates.
pub fn teardown<O: JobOwner + 'static>(owner: &Arc<O>) {
    let drained: Vec<Arc<Job>> = owner.jobs().lock().drain(..).map(|(_, job)| job).collect();
    let target = Arc::as_ptr(owner) as *const ();
    for job in drained {
        job.clear_refs_to(target);
        job.kill(None);
    }
}

struct JobState {
    running: bool,
    killed: bool,
    connection: Option<Weak<HostConnection>>,
    owner: Option<Weak<dyn JobOwner>>,
    events: Option<UnboundedSender<JobEvent>>,
}

/// One in-flight job.
pub struct Job {
    pub id: u64,
    /// Short label for logs ("deploy", "monitor", "shell").
    pub kind: &'static str,
    state: Mutex<JobState>,
}

/// Which back-reference to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSide {
    Connection,
    Owner,
}

impl Job {
    pub(crate) fn new(
        id: u64,
        kind: &'static str,
        connection: Weak<HostConnection>,
        owner: Option<Weak<dyn JobOwner>>,
        events: UnboundedSender<JobEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            state: Mutex::new(JobState {
                running: false,
                killed: false,
                connection: Some(connection),
                owner,
                events: Some(events),
            }),
        })
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub(crate) fn mark_running(&self) {
        self.state.lock().running = true;
    }

    /// Drop one back-reference without killing the job.
    pub fn detach(&self, side: JobSide) {
        let mut state = self.state.lock();
        match side {
            JobSide::Connection => state.connection = None,
            JobSide::Owner => state.owner = None,
        }
    }

    /// Clear whichever back-references point at `target` (by allocation).
    fn clear_refs_to(&self, target: *const ()) {
        let mut state = self.state.lock();
        if state
            .connection
            .as_ref()
            .is_some_and(|w| w.as_ptr() as *const () == target)
        {
            state.connection = None;
        }
        if state
            .owner
            .as_ref()
            .is_some_and(|w| w.as_ptr() as *const () == target)
        {
            state.owner = None;
        }
    }

    /// Route one inbound message to this job.
    pub fn handle_message(self: &Arc<Self>, msg: AgentMessage) {
        match msg {
            AgentMessage::Data { source, data, .. } => {
                let state = self.state.lock();
                if let Some(tx) = &state.events {
                    let _ = tx.send(JobEvent::Data { source, data });
                }
            }
            AgentMessage::Success { code, .. } => {
                self.state.lock().running = false;
                self.kill(Some(JobOutcome::Success { code }));
            }
            AgentMessage::Failure { .. } => {
                self.state.lock().running = false;
                self.kill(Some(JobOutcome::Failure));
            }
            // auth and pong are connection-level, never routed here
            AgentMessage::Auth { .. } | AgentMessage::Pong { .. } => {}
        }
    }

    /// Terminate the job, idempotently.
    ///
    /// If the job is still running on its connection, an explicit kill
    /// message is sent. The job is removed from both owners' tables and
    /// the consumer is notified with the terminal result (`None` when the
    /// job is killed without one).
    pub fn kill(self: &Arc<Self>, outcome: Option<JobOutcome>) {
        let (connection, owner, events, was_running) = {
            let mut state = self.state.lock();
            if state.killed {
                return;
            }
            state.killed = true;
            let was_running = std::mem::replace(&mut state.running, false);
            (
                state.connection.take(),
                state.owner.take(),
                state.events.take(),
                was_running,
            )
        };
        debug!(job = self.id, kind = self.kind, ?outcome, "job killed");
        if let Some(connection) = connection.and_then(|w| w.upgrade()) {
            if was_running {
                connection.spawn_kill(self.id);
            }
            connection.remove_job(self);
        }
        if let Some(owner) = owner.and_then(|w| w.upgrade()) {
            owner.remove_job(self);
        }
        if let Some(tx) = events {
            let _ = tx.send(JobEvent::Done(outcome));
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
