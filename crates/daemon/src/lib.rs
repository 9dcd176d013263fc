// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet management daemon library.
//!
//! Holds the agent-facing half of the server: the TLS listener, the
//! per-connection protocol state machine, job multiplexing, the host
//! registry, monitor supervision, and the deployment reconciler that ties
//! agent-reported inventory back to registry state.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod connection;
pub mod deploy;
pub mod env;
pub mod hosts;
pub mod job;
pub mod listener;
pub mod monitor;
pub mod notify;
pub mod scripts;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{Config, Tunables};
pub use connection::{ConnCtx, ConnectionError, HostConnection};
pub use deploy::{DeployError, DeployRequest, InventoryRouter, Reconciler};
pub use hosts::HostRegistry;
pub use job::{teardown, Job, JobEvent, JobOutcome, JobOwner, JobSide};
pub use notify::{FanoutSink, TracingSink};
