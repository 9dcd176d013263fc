// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deployment dispatch and reconciliation.
//!
//! A deploy resolves the image to a digest, runs the deploy script on the
//! target host with a single-use pull grant, and records a transient
//! DelayedDeployment. The authoritative path is the agent's inventory
//! stream: a matching "container appeared" commits the record immediately;
//! if no event arrives, a bounded timer commits optimistically (trusting
//! the script's success). Container disappearance closes the open record.

use crate::config::Tunables;
use crate::connection::ConnectionError;
use crate::hosts::HostRegistry;
use crate::job::JobEvent;
use crate::scripts;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use fleet_core::{
    Clock, ContainerInfo, DeploymentRecord, Digest, DomainEvent, HostId, ImageInfo,
    InventoryUpdate, NotificationSink, RuntimeConfig,
};
use fleet_registry::auth::{GrantTable, GRANT_USER};
use fleet_registry::{ManifestStore, RegistryError};
use fleet_storage::{NewDeployment, Store, StoreError};
use fleet_wire::{OutputType, ScriptPayload, StdinType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors surfaced to the deploy caller.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("host {0} is not connected")]
    HostNotConnected(HostId),

    #[error("deploy script failed with code {code:?}")]
    ScriptFailed { code: Option<i32> },

    #[error("connection lost before the deploy finished")]
    ConnectionLost,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// One requested deployment.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub host: HostId,
    /// `repo:tag`, `repo@sha256:...`, or bare `repo` (implies `:latest`).
    pub image: String,
    pub container: String,
    pub user: String,
    pub config: RuntimeConfig,
    /// Re-deploy the previous record on script failure.
    pub rollback_on_failure: bool,
}

/// Routes monitor inventory blocks into the reconciler.
#[async_trait::async_trait]
pub trait InventoryRouter: Send + Sync {
    async fn handle(&self, host: HostId, update: InventoryUpdate);
}

/// Transient correlation between an issued deploy and the agent's later
/// confirmation event.
struct DelayedDeployment {
    host: HostId,
    repository: String,
    container: String,
    digest: Digest,
    user: Option<String>,
    config: RuntimeConfig,
    started_at_ms: u64,
    /// Set when this deploy restores an earlier record.
    restore_of: Option<i64>,
    timer: CancellationToken,
}

#[derive(Default)]
struct ReconcilerState {
    next_delayed_id: u64,
    delayed: HashMap<u64, DelayedDeployment>,
    /// host → container id → info, mirroring the monitor stream.
    containers: HashMap<HostId, HashMap<String, ContainerInfo>>,
    /// host → image id → info.
    images: HashMap<HostId, HashMap<String, ImageInfo>>,
}

/// Correlates requested deployments with agent-reported state.
pub struct Reconciler<C: Clock> {
    store: Arc<Store>,
    manifests: Arc<ManifestStore>,
    hosts: Arc<HostRegistry>,
    grants: Arc<GrantTable<C>>,
    sink: Arc<dyn NotificationSink>,
    clock: C,
    registry_addr: String,
    tunables: Tunables,
    state: Mutex<ReconcilerState>,
}

impl<C: Clock + 'static> Reconciler<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        manifests: Arc<ManifestStore>,
        hosts: Arc<HostRegistry>,
        grants: Arc<GrantTable<C>>,
        sink: Arc<dyn NotificationSink>,
        clock: C,
        registry_addr: String,
        tunables: Tunables,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            manifests,
            hosts,
            grants,
            sink,
            clock,
            registry_addr,
            tunables,
            state: Mutex::new(ReconcilerState::default()),
        })
    }

    /// Deploy an image to a host.
    ///
    /// Returns once the deploy script finished; the deployment record is
    /// committed either by the agent's container event or by the
    /// optimistic timer.
    pub async fn deploy(self: &Arc<Self>, req: DeployRequest) -> Result<(), DeployError> {
        let (repository, digest) = self.manifests.resolve_image(&req.image)?;
        info!(host = %req.host, image = %req.image, %digest, container = %req.container, "deploy start");

        match self.run_deploy_script(&req, &repository, &digest, req.config.clone()).await {
            Ok(()) => {
                self.register_delayed(DelayedDeployment {
                    host: req.host,
                    repository,
                    container: req.container.clone(),
                    digest,
                    user: Some(req.user.clone()),
                    config: req.config.clone(),
                    started_at_ms: self.clock.epoch_ms(),
                    restore_of: None,
                    timer: CancellationToken::new(),
                });
                Ok(())
            }
            Err(e) => {
                warn!(host = %req.host, container = %req.container, error = %e, "deploy failed");
                if req.rollback_on_failure {
                    if let Err(restore_err) = self.restore_previous(&req, &repository).await {
                        warn!(
                            host = %req.host,
                            container = %req.container,
                            error = %restore_err,
                            "rollback failed too"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Re-issue the deploy script with the previous record's digest and
    /// config, tagged as a restore.
    async fn restore_previous(
        self: &Arc<Self>,
        req: &DeployRequest,
        repository: &str,
    ) -> Result<(), DeployError> {
        let Some(previous) = self.store.latest_deployment(req.host, &req.container) else {
            debug!(host = %req.host, container = %req.container, "nothing to roll back to");
            return Ok(());
        };
        info!(
            host = %req.host,
            container = %req.container,
            digest = %previous.digest,
            "rolling back to previous deployment"
        );
        self.run_deploy_script(req, repository, &previous.digest, previous.config.clone())
            .await?;
        self.register_delayed(DelayedDeployment {
            host: req.host,
            repository: previous.repository.clone(),
            container: req.container.clone(),
            digest: previous.digest.clone(),
            user: previous.user.clone(),
            config: previous.config.clone(),
            started_at_ms: self.clock.epoch_ms(),
            restore_of: Some(previous.id),
            timer: CancellationToken::new(),
        });
        Ok(())
    }

    /// Dispatch the deploy script job and wait for its terminal message.
    async fn run_deploy_script(
        self: &Arc<Self>,
        req: &DeployRequest,
        repository: &str,
        digest: &Digest,
        config: RuntimeConfig,
    ) -> Result<(), DeployError> {
        let conn = self
            .hosts
            .get(req.host)
            .ok_or(DeployError::HostNotConnected(req.host))?;

        // Single-use pull credential, revoked as soon as the job ends.
        let (grant_id, secret) = self.grants.issue();
        let auth = BASE64_STANDARD.encode(format!("{GRANT_USER}:{secret}"));
        let config_json = serde_json::to_string(&config).unwrap_or_else(|_| "{}".to_string());
        let script = ScriptPayload {
            name: "deploy.sh".to_string(),
            interpreter: "/bin/bash".to_string(),
            content: scripts::DEPLOY_SCRIPT.to_string(),
            args: vec![
                self.registry_addr.clone(),
                format!("{repository}@{digest}"),
                req.container.clone(),
                auth,
                config_json,
            ],
            stdin_type: StdinType::None,
            stdout_type: OutputType::Text,
            stderr_type: OutputType::Text,
        };

        let result = async {
            let (_job, mut events) = conn.start_job("deploy", script, None).await?;
            loop {
                match events.recv().await {
                    Some(JobEvent::Data { source, data }) => {
                        let text = crate::connection::decode_text(&data);
                        for line in text.lines().filter(|l| !l.trim().is_empty()) {
                            debug!(host = %req.host, container = %req.container,
                                   stream = %source, line, "deploy output");
                        }
                    }
                    Some(JobEvent::Done(Some(outcome))) if outcome.is_clean() => return Ok(()),
                    Some(JobEvent::Done(Some(outcome))) => {
                        return Err(DeployError::ScriptFailed { code: outcome.code() })
                    }
                    Some(JobEvent::Done(None)) | None => return Err(DeployError::ConnectionLost),
                }
            }
        }
        .await;
        self.grants.revoke(&grant_id);
        result
    }

    /// Remember a deploy awaiting agent confirmation and arm its
    /// optimistic-commit timer.
    fn register_delayed(self: &Arc<Self>, info: DelayedDeployment) {
        let token = info.timer.clone();
        let id = {
            let mut state = self.state.lock();
            let id = state.next_delayed_id;
            state.next_delayed_id += 1;
            state.delayed.insert(id, info);
            id
        };
        let reconciler = Arc::clone(self);
        let timeout = self.tunables.deploy_commit_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    reconciler.commit_delayed(id);
                }
            }
        });
    }

    /// Timer path: the agent never confirmed; trust the script and commit.
    fn commit_delayed(&self, id: u64) {
        // Re-validate: the event path may have committed this one already.
        let Some(info) = self.state.lock().delayed.remove(&id) else {
            return;
        };
        info!(
            host = %info.host,
            container = %info.container,
            "no container event before the deadline, committing deployment anyway"
        );
        if let Err(e) = self.commit_record(info) {
            warn!(error = %e, "failed to commit delayed deployment");
        }
    }

    /// Write a DelayedDeployment into the history.
    fn commit_record(&self, info: DelayedDeployment) -> Result<(), DeployError> {
        if let Some(restore_id) = info.restore_of {
            self.store
                .drop_deployments_after(info.host, &info.repository, &info.container, restore_id)?;
            let record = self.store.reopen_deployment(restore_id)?;
            self.sink.emit(&DomainEvent::DeploymentChanged { record });
            return Ok(());
        }
        if let Some(previous) = self.store.latest_deployment(info.host, &info.container) {
            if previous.is_open() {
                self.store.close_deployment(previous.id, info.started_at_ms)?;
            }
        }
        let record = self.store.insert_deployment(NewDeployment {
            host: info.host,
            repository: info.repository,
            container: info.container,
            digest: info.digest,
            user: info.user,
            config: info.config,
            started_at_ms: info.started_at_ms,
        })?;
        self.sink.emit(&DomainEvent::DeploymentChanged { record });
        Ok(())
    }

    fn container_appeared(&self, host: HostId, container: ContainerInfo) {
        // Agent-reported names carry a leading slash.
        let name = container.name.strip_prefix('/').unwrap_or(&container.name).to_string();
        let digests: Vec<String> = {
            let state = self.state.lock();
            state
                .images
                .get(&host)
                .and_then(|images| images.get(&container.image))
                .map(|image| image.bare_digests().map(str::to_string).collect())
                .unwrap_or_default()
        };

        // Match against pending delayed deployments by (host, name, digest).
        let matched = {
            let mut state = self.state.lock();
            let id = state.delayed.iter().find_map(|(id, info)| {
                (info.host == host
                    && info.container == name
                    && digests.iter().any(|d| info.digest == d.as_str()))
                .then_some(*id)
            });
            id.and_then(|id| state.delayed.remove(&id))
        };

        if let Some(info) = matched {
            info.timer.cancel();
            debug!(%host, container = %name, "container event confirmed pending deploy");
            if let Err(e) = self.commit_record(info) {
                warn!(error = %e, "failed to commit confirmed deployment");
            }
            return;
        }

        // Already tracked and unchanged?
        if let Some(current) = self.store.latest_deployment(host, &name) {
            if current.is_open() && digests.iter().any(|d| current.digest == d.as_str()) {
                return;
            }
        }

        // Out-of-band: someone started this container without going through
        // us. Record it with whatever digest the agent reports.
        let Some(digest) = digests.iter().find_map(|d| Digest::parse(d).ok()) else {
            debug!(%host, container = %name, image = %container.image,
                   "container appeared with no known image digest");
            return;
        };
        info!(%host, container = %name, %digest, "adopting out-of-band container");
        let info = DelayedDeployment {
            host,
            repository: repository_of(&self.state.lock(), host, &container.image)
                .unwrap_or_else(|| name.clone()),
            container: name,
            digest,
            user: None,
            config: RuntimeConfig::default(),
            started_at_ms: self.clock.epoch_ms(),
            restore_of: None,
            timer: CancellationToken::new(),
        };
        if let Err(e) = self.commit_record(info) {
            warn!(error = %e, "failed to record out-of-band container");
        }
    }

    fn container_disappeared(&self, host: HostId, container: &ContainerInfo) {
        let name = container.name.strip_prefix('/').unwrap_or(&container.name);
        let Some(record) = self.store.latest_deployment(host, name) else {
            return;
        };
        if !record.is_open() {
            return;
        }
        let now = self.clock.epoch_ms();
        info!(%host, container = %name, "container disappeared, closing deployment");
        match self.store.close_deployment(record.id, now) {
            Ok(()) => {
                let record = DeploymentRecord { ended_at_ms: Some(now), ..record };
                self.sink.emit(&DomainEvent::DeploymentChanged { record });
            }
            Err(e) => warn!(error = %e, "failed to close deployment"),
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_delayed(&self) -> usize {
        self.state.lock().delayed.len()
    }
}

/// Repository name for an agent image id, derived from its repo digests.
fn repository_of(state: &ReconcilerState, host: HostId, image_id: &str) -> Option<String> {
    state
        .images
        .get(&host)
        .and_then(|images| images.get(image_id))
        .and_then(|image| {
            image
                .digests
                .first()
                .and_then(|d| d.split_once('@'))
                .map(|(repo, _)| repo.to_string())
        })
}

#[async_trait::async_trait]
impl<C: Clock + 'static> InventoryRouter for Reconciler<C> {
    async fn handle(&self, host: HostId, update: InventoryUpdate) {
        match update {
            InventoryUpdate::Containers { full, update, delete } => {
                let (appeared, disappeared) = {
                    let mut state = self.state.lock();
                    let containers = state.containers.entry(host).or_default();
                    if full {
                        containers.clear();
                    }
                    let mut disappeared = Vec::new();
                    for id in &delete {
                        if let Some(c) = containers.remove(id) {
                            disappeared.push(c);
                        }
                    }
                    for c in &update {
                        containers.insert(c.id.clone(), c.clone());
                    }
                    (update, disappeared)
                };
                for c in disappeared {
                    self.container_disappeared(host, &c);
                }
                for c in appeared {
                    self.container_appeared(host, c);
                }
            }
            InventoryUpdate::ContainerState { id, state: container_state } => {
                let mut state = self.state.lock();
                if let Some(c) = state
                    .containers
                    .get_mut(&host)
                    .and_then(|containers| containers.get_mut(&id))
                {
                    c.state = container_state;
                }
            }
            InventoryUpdate::Images { full, update, delete } => {
                let mut state = self.state.lock();
                let images = state.images.entry(host).or_default();
                if full {
                    images.clear();
                }
                for id in &delete {
                    images.remove(id);
                }
                for image in update {
                    images.insert(image.id.clone(), image);
                }
            }
            InventoryUpdate::Status { .. } => {
                // Consumed by the external statistics store, not this core.
            }
        }
    }
}

#[cfg(test)]
#[path = "deploy_tests.rs"]
mod tests;
