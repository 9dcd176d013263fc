// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration.
//!
//! Loaded from `fleetd.toml`, overridden by environment variables. Every
//! timing the protocol depends on lives in [`Tunables`] so tests can run
//! the same machinery with millisecond delays.

use crate::env;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no data dir: set data_dir in fleetd.toml or FLEET_DATA_DIR")]
    NoDataDir,
}

/// `fleetd.toml` contents.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Where the journal, snapshot and blob store live.
    pub data_dir: Option<PathBuf>,
    /// Port the agent TLS listener binds.
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
    /// Port the registry HTTP listener binds.
    #[serde(default = "default_registry_port")]
    pub registry_port: u16,
    /// Registry address agents pull from, as reachable from the fleet.
    pub registry_addr: Option<String>,
    /// PEM bundle with the server certificate chain.
    pub tls_cert: Option<PathBuf>,
    /// PEM private key.
    pub tls_key: Option<PathBuf>,
    /// Garbage collection cadence in seconds.
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,
    /// Seed list of hosts allowed to connect, password pre-hashed.
    #[serde(default)]
    pub hosts: Vec<SeedHost>,
}

/// One pre-provisioned host secret.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedHost {
    pub hostname: String,
    /// argon2 PHC string produced by `fleetd hash-password`.
    pub password_hash: String,
}

fn default_agent_port() -> u16 {
    8888
}

fn default_registry_port() -> u16 {
    8443
}

fn default_gc_interval() -> u64 {
    60 * 60 * 12
}

impl Config {
    /// Load from a file, then apply env overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let mut config: Config = toml::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus env overrides, for running without a config file.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.agent_port = default_agent_port();
        config.registry_port = default_registry_port();
        config.gc_interval_secs = default_gc_interval();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Some(dir) = env::data_dir() {
            if self.data_dir.is_none() || std::env::var("FLEET_DATA_DIR").is_ok() {
                self.data_dir = Some(dir);
            }
        }
        if let Some(port) = env::agent_port() {
            self.agent_port = port;
        }
        if let Some(port) = env::registry_port() {
            self.registry_port = port;
        }
        if let Some(secs) = env::gc_interval_secs() {
            self.gc_interval_secs = secs;
        }
    }

    pub fn data_dir(&self) -> Result<&Path, ConfigError> {
        self.data_dir.as_deref().ok_or(ConfigError::NoDataDir)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    /// Address agents log into for pulls; defaults to port-only form the
    /// deploy script combines with the server name it already knows.
    pub fn registry_addr(&self) -> String {
        self.registry_addr
            .clone()
            .unwrap_or_else(|| format!("localhost:{}", self.registry_port))
    }
}

/// Protocol timings. Production uses the defaults; tests shrink them.
#[derive(Debug, Clone)]
pub struct Tunables {
    /// Deadline for the first (auth) message after connect.
    pub auth_timeout: Duration,
    /// Floor on auth handshake duration, bounding timing signal.
    pub auth_floor: Duration,
    /// Idle time before a ping is sent.
    pub ping_interval: Duration,
    /// How long to wait for a pong before declaring the host dead.
    pub pong_timeout: Duration,
    /// Delay before a "host still down" notification fires.
    pub down_notice_delay: Duration,
    /// How long to wait for the agent to confirm a deployment before
    /// committing it optimistically.
    pub deploy_commit_timeout: Duration,
    /// First monitor restart delay; grows 1.5x per consecutive failure.
    pub monitor_backoff_initial: Duration,
    /// Monitor restart delay cap.
    pub monitor_backoff_cap: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(10),
            auth_floor: Duration::from_secs(1),
            ping_interval: Duration::from_secs(9),
            pong_timeout: Duration::from_secs(80),
            down_notice_delay: Duration::from_secs(5 * 60),
            deploy_commit_timeout: Duration::from_secs(60),
            monitor_backoff_initial: Duration::from_secs(1),
            monitor_backoff_cap: Duration::from_secs(60),
        }
    }
}

impl Tunables {
    /// Millisecond-scale timings for protocol tests.
    #[cfg(test)]
    pub fn fast() -> Self {
        Self {
            auth_timeout: Duration::from_millis(200),
            auth_floor: Duration::from_millis(5),
            ping_interval: Duration::from_millis(40),
            pong_timeout: Duration::from_millis(120),
            down_notice_delay: Duration::from_millis(60),
            deploy_commit_timeout: Duration::from_millis(80),
            monitor_backoff_initial: Duration::from_millis(10),
            monitor_backoff_cap: Duration::from_millis(40),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
