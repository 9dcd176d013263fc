// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fleetd: the fleet management server.
//!
//! Wires together the store, the built-in registry, the agent TLS
//! listener and the garbage collector, then runs until interrupted.

use fleet_core::{NotificationSink, SystemClock};
use fleet_daemon::config::Config;
use fleet_daemon::connection::ConnCtx;
use fleet_daemon::listener::{check_tls, resolve_tls_paths, run_agent_listener};
use fleet_daemon::notify::TracingSink;
use fleet_daemon::{env, scripts, HostRegistry, Reconciler, Tunables};
use fleet_registry::{hash_password, router, AppState, GcPolicy, GrantTable, ManifestStore, RegistryAuth};
use fleet_storage::{BlobStore, Store};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("hash-password") {
        return hash_password_cmd(args.get(2).map(String::as_str));
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fleetd: {e}");
            ExitCode::FAILURE
        }
    }
}

/// `fleetd hash-password [password]` — produce a hash for fleetd.toml.
fn hash_password_cmd(password: Option<&str>) -> ExitCode {
    let password = match password {
        Some(p) => p.to_string(),
        None => {
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_err() {
                eprintln!("fleetd: unable to read password from stdin");
                return ExitCode::FAILURE;
            }
            line.trim_end_matches('\n').to_string()
        }
    };
    match hash_password(&password) {
        Ok(hash) => {
            println!("{hash}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("fleetd: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> Result<(Config, PathBuf), BoxError> {
    if let Some(path) = env::config_path() {
        let config = Config::load(&path)?;
        let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        return Ok((config, base));
    }
    let default = Path::new("fleetd.toml");
    if default.exists() {
        Ok((Config::load(default)?, PathBuf::from(".")))
    } else {
        Ok((Config::from_env(), PathBuf::from(".")))
    }
}

fn init_tracing(data_dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard, BoxError> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "fleetd.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file_writer.and(std::io::stderr))
        .init();
    Ok(guard)
}

async fn run() -> Result<(), BoxError> {
    let (config, config_base) = load_config()?;
    let data_dir = config.data_dir()?.to_path_buf();
    std::fs::create_dir_all(&data_dir)?;
    let _log_guard = init_tracing(&data_dir)?;
    info!(version = env!("CARGO_PKG_VERSION"), data_dir = %data_dir.display(), "fleetd starting");

    let store = Arc::new(Store::open(&data_dir.join("tables"))?);
    let blobs = Arc::new(BlobStore::open(&data_dir.join("registry"))?);

    // Seed host secrets from config; re-set only when the hash changed so
    // restarts do not grow the journal.
    for host in &config.hosts {
        let current = store.host_secret(&host.hostname);
        if current.as_ref().map(|s| s.password_hash.as_str()) != Some(host.password_hash.as_str())
        {
            let id = store.set_host_secret(&host.hostname, &host.password_hash)?;
            info!(hostname = %host.hostname, %id, "host secret seeded");
        }
    }

    let sink: Arc<dyn NotificationSink> = Arc::new(TracingSink);
    let clock = SystemClock;

    let grants = Arc::new(GrantTable::new(clock.clone()));
    let manifests = Arc::new(
        ManifestStore::new(Arc::clone(&store), Arc::clone(&blobs)).with_sink(Arc::clone(&sink)),
    );
    let hosts = Arc::new(HostRegistry::new());

    let reconciler = Reconciler::new(
        Arc::clone(&store),
        Arc::clone(&manifests),
        Arc::clone(&hosts),
        Arc::clone(&grants),
        Arc::clone(&sink),
        clock.clone(),
        config.registry_addr(),
        Tunables::default(),
    );

    let ctx = Arc::new(ConnCtx {
        store: Arc::clone(&store),
        hosts: Arc::clone(&hosts),
        sink: Arc::clone(&sink),
        inventory: reconciler,
        monitor_script: RwLock::new(scripts::MONITOR_SCRIPT.to_string()),
        tunables: Tunables::default(),
    });

    // Registry HTTP surface.
    let auth = Arc::new(RegistryAuth::new(Arc::clone(&grants), env::push_token()));
    let registry_state = AppState::new(Arc::clone(&manifests), auth, clock.clone());
    let registry_listener =
        tokio::net::TcpListener::bind(("0.0.0.0", config.registry_port)).await?;
    info!(port = config.registry_port, "registry listener started");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(registry_listener, router(registry_state)).await {
            error!(error = %e, "registry server exited");
        }
    });

    // Agent TLS listener.
    let (cert, key) = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => (cert.clone(), key.clone()),
        _ => return Err("tls_cert and tls_key must be set in fleetd.toml".into()),
    };
    let tls = resolve_tls_paths(&cert, &key, &config_base);
    check_tls(&tls)?;
    let agent_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.agent_port)).await?;
    let agent_ctx = Arc::clone(&ctx);
    tokio::spawn(async move {
        if let Err(e) = run_agent_listener(agent_listener, tls, agent_ctx).await {
            error!(error = %e, "agent listener exited");
        }
    });

    // Periodic garbage collection and journal compaction.
    spawn_gc_loop(
        Arc::clone(&store),
        Arc::clone(&blobs),
        config.gc_interval(),
        clock,
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    if let Err(e) = store.compact() {
        warn!(error = %e, "final compaction failed");
    }
    Ok(())
}

fn spawn_gc_loop(
    store: Arc<Store>,
    blobs: Arc<BlobStore>,
    interval: std::time::Duration,
    clock: SystemClock,
) {
    tokio::spawn(async move {
        let policy = GcPolicy::default();
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = fleet_registry::run_gc(&store, &blobs, &policy, &clock) {
                error!(error = %e, "gc pass failed");
            }
            if let Err(e) = store.maybe_compact() {
                warn!(error = %e, "compaction failed");
            }
        }
    });
}

