// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TLS accept loop for agent connections.
//!
//! One task per accepted socket: TLS handshake with a deadline, then the
//! connection's own read loop until it closes. The server certificate is
//! re-read from disk daily so renewed certs are picked up without a
//! restart.

use crate::connection::{ConnCtx, HostConnection};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CERT_RELOAD_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24);

/// Errors from listener setup.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad certificate or key: {0}")]
    Pem(#[from] rustls_pki_types::pem::Error),

    #[error("TLS config rejected: {0}")]
    Tls(#[from] rustls::Error),
}

/// Certificate material locations.
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

fn load_acceptor(paths: &TlsPaths) -> Result<TlsAcceptor, ListenerError> {
    let certs = CertificateDer::pem_file_iter(&paths.cert)?.collect::<Result<Vec<_>, _>>()?;
    let key = PrivateKeyDer::from_pem_file(&paths.key)?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Accept agent connections until the process exits.
pub async fn run_agent_listener(
    listener: TcpListener,
    tls: TlsPaths,
    ctx: Arc<ConnCtx>,
) -> Result<(), ListenerError> {
    let mut acceptor = load_acceptor(&tls)?;
    info!(addr = %listener.local_addr()?, "agent listener started");

    let mut reload_at = tokio::time::Instant::now() + CERT_RELOAD_INTERVAL;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let acceptor = acceptor.clone();
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            handle_socket(stream, peer.to_string(), acceptor, ctx).await;
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                }
            }
            _ = tokio::time::sleep_until(reload_at) => {
                info!("reloading agent listener certificate");
                match load_acceptor(&tls) {
                    Ok(fresh) => acceptor = fresh,
                    Err(e) => warn!(error = %e, "certificate reload failed, keeping old"),
                }
                reload_at += CERT_RELOAD_INTERVAL;
            }
        }
    }
}

async fn handle_socket(
    stream: tokio::net::TcpStream,
    peer: String,
    acceptor: TlsAcceptor,
    ctx: Arc<ConnCtx>,
) {
    info!(%peer, "agent connected");
    let stream = match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(%peer, error = %e, "TLS handshake failed");
            return;
        }
        Err(_) => {
            warn!(%peer, "TLS handshake timed out");
            return;
        }
    };
    let (reader, writer) = tokio::io::split(stream);
    let conn = HostConnection::new(peer, Box::new(writer));
    conn.run(reader, ctx).await;
}

/// Check certificate material without binding anything; startup fails fast
/// on unreadable files instead of at the first connection.
pub fn check_tls(paths: &TlsPaths) -> Result<(), ListenerError> {
    load_acceptor(paths)?;
    Ok(())
}

/// Resolve TLS paths relative to the config file's directory.
pub fn resolve_tls_paths(cert: &Path, key: &Path, base: &Path) -> TlsPaths {
    let abs = |p: &Path| {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            base.join(p)
        }
    };
    TlsPaths { cert: abs(cert), key: abs(key) }
}
