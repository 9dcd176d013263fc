// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry credentials and host password hashing.
//!
//! Two credential kinds: a static operator token with push scope, and
//! single-use pull grants minted per deployment and revoked when the
//! deploy job finishes (with a fixed expiry as a backstop for jobs that
//! never report back).

use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use fleet_core::{Clock, GrantId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// What a credential is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Pull,
    Push,
}

fleet_core::simple_display! {
    Scope {
        Pull => "pull",
        Push => "push",
    }
}

/// Boolean collaborator seam the protocol handler checks credentials with.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, user: &str, secret: &str, scope: Scope) -> bool;
}

/// Errors from password hashing.
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("unable to hash password: {0}")]
    Hash(argon2::password_hash::Error),
}

/// Hash a host agent password for storage.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(PasswordError::Hash)
}

/// Check a password against a stored hash. Malformed hashes verify false.
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// How long an unrevoked grant stays valid.
pub const GRANT_TTL: Duration = Duration::from_secs(60 * 60);

/// User name deploy grants authenticate as.
pub const GRANT_USER: &str = "deploy-client";

struct Grant {
    secret: String,
    expires_at_ms: u64,
}

/// Outstanding single-use pull grants.
pub struct GrantTable<C: Clock> {
    clock: C,
    grants: Mutex<HashMap<GrantId, Grant>>,
}

impl<C: Clock> GrantTable<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, grants: Mutex::new(HashMap::new()) }
    }

    /// Mint a grant; returns its id (for revocation) and the secret.
    pub fn issue(&self) -> (GrantId, String) {
        let id = GrantId::new();
        let secret = nanoid::nanoid!(32);
        let expires_at_ms = self.clock.epoch_ms() + GRANT_TTL.as_millis() as u64;
        self.grants
            .lock()
            .insert(id.clone(), Grant { secret: secret.clone(), expires_at_ms });
        debug!(grant = %id, "pull grant issued");
        (id, secret)
    }

    /// Drop a grant once its deployment is done.
    pub fn revoke(&self, id: &GrantId) {
        self.grants.lock().remove(id);
    }

    /// True if `secret` belongs to an unexpired grant. Expired grants are
    /// purged as they are encountered.
    pub fn check(&self, secret: &str) -> bool {
        let now = self.clock.epoch_ms();
        let mut grants = self.grants.lock();
        grants.retain(|_, g| g.expires_at_ms > now);
        grants.values().any(|g| g.secret == secret)
    }

    #[cfg(test)]
    pub fn outstanding(&self) -> usize {
        self.grants.lock().len()
    }
}

/// Daemon-side validator: pull accepts deploy grants or the operator
/// token; push accepts only the operator token.
pub struct RegistryAuth<C: Clock> {
    grants: Arc<GrantTable<C>>,
    /// Operator `user:token` pair allowed to push. None disables push.
    operator: Option<(String, String)>,
}

impl<C: Clock> RegistryAuth<C> {
    pub fn new(grants: Arc<GrantTable<C>>, operator: Option<(String, String)>) -> Self {
        Self { grants, operator }
    }
}

#[async_trait]
impl<C: Clock> CredentialValidator for RegistryAuth<C> {
    async fn validate(&self, user: &str, secret: &str, scope: Scope) -> bool {
        if let Some((op_user, op_token)) = &self.operator {
            if user == op_user && secret == op_token {
                return true;
            }
        }
        match scope {
            Scope::Pull => user == GRANT_USER && self.grants.check(secret),
            Scope::Push => false,
        }
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
