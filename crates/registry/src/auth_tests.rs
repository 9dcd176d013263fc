// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fleet_core::FakeClock;

#[test]
fn password_hash_verifies() {
    let hash = hash_password("hunter2").unwrap();
    assert!(verify_password("hunter2", &hash));
    assert!(!verify_password("wrong", &hash));
}

#[test]
fn malformed_hash_verifies_false() {
    assert!(!verify_password("x", "not-a-phc-string"));
}

#[test]
fn grant_lifecycle() {
    let clock = FakeClock::new();
    let grants = GrantTable::new(clock.clone());
    let (id, secret) = grants.issue();
    assert!(grants.check(&secret));

    grants.revoke(&id);
    assert!(!grants.check(&secret));
}

#[test]
fn grants_expire() {
    let clock = FakeClock::new();
    let grants = GrantTable::new(clock.clone());
    let (_id, secret) = grants.issue();
    clock.advance(GRANT_TTL + std::time::Duration::from_secs(1));
    assert!(!grants.check(&secret));
    assert_eq!(grants.outstanding(), 0);
}

#[tokio::test]
async fn pull_accepts_grant_but_push_does_not() {
    let clock = FakeClock::new();
    let grants = Arc::new(GrantTable::new(clock));
    let (_id, secret) = grants.issue();
    let auth = RegistryAuth::new(Arc::clone(&grants), None);

    assert!(auth.validate(GRANT_USER, &secret, Scope::Pull).await);
    assert!(!auth.validate(GRANT_USER, &secret, Scope::Push).await);
    assert!(!auth.validate("someone", &secret, Scope::Pull).await);
}

#[tokio::test]
async fn operator_token_has_both_scopes() {
    let clock = FakeClock::new();
    let grants = Arc::new(GrantTable::new(clock));
    let auth = RegistryAuth::new(grants, Some(("ops".into(), "tok".into())));

    assert!(auth.validate("ops", "tok", Scope::Push).await);
    assert!(auth.validate("ops", "tok", Scope::Pull).await);
    assert!(!auth.validate("ops", "bad", Scope::Push).await);
}
