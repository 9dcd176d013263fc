// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn grows_by_factor_each_failure() {
    let mut b = Backoff::new(Duration::from_secs(1), 1.5, Duration::from_secs(60));
    assert_eq!(b.next_delay(), Duration::from_secs(1));
    assert_eq!(b.next_delay(), Duration::from_millis(1500));
    assert_eq!(b.next_delay(), Duration::from_millis(2250));
}

#[test]
fn caps_at_maximum() {
    let mut b = Backoff::new(Duration::from_secs(40), 2.0, Duration::from_secs(60));
    assert_eq!(b.next_delay(), Duration::from_secs(40));
    assert_eq!(b.next_delay(), Duration::from_secs(60));
    assert_eq!(b.next_delay(), Duration::from_secs(60));
}

#[test]
fn reset_returns_to_initial() {
    let mut b = Backoff::default();
    b.next_delay();
    b.next_delay();
    b.reset();
    assert_eq!(b.next_delay(), Duration::from_secs(1));
}
