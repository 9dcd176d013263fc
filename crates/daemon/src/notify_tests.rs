// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::CaptureSink;
use fleet_core::HostId;

#[test]
fn fanout_delivers_in_order_to_all() {
    let a = Arc::new(CaptureSink::default());
    let b = Arc::new(CaptureSink::default());
    let fanout = FanoutSink::new()
        .attach(Arc::clone(&a) as Arc<dyn NotificationSink>)
        .attach(Arc::clone(&b) as Arc<dyn NotificationSink>);

    let up = DomainEvent::HostUp { host: HostId(1), hostname: "n1".into() };
    let down = DomainEvent::HostDown { host: HostId(1), hostname: "n1".into() };
    fanout.emit(&up);
    fanout.emit(&down);

    assert_eq!(*a.0.lock(), vec![up.clone(), down.clone()]);
    assert_eq!(*b.0.lock(), vec![up, down]);
}

#[test]
fn tracing_sink_handles_every_event_kind() {
    // Smoke test: no panics formatting any variant.
    let sink = TracingSink;
    sink.emit(&DomainEvent::HostStillDown { host: HostId(2), hostname: "n2".into() });
    sink.emit(&DomainEvent::ImagePinChanged { manifest_id: 1, pinned: true });
}
