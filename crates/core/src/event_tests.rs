// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn events_serialize_with_type_tag() {
    let ev = DomainEvent::HostUp { host: HostId(3), hostname: "node3".into() };
    let json = serde_json::to_value(&ev).unwrap();
    assert_eq!(json["type"], "host_up");
    assert_eq!(json["host"], 3);
}

#[test]
fn kind_matches_wire_tag() {
    let ev = DomainEvent::ImagePushed {
        repository: "app".into(),
        tag: "latest".into(),
        digest: Digest::of_bytes(b"m"),
    };
    let json = serde_json::to_value(&ev).unwrap();
    assert_eq!(json["type"], ev.kind());
}
