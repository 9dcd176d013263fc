// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn auth_is_first_message_shape() {
    let msg: AgentMessage =
        serde_json::from_str(r#"{"type":"auth","hostname":"node1","password":"pw"}"#).unwrap();
    assert_eq!(
        msg,
        AgentMessage::Auth { hostname: "node1".into(), password: "pw".into() }
    );
    assert_eq!(msg.job_id(), None);
}

#[yare::parameterized(
    data = { r#"{"type":"data","id":9,"source":"stdout","data":"aGk="}"#, 9 },
    success = { r#"{"type":"success","id":3,"code":0}"#, 3 },
    failure = { r#"{"type":"failure","id":12}"#, 12 },
)]
fn job_messages_expose_id(json: &str, id: u64) {
    let msg: AgentMessage = serde_json::from_str(json).unwrap();
    assert_eq!(msg.job_id(), Some(id));
}

#[test]
fn pong_has_no_job_id() {
    let msg: AgentMessage = serde_json::from_str(r#"{"type":"pong","id":5}"#).unwrap();
    assert_eq!(msg.job_id(), None);
}

#[test]
fn run_script_flattens_payload() {
    let msg = ServerMessage::RunScript {
        id: 100,
        script: ScriptPayload {
            name: "monitor.py".into(),
            interpreter: "/usr/bin/python3".into(),
            content: "print()".into(),
            args: vec![],
            stdin_type: StdinType::None,
            stdout_type: OutputType::BlockedJson,
            stderr_type: OutputType::Text,
        },
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "run_script");
    assert_eq!(json["id"], 100);
    assert_eq!(json["name"], "monitor.py");
    assert_eq!(json["stdout_type"], "blocked_json");
}

#[test]
fn kill_round_trips() {
    let bytes = crate::encode(&ServerMessage::Kill { id: 8 }).unwrap();
    let mut codec = crate::FrameCodec::new();
    let frames = codec.feed(&bytes).unwrap();
    let back: ServerMessage = crate::FrameCodec::parse(&frames[0]).unwrap();
    assert_eq!(back, ServerMessage::Kill { id: 8 });
}

#[test]
fn unknown_type_is_rejected() {
    let r: Result<AgentMessage, _> = serde_json::from_str(r#"{"type":"bogus","id":1}"#);
    assert!(r.is_err());
}
