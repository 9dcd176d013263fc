// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn minimal_config_parses_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetd.toml");
    std::fs::write(&path, "data_dir = \"/var/lib/fleet\"\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.agent_port, 8888);
    assert_eq!(config.registry_port, 8443);
    assert_eq!(config.gc_interval_secs, 60 * 60 * 12);
    assert!(config.hosts.is_empty());
}

#[test]
fn full_config_parses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetd.toml");
    std::fs::write(
        &path,
        r#"
data_dir = "/var/lib/fleet"
agent_port = 9000
registry_port = 9443
registry_addr = "registry.fleet.example:9443"
gc_interval_secs = 3600

[[hosts]]
hostname = "node1"
password_hash = "$argon2id$stub"
"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.agent_port, 9000);
    assert_eq!(config.registry_addr(), "registry.fleet.example:9443");
    assert_eq!(config.hosts.len(), 1);
    assert_eq!(config.gc_interval(), Duration::from_secs(3600));
}

#[test]
fn unknown_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetd.toml");
    std::fs::write(&path, "no_such_key = true\n").unwrap();
    assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
}

#[test]
fn missing_file_is_io_error() {
    let r = Config::load(Path::new("/nonexistent/fleetd.toml"));
    assert!(matches!(r, Err(ConfigError::Io { .. })));
}

#[test]
fn registry_addr_defaults_to_port() {
    let config = Config { registry_port: 9443, ..Default::default() };
    assert_eq!(config.registry_addr(), "localhost:9443");
}
