//! Configuration loading from TOML files on disk.

use std::fs;

use tempfile::TempDir;

use civic_portal::config_loader::{load_config, PortalConfig};

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    let config = load_config(Some(path.to_str().unwrap())).unwrap();
    let defaults = PortalConfig::default();
    assert_eq!(config.server, defaults.server);
    assert_eq!(config.logger, defaults.logger);
    assert_eq!(config.auth, defaults.auth);
}

#[test]
fn file_values_override_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("portal.toml");
    fs::write(
        &path,
        r#"
data_dir = "/var/lib/portal"

[server]
port = 9000

[logger]
max_buffer_size = 25
flush_interval_secs = 5

[auth]
session_ttl_hours = 8
"#,
    )
    .unwrap();

    let config = load_config(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(config.data_dir, "/var/lib/portal");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.logger.max_buffer_size, 25);
    assert_eq!(config.logger.flush_interval_secs, 5);
    assert!(config.logger.enable_persistence);
    assert_eq!(config.auth.session_ttl_hours, 8);
    assert_eq!(config.auth.min_password_length, 6);
}

#[test]
fn invalid_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("portal.toml");
    fs::write(&path, "[logger]\nflush_interval_secs = 0\n").unwrap();

    let err = load_config(Some(path.to_str().unwrap())).unwrap_err();
    assert!(err.to_string().contains("flush_interval_secs"));
}
