// ABOUTME: Tests for configuration loading from disk and environment overrides
// ABOUTME: Env-mutating tests run serially to avoid contaminating each other

use serial_test::serial;
use std::io::Write;
use wagate_core::{Config, TransportKind};

/// Helper to clear all config-related env vars
fn clear_config_env_vars() {
    std::env::remove_var("WAGATE_CONFIG_PATH");
    std::env::remove_var("WHATSAPP_STACK");
    std::env::remove_var("WAGATE_DATA_DIR");
    std::env::remove_var("WAGATE_HOST");
    std::env::remove_var("WAGATE_PORT");
    std::env::remove_var("WAGATE_API_KEY");
    std::env::remove_var("WAGATE_WATCHDOG");
}

fn write_config(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
#[serial]
fn test_config_loads_from_env_path() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[session]
data_dir = "/var/lib/wagate"
primary = "webclient"

[server]
port = 9100
"#,
    );
    std::env::set_var("WAGATE_CONFIG_PATH", path.to_str().unwrap());

    let config = Config::load().unwrap();

    assert_eq!(config.session.primary, TransportKind::WebClient);
    assert_eq!(config.session.fallback_kind(), Some(TransportKind::MultiDevice));
    assert_eq!(config.server.port, 9100);
    assert_eq!(config.data_dir(), std::path::PathBuf::from("/var/lib/wagate"));

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_stack_selector_overrides_primary() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[session]
primary = "multidevice"
fallback = "webclient"
"#,
    );
    std::env::set_var("WAGATE_CONFIG_PATH", path.to_str().unwrap());
    std::env::set_var("WHATSAPP_STACK", "venom");

    let config = Config::load().unwrap();

    assert_eq!(config.session.primary, TransportKind::WebClient);
    // the configured fallback collided with the new primary, so the other kind takes over
    assert_eq!(
        config.session.transport_order(),
        vec![TransportKind::WebClient, TransportKind::MultiDevice]
    );

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_env_overrides_server_and_watchdog() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "");
    std::env::set_var("WAGATE_CONFIG_PATH", path.to_str().unwrap());
    std::env::set_var("WAGATE_PORT", "9200");
    std::env::set_var("WAGATE_API_KEY", "k3y");
    std::env::set_var("WAGATE_WATCHDOG", "off");
    std::env::set_var("WAGATE_DATA_DIR", dir.path().to_str().unwrap());

    let config = Config::load().unwrap();

    assert_eq!(config.server.port, 9200);
    assert_eq!(config.server.api_key.as_deref(), Some("k3y"));
    assert!(!config.session.watchdog);
    assert_eq!(config.credentials_dir(), dir.path().join("auth"));
    assert_eq!(config.health_db(), dir.path().join("health.db"));

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_invalid_port_env_is_an_error() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "");
    std::env::set_var("WAGATE_CONFIG_PATH", path.to_str().unwrap());
    std::env::set_var("WAGATE_PORT", "not-a-port");

    let err = Config::load().unwrap_err();
    assert!(err.to_string().contains("WAGATE_PORT"));

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_unknown_stack_is_an_error() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "");
    std::env::set_var("WAGATE_CONFIG_PATH", path.to_str().unwrap());
    std::env::set_var("WHATSAPP_STACK", "telegram");

    assert!(Config::load().is_err());

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_malformed_toml_names_the_file() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[session\nprimary = ");
    std::env::set_var("WAGATE_CONFIG_PATH", path.to_str().unwrap());

    let err = Config::load().unwrap_err();
    assert!(format!("{:#}", err).contains("config.toml"));

    clear_config_env_vars();
}
