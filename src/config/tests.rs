use super::load_config;
use super::settings::{PartialSettings, Settings};
use serial_test::serial;
use std::env;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8081);
    assert_eq!(settings.broker.max_connections, 1000);
    assert_eq!(settings.broker.max_message_bytes, 64 * 1024);
    assert_eq!(settings.broker.auth_timeout(), Duration::from_secs(10));
    assert_eq!(settings.auth.token, "password");
    assert!(settings.auth.jwt_secret.is_none());
    assert_eq!(settings.client.request_timeout(), Duration::from_secs(10));
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn empty_partial_merges_to_defaults() {
    let merged = PartialSettings::default().merge(Settings::default());
    assert_eq!(merged.server.addr(), "127.0.0.1:8081");
    assert_eq!(merged.client.max_message_bytes, 64 * 1024);
}

// Runs with a scratch working directory so load_config picks up
// config/default.toml from there.
fn with_scratch_dir<F: FnOnce()>(toml: Option<&str>, f: F) {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    if let Some(toml) = toml {
        fs::create_dir_all("config").expect("create config dir");
        fs::write("config/default.toml", toml).expect("write config file");
    }

    f();

    env::set_current_dir(orig).expect("restore cwd");
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [broker]
        max_message_bytes = 2048
        auth_timeout_ms = 500

        [auth]
        jwt_secret = "file_secret"
    "#;

    with_scratch_dir(Some(toml), || {
        let cfg = load_config().expect("load_config failed");
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.broker.max_message_bytes, 2048);
        assert_eq!(cfg.broker.auth_timeout(), Duration::from_millis(500));
        // untouched keys keep their defaults
        assert_eq!(cfg.broker.max_connections, 1000);
        assert_eq!(cfg.auth.token, "password");
        assert_eq!(cfg.auth.jwt_secret.as_deref(), Some("file_secret"));
    });
}

#[test]
#[serial]
fn load_config_from_environment() {
    with_scratch_dir(None, || {
        temp_env::with_vars(
            [
                ("TIDEMQ_SERVER__PORT", Some("9100")),
                ("TIDEMQ_AUTH__TOKEN", Some("env-token")),
                ("TIDEMQ_CLIENT__REQUEST_TIMEOUT_MS", Some("250")),
            ],
            || {
                let cfg = load_config().expect("load_config failed");
                assert_eq!(cfg.server.port, 9100);
                assert_eq!(cfg.auth.token, "env-token");
                assert_eq!(cfg.client.request_timeout(), Duration::from_millis(250));
                assert_eq!(cfg.server.host, "127.0.0.1");
            },
        );
    });
}

#[test]
#[serial]
fn environment_wins_over_file() {
    let toml = r#"
        [server]
        port = 9000
    "#;

    with_scratch_dir(Some(toml), || {
        temp_env::with_var("TIDEMQ_SERVER__PORT", Some("9200"), || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.server.port, 9200);
        });
    });
}
