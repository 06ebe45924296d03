//! Configuration system tests
//!
//! Tests configuration loading, validation, and environment overrides

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use chat_relay::config::RelayConfig;

/// Test fixture for configuration testing
struct ConfigFixture {
    _temp_dir: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        Self {
            _temp_dir: temp_dir,
            config_path,
        }
    }

    fn write_config(&self, content: &str) {
        fs::write(&self.config_path, content).unwrap();
    }

    fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }
}

fn relay_cmd() -> Command {
    Command::cargo_bin("chat-relay").unwrap()
}

fn validate(fixture: &ConfigFixture) -> assert_cmd::assert::Assert {
    relay_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_minimal_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[coordinator]

[client]
url = "wss://example.com/relay"

[chat]

[logging]
"#,
    );

    validate(&fixture).success();
}

#[test]
fn test_full_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[coordinator]
listen_addr = "0.0.0.0:9000"
ack_timeout_ms = 2500
quiet_window_ms = 500
dedup_window_ms = 20000
dedup_capacity = 64
event_queue_size = 32
sweep_interval_ms = 1000

[client]
url = "ws://coordinator.internal:9000"
id = "relay-test-001"
id_file = "/tmp/chat-relay/client-id"
connect_timeout_ms = 5000
reconnect_floor_ms = 1000
reconnect_factor = 2.0
reconnect_ceiling_ms = 60000
message_queue_size = 10

[chat]
max_message_len = 500
part_delay_ms = 0
allowed_channels = ["42", "ops"]

[logging]
level = "debug"
file = "/tmp/chat-relay.log"
rotation = "hourly"
json_format = true
"#,
    );

    validate(&fixture).success();

    let config = RelayConfig::load(Some(fixture.path())).unwrap();
    assert_eq!(config.coordinator.ack_timeout_ms, 2500);
    assert_eq!(config.client.id.as_deref(), Some("relay-test-001"));
    assert_eq!(config.client.reconnect_factor, 2.0);
    assert_eq!(config.chat.allowed_channels, vec!["42", "ops"]);
    assert!(config.logging.json_format);
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_client_url() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[client]
url = "http://not-websocket.com"
"#,
    );

    validate(&fixture)
        .failure()
        .stderr(predicate::str::contains("ws://"));
}

#[test]
fn test_invalid_listen_addr() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[coordinator]
listen_addr = "localhost"
"#,
    );

    validate(&fixture).failure();
}

#[test]
fn test_zero_ack_timeout() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[coordinator]
ack_timeout_ms = 0
"#,
    );

    validate(&fixture)
        .failure()
        .stderr(predicate::str::contains("ack_timeout_ms"));
}

#[test]
fn test_ceiling_below_floor() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[client]
reconnect_floor_ms = 5000
reconnect_ceiling_ms = 1000
"#,
    );

    validate(&fixture).failure();
}

#[test]
fn test_shrinking_reconnect_factor() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[client]
reconnect_factor = 0.5
"#,
    );

    validate(&fixture).failure();
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[logging]
level = "invalid_level"
"#,
    );

    validate(&fixture)
        .failure()
        .stderr(predicate::str::contains("invalid_level"));
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[client
url = "wss://example.com"
"#,
    );

    validate(&fixture).failure();
}

// ─────────────────────────────────────────────────────────────────
// Config Show Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_custom() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[coordinator]
quiet_window_ms = 1234

[client]
url = "wss://custom.example.com"
id = "custom-id-123"

[chat]
max_message_len = 777
"#,
    );

    relay_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("custom-id-123"))
        .stdout(predicate::str::contains("wss://custom.example.com"))
        .stdout(predicate::str::contains("1234"))
        .stdout(predicate::str::contains("777"));
}

// ─────────────────────────────────────────────────────────────────
// Config Init Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_init_creates_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("nested").join("new_config.toml");

    relay_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(config_path.to_str().unwrap())
        .assert()
        .success()
        .stdout(predicate::str::contains("Created configuration file"));

    assert!(config_path.exists());

    // The generated file must itself be valid
    relay_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .assert()
        .success();
}

#[test]
fn test_config_init_refuses_overwrite() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[client]\n");

    relay_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(fixture.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_config_init_force_overwrite() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[client]\nid = \"stale-relay\"\n");

    relay_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(fixture.path())
        .arg("--force")
        .assert()
        .success();

    let content = fs::read_to_string(fixture.path()).unwrap();
    assert!(!content.contains("stale-relay"));
    assert!(content.contains("[coordinator]"));
}

// ─────────────────────────────────────────────────────────────────
// Environment Variable Override Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_override_client_url() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[client]
url = "wss://file.example.com"
"#,
    );

    relay_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .env("CHAT_RELAY_URL", "wss://env.example.com")
        .assert()
        .success()
        .stdout(predicate::str::contains("wss://env.example.com"))
        .stdout(predicate::str::contains("wss://file.example.com").not());
}

#[test]
fn test_env_override_timings() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[coordinator]\n");

    relay_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .env("CHAT_RELAY_ACK_TIMEOUT_MS", "7500")
        .env("CHAT_RELAY_MAX_MESSAGE_LEN", "321")
        .assert()
        .success()
        .stdout(predicate::str::contains("ack_timeout_ms = 7500"))
        .stdout(predicate::str::contains("max_message_len = 321"));
}

#[test]
fn test_env_override_is_validated() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[client]\n");

    relay_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .env("CHAT_RELAY_LOG_LEVEL", "loud")
        .assert()
        .failure();
}

// ─────────────────────────────────────────────────────────────────
// Path Expansion Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_tilde_expansion() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[client]
id_file = "~/relay/client-id"

[logging]
file = "~/relay/logs/relay.log"
"#,
    );

    let output = relay_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    assert!(!stdout.contains("id_file = \"~"));
    assert!(!stdout.contains("file = \"~"));
    assert!(stdout.contains("relay/client-id"));
}
