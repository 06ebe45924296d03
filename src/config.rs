//! Configuration system for the chat relay
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (CHAT_RELAY_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Coordinator (server) settings
    pub coordinator: CoordinatorSettings,

    /// Relay client settings
    pub client: ClientSettings,

    /// Chat surface settings
    pub chat: ChatSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// Address the WebSocket listener binds to
    pub listen_addr: String,

    /// How long a control command waits for its ack
    pub ack_timeout_ms: u64,

    /// Debounce interval after the last partial event before a flush
    pub quiet_window_ms: u64,

    /// How long delivered content is remembered for duplicate suppression
    pub dedup_window_ms: u64,

    /// Upper bound on remembered fingerprints
    pub dedup_capacity: usize,

    /// Capacity of the coordinator's inbound event queue
    pub event_queue_size: usize,

    /// Period of the duplicate-cache sweep
    pub sweep_interval_ms: u64,
}

/// Relay client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Coordinator WebSocket URL
    pub url: String,

    /// Fixed client identity (read from / written to `id_file` if not set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Where the generated client identity is persisted
    pub id_file: String,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// First reconnect delay, and the value it resets to after a good connection
    pub reconnect_floor_ms: u64,

    /// Growth factor applied after each failed attempt
    pub reconnect_factor: f64,

    /// Cap on the reconnect delay
    pub reconnect_ceiling_ms: u64,

    /// Outbound queue size
    pub message_queue_size: usize,
}

/// Chat surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Maximum characters per outbound chat message
    pub max_message_len: usize,

    /// Pause between the parts of a split message
    pub part_delay_ms: u64,

    /// Channels accepted from the chat side (empty = all)
    pub allowed_channels: Vec<String>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Rotation period for the log file: minutely, hourly, daily, never
    pub rotation: String,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            ack_timeout_ms: 5_000,
            quiet_window_ms: 300,
            dedup_window_ms: 10_000,
            dedup_capacity: 512,
            event_queue_size: 256,
            sweep_interval_ms: 30_000,
        }
    }
}

impl CoordinatorSettings {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_window_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            id: None,
            id_file: "~/.chat-relay/client-id".to_string(),
            connect_timeout_ms: 10_000,
            reconnect_floor_ms: 3_000,
            reconnect_factor: 1.5,
            reconnect_ceiling_ms: 30_000,
            message_queue_size: 100,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_message_len: crate::chat::split::DEFAULT_MAX_LEN,
            part_delay_ms: 100,
            allowed_channels: Vec::new(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            rotation: "daily".to_string(),
            json_format: false,
        }
    }
}

impl RelayConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
                message: e.to_string(),
                source: Some(e),
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // An explicit path must exist
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        let search_paths = [
            PathBuf::from("chat-relay.toml"),
            dirs::config_dir()
                .map(|p| p.join("chat-relay").join("config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".chat-relay").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &search_paths {
            if path.is_file() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Coordinator settings
        if let Ok(val) = std::env::var("CHAT_RELAY_LISTEN_ADDR") {
            self.coordinator.listen_addr = val;
        }
        override_parsed("CHAT_RELAY_ACK_TIMEOUT_MS", &mut self.coordinator.ack_timeout_ms);
        override_parsed("CHAT_RELAY_QUIET_WINDOW_MS", &mut self.coordinator.quiet_window_ms);
        override_parsed("CHAT_RELAY_DEDUP_WINDOW_MS", &mut self.coordinator.dedup_window_ms);

        // Client settings
        if let Ok(val) = std::env::var("CHAT_RELAY_URL") {
            self.client.url = val;
        }
        if let Ok(val) = std::env::var("CHAT_RELAY_CLIENT_ID") {
            self.client.id = Some(val);
        }
        if let Ok(val) = std::env::var("CHAT_RELAY_ID_FILE") {
            self.client.id_file = val;
        }
        override_parsed("CHAT_RELAY_RECONNECT_FLOOR_MS", &mut self.client.reconnect_floor_ms);
        override_parsed("CHAT_RELAY_RECONNECT_CEILING_MS", &mut self.client.reconnect_ceiling_ms);
        override_parsed("CHAT_RELAY_RECONNECT_FACTOR", &mut self.client.reconnect_factor);

        // Chat settings
        override_parsed("CHAT_RELAY_MAX_MESSAGE_LEN", &mut self.chat.max_message_len);
        if let Ok(val) = std::env::var("CHAT_RELAY_ALLOWED_CHANNELS") {
            self.chat.allowed_channels = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Logging settings
        if let Ok(val) = std::env::var("CHAT_RELAY_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("CHAT_RELAY_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("CHAT_RELAY_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.client.id_file = expand_path(&self.client.id_file);

        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let url = &self.client.url;
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(Error::config_field_invalid(
                "client.url",
                format!("Coordinator URL must start with ws:// or wss:// (got '{}')", url),
            ));
        }
        if url::Url::parse(url).is_err() {
            return Err(Error::config_field_invalid("client.url", format!("Invalid URL '{}'", url)));
        }

        if self.coordinator.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::config_field_invalid(
                "coordinator.listen_addr",
                format!("'{}' is not a socket address", self.coordinator.listen_addr),
            ));
        }

        let nonzero = [
            ("coordinator.ack_timeout_ms", self.coordinator.ack_timeout_ms),
            ("coordinator.quiet_window_ms", self.coordinator.quiet_window_ms),
            ("coordinator.sweep_interval_ms", self.coordinator.sweep_interval_ms),
            ("client.reconnect_floor_ms", self.client.reconnect_floor_ms),
            ("chat.max_message_len", self.chat.max_message_len as u64),
            ("coordinator.event_queue_size", self.coordinator.event_queue_size as u64),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(Error::config_field_invalid(field, format!("{} must be greater than 0", field)));
            }
        }

        if !(self.client.reconnect_factor >= 1.0) {
            return Err(Error::config_field_invalid(
                "client.reconnect_factor",
                "reconnect_factor must be at least 1.0",
            ));
        }
        if self.client.reconnect_ceiling_ms < self.client.reconnect_floor_ms {
            return Err(Error::config_field_invalid(
                "client.reconnect_ceiling_ms",
                "reconnect_ceiling_ms must not be below reconnect_floor_ms",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(val) = std::env::var(var) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        }
    }
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Default location written by `config init`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chat-relay")
        .join("config.toml")
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    if config_path.exists() && !force {
        return Err(Error::config_validation(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# Chat Relay Configuration

[coordinator]
# Address the relay clients connect to
listen_addr = "127.0.0.1:8080"

# How long a reset/new/stop command waits for the leader's ack
ack_timeout_ms = 5000

# Quiet window before buffered streaming updates are flushed to chat
quiet_window_ms = 300

# Duplicate suppression window and size
dedup_window_ms = 10000
dedup_capacity = 512

event_queue_size = 256
sweep_interval_ms = 30000

[client]
# Coordinator WebSocket URL
url = "ws://127.0.0.1:8080"

# Stable client identity; generated and stored in id_file when unset
# id = "relay-workstation-1"
id_file = "~/.chat-relay/client-id"

connect_timeout_ms = 10000

# Reconnect backoff: floor * factor^n, capped at ceiling
reconnect_floor_ms = 3000
reconnect_factor = 1.5
reconnect_ceiling_ms = 30000

message_queue_size = 100

[chat]
# Longer messages are split at paragraph, sentence, then word boundaries
max_message_len = 2000
part_delay_ms = 100

# Only accept input from these channels (empty = all)
allowed_channels = []

[logging]
# trace, debug, info, warn, error
level = "info"

# file = "~/.chat-relay/logs/chat-relay.log"
rotation = "daily"
json_format = false
"#
    .to_string()
}
