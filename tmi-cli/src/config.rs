//! Persistent configuration for tmi-cli.
//!
//! Config file lives at `~/.config/tmi/cli.toml` (or wherever `--config`
//! points).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tmi_sdk::config::{DEFAULT_SERVER, normalize_channel};
use tmi_sdk::{ClientOptions, ConnectionOptions, Identity, QueueOptions, RequeuePolicy};

/// Log filter used when neither `RUST_LOG`, `--log-level` nor the config
/// file set one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// User configuration (persisted in cli.toml).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Chat server host. Default: irc.chat.twitch.tv
    pub server: Option<String>,
    /// Port. Default follows `secure`.
    pub port: Option<u16>,
    /// Use TLS.
    pub secure: Option<bool>,
    /// Login name. Anonymous when unset.
    pub username: Option<String>,
    /// OAuth token, with or without the `oauth:` prefix.
    pub token: Option<String>,
    /// Channels joined on every connect.
    pub channels: Option<Vec<String>>,
    /// Reconnect automatically after connection loss.
    pub reconnect: Option<bool>,
    pub max_reconnect_attempts: Option<u32>,
    /// First reconnect delay in milliseconds.
    pub reconnect_interval_ms: Option<u64>,
    /// Where a failed send goes back into the queue: "tail" or "head".
    pub requeue: Option<RequeuePolicy>,
    /// Reject sends once this many lines are waiting.
    pub queue_capacity: Option<usize>,
    /// tracing filter, e.g. "debug" or "tmi_sdk=trace".
    pub log_level: Option<String>,
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tmi")
        .join("cli.toml")
}

impl Config {
    /// Load `path`, falling back to defaults when it is missing or invalid.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(c) => return c,
                    Err(e) => eprintln!("Warning: bad config file {}: {e}", path.display()),
                },
                Err(e) => eprintln!("Warning: can't read {}: {e}", path.display()),
            }
        }
        Self::default()
    }
}

/// Effective settings after merging CLI args > config file > defaults.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub server: String,
    pub port: Option<u16>,
    pub secure: bool,
    pub username: Option<String>,
    pub token: Option<String>,
    pub channels: Vec<String>,
    pub reconnect: bool,
    pub max_reconnect_attempts: Option<u32>,
    pub reconnect_interval: Option<Duration>,
    pub requeue: RequeuePolicy,
    pub queue_capacity: Option<usize>,
    pub log_level: String,
}

impl Resolved {
    pub fn merge(cli: &super::Cli, config: &Config) -> Self {
        let channels = if cli.channels.is_empty() {
            config.channels.clone().unwrap_or_default()
        } else {
            cli.channels.clone()
        };

        Self {
            server: cli
                .server
                .clone()
                .or_else(|| config.server.clone())
                .unwrap_or_else(|| DEFAULT_SERVER.to_string()),
            port: cli.port.or(config.port),
            secure: cli.secure || config.secure.unwrap_or(false),
            username: cli.username.clone().or_else(|| config.username.clone()),
            token: cli.token.clone().or_else(|| config.token.clone()),
            channels: channels.iter().map(|c| normalize_channel(c)).collect(),
            reconnect: cli.reconnect || config.reconnect.unwrap_or(false),
            max_reconnect_attempts: cli.max_reconnect_attempts.or(config.max_reconnect_attempts),
            reconnect_interval: config.reconnect_interval_ms.map(Duration::from_millis),
            requeue: config.requeue.unwrap_or_default(),
            queue_capacity: config.queue_capacity,
            log_level: cli
                .log_level
                .clone()
                .or_else(|| config.log_level.clone())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        }
    }

    /// Credentials, or an anonymous viewer when either half is missing.
    pub fn identity(&self) -> Identity {
        match (&self.username, &self.token) {
            (Some(username), Some(token)) => {
                let password = if token.starts_with("oauth:") {
                    token.clone()
                } else {
                    format!("oauth:{token}")
                };
                Identity::new(username, password)
            }
            (Some(username), None) => {
                tracing::warn!(username = %username, "No token configured, connecting anonymously");
                Identity::anonymous()
            }
            _ => Identity::anonymous(),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        let mut connection = ConnectionOptions::new(self.secure);
        connection.server = self.server.clone();
        if let Some(port) = self.port {
            connection.port = port;
        }
        connection.reconnect = self.reconnect;
        connection.max_reconnect_attempts = self.max_reconnect_attempts;
        if let Some(interval) = self.reconnect_interval {
            connection.reconnect_interval = interval;
        }

        ClientOptions {
            connection,
            identity: self.identity(),
            channels: self.channels.clone(),
            queue: QueueOptions {
                capacity: self.queue_capacity,
                requeue: self.requeue,
            },
            ..Default::default()
        }
    }
}
