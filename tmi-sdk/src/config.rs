//! Client options and their defaults.
//!
//! Options are resolved once, before the client starts, and are immutable
//! afterwards.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default chat server.
pub const DEFAULT_SERVER: &str = "irc.chat.twitch.tv";
/// Plaintext IRC port.
pub const DEFAULT_PORT: u16 = 6667;
/// TLS IRC port.
pub const DEFAULT_SECURE_PORT: u16 = 6697;
/// Password sent by anonymous viewers.
pub const ANONYMOUS_PASSWORD: &str = "oauth:layerone";

/// Socket and reconnect behaviour.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub server: String,
    pub port: u16,
    /// Use TLS.
    pub secure: bool,
    /// Raise a reconnect request automatically when the connection drops.
    pub reconnect: bool,
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// First backoff delay.
    pub reconnect_interval: Duration,
    /// Upper bound on the backoff delay.
    pub max_reconnect_interval: Duration,
    /// Backoff growth factor.
    pub reconnect_decay: f64,
    /// Bound on a single connect attempt.
    pub timeout: Duration,
}

impl ConnectionOptions {
    /// Defaults for the given transport security; the port follows `secure`.
    pub fn new(secure: bool) -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            port: if secure { DEFAULT_SECURE_PORT } else { DEFAULT_PORT },
            secure,
            reconnect: false,
            max_reconnect_attempts: None,
            reconnect_interval: Duration::from_millis(1000),
            max_reconnect_interval: Duration::from_millis(30_000),
            reconnect_decay: 1.5,
            timeout: Duration::from_millis(9999),
        }
    }

    /// Next backoff delay after `current`.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        let grown = current.as_secs_f64() * self.reconnect_decay.max(1.0);
        // A huge or infinite decay saturates at the cap.
        Duration::try_from_secs_f64(grown)
            .map_or(self.max_reconnect_interval, |d| d.min(self.max_reconnect_interval))
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Login credentials.
#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
    /// OAuth token, `oauth:`-prefixed.
    pub password: String,
}

impl Identity {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into().to_lowercase(),
            password: password.into(),
        }
    }

    /// An anonymous read-only viewer (`justinfan<digits>`).
    pub fn anonymous() -> Self {
        Self {
            username: anonymous_username(),
            password: ANONYMOUS_PASSWORD.to_string(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.starts_with("justinfan")
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// Generate a random anonymous-viewer login.
pub fn anonymous_username() -> String {
    let n: u32 = rand::thread_rng().gen_range(1_000..80_000);
    format!("justinfan{n}")
}

/// Where a failed delivery goes back into the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequeuePolicy {
    /// Append to the back. Later entries can overtake the failed one.
    #[default]
    Tail,
    /// Put back at the front, keeping enqueue order.
    Head,
}

#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    /// `None` means unbounded.
    pub capacity: Option<usize>,
    pub requeue: RequeuePolicy,
}

/// Send intervals for the two moderator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    /// Moderator in every joined channel: 100 messages per 30 seconds.
    pub fast: Duration,
    /// Otherwise: 20 messages per 30 seconds.
    pub slow: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            fast: Duration::from_millis(30_000 / 100),
            slow: Duration::from_millis(30_000 / 20),
        }
    }
}

/// Everything needed to build a [`Client`](crate::client::Client).
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub connection: ConnectionOptions,
    pub identity: Identity,
    /// Joined whenever a connection is established.
    pub channels: Vec<String>,
    pub queue: QueueOptions,
    pub rate_limits: RateLimits,
}

impl ClientOptions {
    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.channels = channels.into_iter().map(|c| normalize_channel(c.as_ref())).collect();
        self
    }
}

/// Lowercase and ensure a leading `#`.
pub fn normalize_channel(channel: &str) -> String {
    let channel = channel.trim().to_lowercase();
    if channel.starts_with('#') {
        channel
    } else {
        format!("#{channel}")
    }
}
