//! Error types surfaced to SDK consumers.

use std::time::Duration;

/// Errors returned by [`Client`](crate::client::Client) operations.
///
/// Only caller misuse and local resource limits are surfaced here. Transport
/// hiccups while sending are absorbed by the outbound queue, and connection
/// failures are reported as events on the bus instead.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// `disconnect()` was called with no socket, or one that is already
    /// closing or closed.
    #[error("cannot close a connection that is already closed")]
    CannotCloseAlreadyClosed,

    /// The bounded outbound queue is at capacity.
    #[error("outbound queue is full ({capacity} entries)")]
    QueueFull { capacity: usize },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid server name: {0}")]
    InvalidServerName(String),
}

/// A single protocol line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("tag section is not followed by a command")]
    UnterminatedTags,
    #[error("prefix is not followed by a command")]
    UnterminatedPrefix,
    #[error("missing command")]
    MissingCommand,
}
