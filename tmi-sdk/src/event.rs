//! Events published on the client's [`EventBus`](crate::bus::EventBus).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::irc::Message;

/// Our own per-channel state as reported by `USERSTATE`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserState {
    /// Whether we hold moderator privileges in the channel.
    pub moderator: bool,
    pub display_name: Option<String>,
    pub badges: Option<String>,
    pub color: Option<String>,
    pub tags: HashMap<String, String>,
}

impl UserState {
    pub fn from_tags(tags: &HashMap<String, String>) -> Self {
        let non_empty = |key: &str| tags.get(key).filter(|v| !v.is_empty()).cloned();
        let badges = non_empty("badges");
        // Broadcasters are not flagged `mod=1` but can moderate their own channel.
        let broadcaster = badges
            .as_deref()
            .is_some_and(|b| b.split(',').any(|badge| badge.starts_with("broadcaster/")));
        Self {
            moderator: tags.get("mod").is_some_and(|v| v == "1") || broadcaster,
            display_name: non_empty("display-name"),
            badges,
            color: non_empty("color"),
            tags: tags.clone(),
        }
    }
}

/// Everything the client reports: classified inbound lines plus lifecycle
/// and control signals.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A socket is being opened.
    Connecting { server: String, port: u16 },
    /// The socket is open and the login handshake has been written.
    Connected { server: String, port: u16 },
    /// Opening the socket failed.
    ConnectFailed { reason: String },
    /// An intentional close has started.
    Disconnecting,
    /// The socket is gone.
    Disconnected { reason: String },
    /// Internal control signal: tear down and reconnect.
    ReconnectRequested,
    /// Reconnect attempts exceeded the configured maximum.
    ReconnectExhausted { attempts: u32 },

    /// RPL_WELCOME. `username` is the login the server accepted.
    Registered { username: String },
    Ping { server: String },
    Pong,
    CapAck { caps: Vec<String> },
    ServerInfo { command: String, text: String },
    GlobalUserState { userstate: UserState },
    UserState { channel: String, userstate: UserState },
    RoomState { channel: String, tags: HashMap<String, String> },
    Notice { channel: String, msg_id: Option<String>, message: String },
    ClearChat { channel: String, target: Option<String>, duration: Option<Duration> },
    HostTarget { channel: String, target: Option<String>, viewers: Option<u32> },
    UserNotice { channel: String, msg_id: Option<String>, message: Option<String> },
    Names { channel: String, usernames: Vec<String> },

    Mod { channel: String, username: String },
    Unmod { channel: String, username: String },

    Join { channel: String, username: String, is_self: bool, userstate: Option<UserState> },
    Part { channel: String, username: String, is_self: bool },
    Message {
        channel: String,
        username: String,
        message: String,
        is_self: bool,
        action: bool,
        tags: HashMap<String, String>,
    },
    Whisper { from: String, message: String },

    /// A line we route but have no typed event for.
    Unhandled { command: String },
}

/// Discriminant used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connecting,
    Connected,
    ConnectFailed,
    Disconnecting,
    Disconnected,
    ReconnectRequested,
    ReconnectExhausted,
    Registered,
    Ping,
    Pong,
    CapAck,
    ServerInfo,
    GlobalUserState,
    UserState,
    RoomState,
    Notice,
    ClearChat,
    HostTarget,
    UserNotice,
    Names,
    Mod,
    Unmod,
    Join,
    Part,
    Message,
    Whisper,
    Unhandled,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connecting { .. } => EventKind::Connecting,
            Event::Connected { .. } => EventKind::Connected,
            Event::ConnectFailed { .. } => EventKind::ConnectFailed,
            Event::Disconnecting => EventKind::Disconnecting,
            Event::Disconnected { .. } => EventKind::Disconnected,
            Event::ReconnectRequested => EventKind::ReconnectRequested,
            Event::ReconnectExhausted { .. } => EventKind::ReconnectExhausted,
            Event::Registered { .. } => EventKind::Registered,
            Event::Ping { .. } => EventKind::Ping,
            Event::Pong => EventKind::Pong,
            Event::CapAck { .. } => EventKind::CapAck,
            Event::ServerInfo { .. } => EventKind::ServerInfo,
            Event::GlobalUserState { .. } => EventKind::GlobalUserState,
            Event::UserState { .. } => EventKind::UserState,
            Event::RoomState { .. } => EventKind::RoomState,
            Event::Notice { .. } => EventKind::Notice,
            Event::ClearChat { .. } => EventKind::ClearChat,
            Event::HostTarget { .. } => EventKind::HostTarget,
            Event::UserNotice { .. } => EventKind::UserNotice,
            Event::Names { .. } => EventKind::Names,
            Event::Mod { .. } => EventKind::Mod,
            Event::Unmod { .. } => EventKind::Unmod,
            Event::Join { .. } => EventKind::Join,
            Event::Part { .. } => EventKind::Part,
            Event::Message { .. } => EventKind::Message,
            Event::Whisper { .. } => EventKind::Whisper,
            Event::Unhandled { .. } => EventKind::Unhandled,
        }
    }
}

/// An event as delivered to subscribers, with the line it came from.
///
/// `raw` is `None` for lifecycle and control events.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: Event,
    pub raw: Option<Arc<Message>>,
}

impl Envelope {
    pub fn control(event: Event) -> Self {
        Self { event, raw: None }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}
