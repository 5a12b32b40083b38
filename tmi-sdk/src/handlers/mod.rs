//! Per-source message handlers.
//!
//! The pipeline classifies each line by its prefix and hands it to exactly
//! one of the [`MessageHandlers`] methods. [`TwitchHandlers`] is the stock
//! implementation that maps Twitch chat commands to [`Event`]s.

mod legacy;
mod no_prefix;
mod tmi;
mod user;

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::event::{Event, UserState};
use crate::irc::Message;

/// Collects the events a handler produces for one line.
#[derive(Debug, Default)]
pub struct EventSink {
    events: Vec<Event>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

/// One method per prefix classification.
pub trait MessageHandlers: Send + Sync + 'static {
    /// Lines without a prefix (server control, e.g. `PING`).
    fn no_prefix(&self, msg: &Message, sink: &mut EventSink);
    /// Lines from the server identity (`tmi.twitch.tv`).
    fn tmi(&self, msg: &Message, sink: &mut EventSink);
    /// Lines from the legacy gateway (`jtv`).
    fn legacy(&self, msg: &Message, sink: &mut EventSink);
    /// Lines from a user prefix (`nick!user@host`).
    fn user(&self, msg: &Message, sink: &mut EventSink);
}

/// Maps Twitch chat commands to events. Every line yields exactly one event;
/// lines with no typed mapping become [`Event::Unhandled`].
pub struct TwitchHandlers {
    username: String,
    /// Last USERSTATE per channel, attached to our own JOIN.
    userstates: Mutex<HashMap<String, UserState>>,
}

impl TwitchHandlers {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_lowercase(),
            userstates: Mutex::new(HashMap::new()),
        }
    }

    fn is_me(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.username)
    }
}

impl MessageHandlers for TwitchHandlers {
    fn no_prefix(&self, msg: &Message, sink: &mut EventSink) {
        sink.emit(no_prefix::handle(msg));
    }

    fn tmi(&self, msg: &Message, sink: &mut EventSink) {
        sink.emit(self.handle_tmi(msg));
    }

    fn legacy(&self, msg: &Message, sink: &mut EventSink) {
        sink.emit(legacy::handle(msg));
    }

    fn user(&self, msg: &Message, sink: &mut EventSink) {
        sink.emit(self.handle_user(msg));
    }
}

fn unhandled(msg: &Message) -> Event {
    Event::Unhandled { command: msg.command.clone() }
}

/// `353 <me> <type> <channel> :<nicks>`; sent from both the server and a
/// `<me>.tmi.twitch.tv` prefix.
fn names(msg: &Message) -> Event {
    match (msg.param(2), msg.param(3)) {
        (Some(channel), Some(nicks)) => Event::Names {
            channel: channel.to_string(),
            usernames: nicks.split_whitespace().map(str::to_string).collect(),
        },
        _ => unhandled(msg),
    }
}

/// Numeric replies other than NAMES: drop our own nick and keep the text.
fn server_info(msg: &Message) -> Event {
    let text = if msg.params.len() > 1 {
        msg.params[1..].join(" ")
    } else {
        msg.params.join(" ")
    };
    Event::ServerInfo { command: msg.command.clone(), text }
}

fn is_numeric(command: &str) -> bool {
    command.len() == 3 && command.bytes().all(|b| b.is_ascii_digit())
}
