//! Inbound pipeline: raw chunks → lines → parsed messages → events.
//!
//! A pipeline belongs to exactly one socket, so its partial-line buffer never
//! mixes bytes from two connections, and handlers run sequentially in line
//! order.

use std::sync::Arc;

use crate::bus::EventBus;
use crate::event::Envelope;
use crate::handlers::{EventSink, MessageHandlers};
use crate::irc::Message;

/// Prefix used by the chat server itself.
pub const SERVER_PREFIX: &str = "tmi.twitch.tv";
/// Prefix used by the legacy gateway.
pub const LEGACY_PREFIX: &str = "jtv";

/// Where a line came from, decided solely by its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    NoPrefix,
    Server,
    Legacy,
    User,
}

pub fn classify(prefix: Option<&str>) -> Source {
    match prefix {
        None => Source::NoPrefix,
        Some(SERVER_PREFIX) => Source::Server,
        Some(LEGACY_PREFIX) => Source::Legacy,
        Some(_) => Source::User,
    }
}

/// Reassembles lines across chunk boundaries.
///
/// Works on bytes so a multi-byte character split between two reads is
/// decoded only once its line is complete.
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes. Empty lines are
    /// dropped; the trailing partial line is kept for the next chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let Some(last_newline) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);

        complete
            .split(|b| *b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.push(chunk.as_bytes())
    }

    /// Bytes of the incomplete trailing line.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}

pub struct MessagePipeline {
    splitter: LineSplitter,
    handlers: Arc<dyn MessageHandlers>,
    bus: EventBus,
}

impl MessagePipeline {
    pub fn new(handlers: Arc<dyn MessageHandlers>, bus: EventBus) -> Self {
        Self {
            splitter: LineSplitter::new(),
            handlers,
            bus,
        }
    }

    /// Feed one raw chunk. Returns the number of events published.
    pub fn feed(&mut self, chunk: &[u8]) -> usize {
        self.splitter
            .push(chunk)
            .iter()
            .map(|line| self.process_line(line))
            .sum()
    }

    /// Parse, classify and dispatch one complete line.
    pub fn process_line(&self, line: &str) -> usize {
        tracing::trace!(line = %line, "<<");
        let msg = match Message::parse(line) {
            Ok(msg) => Arc::new(msg),
            Err(e) => {
                tracing::warn!(line = %line, error = %e, "Dropping unparseable line");
                return 0;
            }
        };

        let mut sink = EventSink::new();
        match classify(msg.prefix.as_deref()) {
            Source::NoPrefix => self.handlers.no_prefix(&msg, &mut sink),
            Source::Server => self.handlers.tmi(&msg, &mut sink),
            Source::Legacy => self.handlers.legacy(&msg, &mut sink),
            Source::User => self.handlers.user(&msg, &mut sink),
        }

        let events = sink.into_events();
        let count = events.len();
        for event in events {
            self.bus.publish(Envelope { event, raw: Some(msg.clone()) });
        }
        count
    }
}
