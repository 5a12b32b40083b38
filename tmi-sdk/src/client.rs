//! The public client: connection manager, event bus, rate-limit policy and
//! outbound queue wired together.
//!
//! ```no_run
//! use tmi_sdk::{Client, ClientOptions, Event, EventKind, Identity};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let options = ClientOptions {
//!     identity: Identity::new("mybot", "oauth:abc123"),
//!     ..Default::default()
//! }
//! .with_channels(["somechannel"]);
//!
//! let client = Client::new(options);
//! let mut messages = client.subscribe(EventKind::Message);
//! client.connect().await;
//!
//! while let Some(envelope) = messages.recv().await {
//!     if let Event::Message { channel, username, message, .. } = envelope.event {
//!         println!("{channel} <{username}> {message}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::{EventBus, Subscription};
use crate::config::{ClientOptions, normalize_channel};
use crate::connection::{ConnectionHandle, ConnectionManager, ConnectionState};
use crate::error::ClientError;
use crate::event::{Event, EventKind};
use crate::handlers::{MessageHandlers, TwitchHandlers};
use crate::irc::Message;
use crate::queue::OutboundQueue;
use crate::ratelimit::{RateLimitPolicy, interval_for};
use crate::transport::{Connector, TcpConnector};

/// Channel that carries whispers on the legacy gateway.
const WHISPER_CHANNEL: &str = "#jtv";

/// A chat client. Cheap operations only: every network effect happens on
/// background tasks spawned at construction, which stop when the client is
/// dropped.
pub struct Client {
    options: ClientOptions,
    bus: EventBus,
    manager: Arc<ConnectionManager>,
    queue: OutboundQueue,
    rate_limit: watch::Receiver<Duration>,
    channels: Arc<Mutex<BTreeSet<String>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Client {
    /// Build a client that connects over TCP/TLS. Must be called from within
    /// a Tokio runtime.
    pub fn new(options: ClientOptions) -> Self {
        Self::with_connector(options, Arc::new(TcpConnector))
    }

    pub fn with_connector(options: ClientOptions, connector: Arc<dyn Connector>) -> Self {
        let handlers = Arc::new(TwitchHandlers::new(&options.identity.username));
        Self::with_parts(options, connector, handlers)
    }

    /// Build a client from explicit transport and handler implementations.
    pub fn with_parts(
        options: ClientOptions,
        connector: Arc<dyn Connector>,
        handlers: Arc<dyn MessageHandlers>,
    ) -> Self {
        let bus = EventBus::new();
        let queue = OutboundQueue::new(&options.queue);
        let manager = Arc::new(ConnectionManager::new(
            options.connection.clone(),
            options.identity.clone(),
            connector,
            handlers,
            bus.clone(),
            queue.clone(),
        ));
        let (interval_tx, interval_rx) =
            watch::channel(interval_for(&Default::default(), &options.rate_limits));
        let channels = Arc::new(Mutex::new(options.channels.iter().cloned().collect::<BTreeSet<_>>()));

        // Subscribe before spawning so no event published in between is missed.
        let policy_events = bus.subscribe_all();
        let reconnect_requests = bus.subscribe(EventKind::ReconnectRequested);
        let session_events = bus.subscribe_all();

        let policy = RateLimitPolicy::new(&options.identity.username, options.rate_limits);
        let tasks = vec![
            tokio::spawn(policy.run(policy_events, interval_tx)),
            tokio::spawn(queue.clone().run(manager.clone(), interval_rx.clone())),
            tokio::spawn(manager.clone().supervise(reconnect_requests)),
            tokio::spawn(run_session(
                manager.clone(),
                queue.clone(),
                channels.clone(),
                session_events,
            )),
        ];

        tracing::debug!(
            username = %options.identity.username,
            channels = options.channels.len(),
            "Client created"
        );

        Self {
            options,
            bus,
            manager,
            queue,
            rate_limit: interval_rx,
            channels,
            tasks,
        }
    }

    /// Open the connection. If a socket is already open or opening, its
    /// handle is returned unchanged. Failures are published as
    /// [`Event::ConnectFailed`].
    pub async fn connect(&self) -> ConnectionHandle {
        self.manager.connect().await
    }

    /// Close the connection and cancel any pending reconnect.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.manager.disconnect()
    }

    /// Close, wait `delay` (the current backoff when `None`), and connect
    /// again. Returns `None` if superseded by a `disconnect()` while waiting.
    pub async fn reconnect(&self, delay: Option<Duration>) -> Option<ConnectionHandle> {
        self.manager.reconnect(delay).await
    }

    /// Queue a raw protocol line. Delivered once a socket is open, paced by
    /// the current rate limit. Text with embedded line breaks is queued as
    /// one entry per line, each paced on its own.
    pub fn send(&self, line: impl Into<String>) -> Result<(), ClientError> {
        let line = line.into();
        for part in line.split(['\r', '\n']).filter(|l| !l.is_empty()) {
            self.queue.enqueue(part)?;
        }
        Ok(())
    }

    pub fn join(&self, channel: &str) -> Result<(), ClientError> {
        self.send(join_line(&normalize_channel(channel)))
    }

    pub fn part(&self, channel: &str) -> Result<(), ClientError> {
        self.send(Message::new("PART", vec![normalize_channel(channel)]).raw)
    }

    pub fn say(&self, channel: &str, text: &str) -> Result<(), ClientError> {
        self.send(privmsg(channel, text))
    }

    /// Send a `/me` message.
    pub fn action(&self, channel: &str, text: &str) -> Result<(), ClientError> {
        self.send(privmsg(channel, &format!("\u{1}ACTION {}\u{1}", single_line(text))))
    }

    pub fn whisper(&self, username: &str, text: &str) -> Result<(), ClientError> {
        let username = username.trim_start_matches('@').to_lowercase();
        self.send(privmsg(WHISPER_CHANNEL, &format!("/w {username} {text}")))
    }

    /// Events of one kind, from now on.
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        self.bus.subscribe(kind)
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.bus.subscribe_all()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Interval currently applied between outbound lines.
    pub fn rate_limit(&self) -> Duration {
        *self.rate_limit.borrow()
    }

    pub fn username(&self) -> &str {
        &self.options.identity.username
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Channels joined on every (re)connect.
    pub fn channels(&self) -> Vec<String> {
        self.channels.lock().iter().cloned().collect()
    }

    /// Lines waiting for delivery.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if matches!(self.manager.state(), ConnectionState::Connecting | ConnectionState::Connected) {
            let _ = self.manager.disconnect();
        }
        self.queue.close();
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Per-client reactions to bus events: keepalive replies, channel tracking
/// and rejoin on connect.
async fn run_session(
    manager: Arc<ConnectionManager>,
    queue: OutboundQueue,
    channels: Arc<Mutex<BTreeSet<String>>>,
    mut events: Subscription,
) {
    while let Some(envelope) = events.recv().await {
        match envelope.event {
            Event::Ping { server } => {
                if let Err(line) = manager.send_now(format!("PONG :{server}")) {
                    tracing::debug!(line = %line, "No socket for keepalive reply");
                }
            }
            Event::Connected { .. } => {
                let joins: Vec<String> = channels.lock().iter().cloned().collect();
                for channel in joins {
                    if let Err(e) = queue.enqueue(join_line(&channel)) {
                        tracing::warn!(channel = %channel, error = %e, "Could not queue join");
                    }
                }
            }
            Event::Join { channel, is_self: true, .. } => {
                channels.lock().insert(channel);
            }
            Event::Part { channel, is_self: true, .. } => {
                channels.lock().remove(&channel);
            }
            _ => {}
        }
    }
}

fn join_line(channel: &str) -> String {
    Message::new("JOIN", vec![channel.to_string()]).raw
}

fn privmsg(channel: &str, text: &str) -> String {
    let target = if channel == WHISPER_CHANNEL { channel.to_string() } else { normalize_channel(channel) };
    Message::new("PRIVMSG", vec![target, single_line(text)]).raw
}

// A line break inside the text would start a second, unpaced command.
fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}
