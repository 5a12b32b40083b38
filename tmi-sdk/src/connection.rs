//! Socket lifecycle: connect, disconnect, reconnect with backoff.
//!
//! [`ConnectionManager`] is the only writer of [`ConnectionState`]. Each
//! socket it opens gets its own task that writes the login handshake, feeds
//! inbound bytes into a fresh [`MessagePipeline`], and drains the socket's
//! outbox (filled by the paced [`OutboundQueue`](crate::queue::OutboundQueue)).
//!
//! ## Generations
//!
//! Every connect and every disconnect bumps a generation counter. A reconnect
//! captures the generation before it sleeps and its connect is a no-op if the
//! counter has moved, so an intentional `disconnect()` cancels any pending
//! reconnect timer.
//!
//! ## Reconnection
//!
//! Reconnects happen only in response to [`Event::ReconnectRequested`] on the
//! bus, handled by [`ConnectionManager::supervise`]. The signal is raised by
//! the server (`RECONNECT`) or, when `reconnect` is enabled, by the manager
//! itself on connection loss.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

use crate::bus::{EventBus, Subscription};
use crate::config::{ConnectionOptions, Identity};
use crate::error::ClientError;
use crate::event::Event;
use crate::handlers::MessageHandlers;
use crate::pipeline::{MessagePipeline, SERVER_PREFIX};
use crate::queue::{LineSink, OutboundQueue};
use crate::transport::{Connector, EstablishedConnection};

/// Send a client PING after this long without inbound traffic.
const PING_INTERVAL: Duration = Duration::from_secs(60);
/// Treat the connection as lost after this long without inbound traffic.
const PING_TIMEOUT: Duration = Duration::from_secs(120);

const CAPABILITIES: &str = "twitch.tv/tags twitch.tv/commands twitch.tv/membership";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Readiness of a single socket.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

#[derive(Debug)]
struct Readiness(AtomicU8);

impl Readiness {
    fn new(state: ReadyState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn get(&self) -> ReadyState {
        match self.0.load(Ordering::SeqCst) {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    fn set(&self, state: ReadyState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        matches!(self.get(), ReadyState::Connecting | ReadyState::Open)
    }
}

/// Refers to one socket opened by [`ConnectionManager::connect`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    generation: u64,
    readiness: Arc<Readiness>,
}

impl ConnectionHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn ready_state(&self) -> ReadyState {
        self.readiness.get()
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }
}

struct Socket {
    generation: u64,
    readiness: Arc<Readiness>,
    outbox: mpsc::UnboundedSender<String>,
    shutdown: Arc<Notify>,
}

impl Socket {
    fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            generation: self.generation,
            readiness: self.readiness.clone(),
        }
    }
}

struct Inner {
    state: ConnectionState,
    socket: Option<Socket>,
    generation: u64,
    backoff: Duration,
    attempts: u32,
}

enum OpenOutcome {
    Opened(ConnectionHandle),
    Existing(ConnectionHandle),
    Failed(ConnectionHandle),
    /// `disconnect()` was called while the socket was being opened.
    Cancelled(ConnectionHandle),
    /// A reconnect whose generation was superseded.
    Stale,
}

pub struct ConnectionManager {
    options: ConnectionOptions,
    identity: Identity,
    connector: Arc<dyn Connector>,
    handlers: Arc<dyn MessageHandlers>,
    bus: EventBus,
    /// Where lines accepted by a socket that closed before writing them go.
    queue: OutboundQueue,
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    pub fn new(
        options: ConnectionOptions,
        identity: Identity,
        connector: Arc<dyn Connector>,
        handlers: Arc<dyn MessageHandlers>,
        bus: EventBus,
        queue: OutboundQueue,
    ) -> Self {
        let backoff = options.reconnect_interval;
        Self {
            options,
            identity,
            connector,
            handlers,
            bus,
            queue,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                socket: None,
                generation: 0,
                backoff,
                attempts: 0,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Current backoff delay used by the next reconnect.
    pub fn backoff(&self) -> Duration {
        self.inner.lock().backoff
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Open a socket unless one is already open or opening, in which case its
    /// handle is returned. Connect failures are published as
    /// [`Event::ConnectFailed`], never returned.
    pub async fn connect(self: &Arc<Self>) -> ConnectionHandle {
        // An explicit connect starts a fresh retry budget.
        {
            let mut inner = self.inner.lock();
            inner.attempts = 0;
            inner.backoff = self.options.reconnect_interval;
        }
        match self.open(None).await {
            OpenOutcome::Opened(handle) | OpenOutcome::Existing(handle) | OpenOutcome::Cancelled(handle) => handle,
            OpenOutcome::Failed(handle) => {
                if self.options.reconnect {
                    self.bus.emit(Event::ReconnectRequested);
                }
                handle
            }
            // Unreachable without an expected generation.
            OpenOutcome::Stale => ConnectionHandle {
                generation: self.generation(),
                readiness: Arc::new(Readiness::new(ReadyState::Closed)),
            },
        }
    }

    /// Close the socket. Fails with [`ClientError::CannotCloseAlreadyClosed`]
    /// when there is no socket or it is already closing. Any pending
    /// reconnect is cancelled either way.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.close().inspect_err(|e| tracing::error!("{e}"))
    }

    fn close(&self) -> Result<(), ClientError> {
        {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            let socket = match &inner.socket {
                Some(socket) if socket.readiness.is_live() => socket,
                _ => return Err(ClientError::CannotCloseAlreadyClosed),
            };
            socket.readiness.set(ReadyState::Closing);
            socket.shutdown.notify_one();
            inner.state = ConnectionState::Disconnecting;
        }
        tracing::info!("Disconnecting from server");
        self.bus.emit(Event::Disconnecting);
        Ok(())
    }

    /// Close (if open), wait `delay`, then connect again. `None` uses the
    /// current backoff. Returns `None` if a `disconnect()` or another connect
    /// happened while waiting.
    pub async fn reconnect(self: &Arc<Self>, delay: Option<Duration>) -> Option<ConnectionHandle> {
        let delay = delay.unwrap_or_else(|| self.backoff());
        match self.reopen(delay).await {
            OpenOutcome::Opened(handle)
            | OpenOutcome::Existing(handle)
            | OpenOutcome::Failed(handle)
            | OpenOutcome::Cancelled(handle) => Some(handle),
            OpenOutcome::Stale => None,
        }
    }

    async fn reopen(self: &Arc<Self>, delay: Duration) -> OpenOutcome {
        if let Err(e) = self.close() {
            tracing::debug!("{e}; reconnecting anyway");
        }
        let generation = self.generation();
        tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting");
        tokio::time::sleep(delay).await;

        let outcome = self.open(Some(generation)).await;
        if matches!(outcome, OpenOutcome::Stale) {
            tracing::debug!("Reconnect superseded, not connecting");
        }
        outcome
    }

    /// Handle reconnect requests, one at a time, with backoff. `requests`
    /// should be a [`ReconnectRequested`](crate::event::EventKind::ReconnectRequested)
    /// subscription. Runs until the bus is dropped.
    pub async fn supervise(self: Arc<Self>, mut requests: Subscription) {
        while requests.recv().await.is_some() {
            // A burst of requests is one decision.
            while requests.try_recv().is_some() {}

            loop {
                let (attempt, delay) = {
                    let mut inner = self.inner.lock();
                    inner.attempts += 1;
                    let delay = inner.backoff;
                    inner.backoff = self.options.next_backoff(delay);
                    (inner.attempts, delay)
                };
                if let Some(max) = self.options.max_reconnect_attempts
                    && attempt > max
                {
                    tracing::warn!(attempts = max, "Giving up reconnecting");
                    self.bus.emit(Event::ReconnectExhausted { attempts: max });
                    break;
                }

                tracing::debug!(attempt, "Reconnect attempt");
                match self.reopen(delay).await {
                    OpenOutcome::Failed(_) if self.options.reconnect => continue,
                    _ => break,
                }
            }

            while requests.try_recv().is_some() {}
        }
    }

    async fn open(self: &Arc<Self>, expected: Option<u64>) -> OpenOutcome {
        let (handle, outbox_rx, shutdown) = {
            let mut inner = self.inner.lock();
            if let Some(expected) = expected
                && inner.generation != expected
            {
                return OpenOutcome::Stale;
            }
            if let Some(socket) = &inner.socket
                && socket.readiness.is_live()
            {
                return OpenOutcome::Existing(socket.handle());
            }

            inner.generation += 1;
            let (outbox, outbox_rx) = mpsc::unbounded_channel();
            let socket = Socket {
                generation: inner.generation,
                readiness: Arc::new(Readiness::new(ReadyState::Connecting)),
                outbox,
                shutdown: Arc::new(Notify::new()),
            };
            let parts = (socket.handle(), outbox_rx, socket.shutdown.clone());
            inner.socket = Some(socket);
            inner.state = ConnectionState::Connecting;
            parts
        };

        let server = self.options.server.clone();
        let port = self.options.port;
        tracing::info!(server = %server, port, secure = self.options.secure, "Connecting");
        self.bus.emit(Event::Connecting { server, port });

        let attempt = tokio::time::timeout(self.options.timeout, self.connector.connect(&self.options)).await;
        if self.generation() != handle.generation {
            self.socket_closed(&handle, "Disconnected before the connection opened".to_string());
            return OpenOutcome::Cancelled(handle);
        }
        let conn = match attempt {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return self.connect_failed(handle, ClientError::Connect(format!("{e:#}"))),
            Err(_) => return self.connect_failed(handle, ClientError::Timeout(self.options.timeout)),
        };

        {
            let mut inner = self.inner.lock();
            // A disconnect may have slipped in since the check above.
            if inner.generation != handle.generation {
                drop(inner);
                self.socket_closed(&handle, "Disconnected before the connection opened".to_string());
                return OpenOutcome::Cancelled(handle);
            }
            handle.readiness.set(ReadyState::Open);
            inner.state = ConnectionState::Connected;
            inner.backoff = self.options.reconnect_interval;
            inner.attempts = 0;
        }

        tokio::spawn(self.clone().run_socket(conn, handle.clone(), outbox_rx, shutdown));
        OpenOutcome::Opened(handle)
    }

    fn connect_failed(&self, handle: ConnectionHandle, error: ClientError) -> OpenOutcome {
        tracing::warn!(error = %error, "Connection failed");
        {
            let mut inner = self.inner.lock();
            handle.readiness.set(ReadyState::Closed);
            if inner.socket.as_ref().is_some_and(|s| s.generation == handle.generation) {
                inner.socket = None;
                inner.state = ConnectionState::Disconnected;
            }
        }
        self.bus.emit(Event::ConnectFailed { reason: error.to_string() });
        OpenOutcome::Failed(handle)
    }

    /// Mark a socket closed and report it. Returns whether the close was
    /// requested by us.
    fn socket_closed(&self, handle: &ConnectionHandle, reason: String) -> bool {
        let intentional = self.mark_closed(handle);
        self.report_closed(intentional, reason);
        intentional
    }

    /// After this returns `send_now` no longer accepts lines for `handle`.
    fn mark_closed(&self, handle: &ConnectionHandle) -> bool {
        let intentional = handle.ready_state() == ReadyState::Closing;
        let mut inner = self.inner.lock();
        handle.readiness.set(ReadyState::Closed);
        if inner.socket.as_ref().is_some_and(|s| s.generation == handle.generation) {
            inner.socket = None;
            inner.state = ConnectionState::Disconnected;
        }
        intentional
    }

    fn report_closed(&self, intentional: bool, reason: String) {
        if intentional {
            tracing::info!(reason = %reason, "Disconnected");
        } else {
            tracing::warn!(reason = %reason, "Connection lost");
        }
        self.bus.emit(Event::Disconnected { reason });
    }

    /// Return unwritten lines to the paced queue.
    fn return_lines(&self, lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }
        tracing::debug!(count = lines.len(), "Returning unsent lines to the queue");
        self.queue.give_back(lines);
    }

    async fn run_socket(
        self: Arc<Self>,
        conn: EstablishedConnection,
        handle: ConnectionHandle,
        mut outbox: mpsc::UnboundedReceiver<String>,
        shutdown: Arc<Notify>,
    ) {
        let result = match conn {
            EstablishedConnection::Plain(tcp) => {
                let (reader, writer) = tokio::io::split(tcp);
                self.drive(reader, writer, &mut outbox, &shutdown).await
            }
            EstablishedConnection::Tls(tls) => {
                let (reader, writer) = tokio::io::split(tls);
                self.drive(reader, writer, &mut outbox, &shutdown).await
            }
            EstablishedConnection::Memory(duplex) => {
                let (reader, writer) = tokio::io::split(duplex);
                self.drive(reader, writer, &mut outbox, &shutdown).await
            }
        };
        let reason = result.unwrap_or_else(|e| e.to_string());

        let intentional = self.mark_closed(&handle);
        let unsent: Vec<String> = std::iter::from_fn(|| outbox.try_recv().ok()).collect();
        self.return_lines(unsent);
        self.report_closed(intentional, reason);
        if !intentional && self.options.reconnect && self.generation() == handle.generation {
            self.bus.emit(Event::ReconnectRequested);
        }
    }

    /// Pump one socket until it closes. Returns the close reason.
    async fn drive<R, W>(
        &self,
        mut reader: R,
        mut writer: W,
        outbox: &mut mpsc::UnboundedReceiver<String>,
        shutdown: &Notify,
    ) -> Result<String>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        write_line(&mut writer, &format!("CAP REQ :{CAPABILITIES}")).await?;
        write_line(&mut writer, &format!("PASS {}", self.identity.password)).await?;
        write_line(&mut writer, &format!("NICK {}", self.identity.username)).await?;
        tracing::debug!(username = %self.identity.username, "Handshake sent");
        self.bus.emit(Event::Connected {
            server: self.options.server.clone(),
            port: self.options.port,
        });

        let mut pipeline = MessagePipeline::new(self.handlers.clone(), self.bus.clone());
        let mut buf = vec![0u8; 8192];
        let mut last_activity = Instant::now();
        let mut next_ping = last_activity + PING_INTERVAL;

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    // Lines already accepted by send_now still go out.
                    while let Ok(line) = outbox.try_recv() {
                        self.write_or_return(&mut writer, line).await?;
                    }
                    let _ = writer.shutdown().await;
                    return Ok("Disconnected by client".to_string());
                }
                result = reader.read(&mut buf) => {
                    let n = result?;
                    if n == 0 {
                        return Ok("Connection closed by server".to_string());
                    }
                    last_activity = Instant::now();
                    next_ping = last_activity + PING_INTERVAL;
                    pipeline.feed(&buf[..n]);
                }
                Some(line) = outbox.recv() => {
                    self.write_or_return(&mut writer, line).await?;
                }
                _ = tokio::time::sleep_until(next_ping) => {
                    if last_activity.elapsed() >= PING_TIMEOUT {
                        return Ok("Ping timeout".to_string());
                    }
                    write_line(&mut writer, &format!("PING :{SERVER_PREFIX}")).await?;
                    next_ping = Instant::now() + PING_INTERVAL;
                }
            }
        }
    }

    async fn write_or_return<W: AsyncWrite + Unpin>(&self, writer: &mut W, line: String) -> Result<()> {
        tracing::debug!(line = %line, "Sending");
        if let Err(e) = write_line(writer, &line).await {
            self.return_lines(vec![line]);
            return Err(e);
        }
        Ok(())
    }

    /// Hand a line straight to the open socket, bypassing the pacing queue.
    pub fn send_now(&self, line: impl Into<String>) -> Result<(), String> {
        let line = line.into();
        let inner = self.inner.lock();
        match &inner.socket {
            Some(socket) if socket.readiness.get() == ReadyState::Open => {
                socket.outbox.send(line).map_err(|e| e.0)
            }
            _ => Err(line),
        }
    }
}

impl LineSink for ConnectionManager {
    fn deliver(&self, line: String) -> Result<(), String> {
        self.send_now(line)
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(format!("{line}\r\n").as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
