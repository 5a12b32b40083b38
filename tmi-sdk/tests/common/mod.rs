//! In-memory server side for driving a full `Client`.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use tmi_sdk::transport::BoxFuture;
use tmi_sdk::{ClientOptions, ConnectionOptions, Connector, EstablishedConnection, Identity, RateLimits};

pub const WAIT: Duration = Duration::from_secs(5);

/// Hands the client one end of a duplex pipe per connect and the other end
/// to the test.
pub struct MemoryConnector {
    servers: mpsc::UnboundedSender<DuplexStream>,
    pub refuse: AtomicBool,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self { servers, refuse: AtomicBool::new(false) });
        (connector, rx)
    }
}

impl Connector for MemoryConnector {
    fn connect<'a>(&'a self, _options: &'a ConnectionOptions) -> BoxFuture<'a, anyhow::Result<EstablishedConnection>> {
        Box::pin(async move {
            if self.refuse.load(Ordering::SeqCst) {
                anyhow::bail!("connection refused");
            }
            let (client, server) = tokio::io::duplex(64 * 1024);
            self.servers
                .send(server)
                .map_err(|_| anyhow::anyhow!("test server gone"))?;
            Ok(EstablishedConnection::Memory(client))
        })
    }
}

pub struct FakeServer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    /// Wait for the client's next connection.
    pub async fn accept(servers: &mut mpsc::UnboundedReceiver<DuplexStream>) -> Self {
        let stream = tokio::time::timeout(WAIT, servers.recv())
            .await
            .expect("client did not connect")
            .expect("connector dropped");
        let (reader, writer) = tokio::io::split(stream);
        Self { reader: BufReader::new(reader), writer }
    }

    /// Next line from the client, `None` once it closed the connection.
    pub async fn read_line(&mut self) -> Option<String> {
        self.try_read_line(WAIT).await.expect("timed out waiting for a line")
    }

    /// `Err` if nothing arrives within `wait`.
    pub async fn try_read_line(&mut self, wait: Duration) -> Result<Option<String>, ()> {
        let mut line = String::new();
        match tokio::time::timeout(wait, self.reader.read_line(&mut line)).await {
            Err(_) => Err(()),
            Ok(Ok(0)) => Ok(None),
            Ok(Ok(_)) => Ok(Some(line.trim_end_matches(['\r', '\n']).to_string())),
            Ok(Err(e)) => panic!("read failed: {e}"),
        }
    }

    /// Consume the CAP/PASS/NICK login lines.
    pub async fn expect_handshake(&mut self, username: &str) {
        let cap = self.read_line().await.unwrap();
        assert!(cap.starts_with("CAP REQ :"), "got {cap}");
        let pass = self.read_line().await.unwrap();
        assert!(pass.starts_with("PASS "), "got {pass}");
        assert_eq!(self.read_line().await.unwrap(), format!("NICK {username}"));
    }

    pub async fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }
}

pub fn options(fast_ms: u64, slow_ms: u64) -> ClientOptions {
    ClientOptions {
        identity: Identity::new("me", "oauth:secret"),
        connection: ConnectionOptions {
            reconnect_interval: Duration::from_millis(10),
            max_reconnect_interval: Duration::from_millis(50),
            timeout: Duration::from_secs(2),
            ..Default::default()
        },
        rate_limits: RateLimits {
            fast: Duration::from_millis(fast_ms),
            slow: Duration::from_millis(slow_ms),
        },
        ..Default::default()
    }
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
