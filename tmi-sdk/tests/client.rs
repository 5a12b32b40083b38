//! End-to-end client behaviour over an in-memory transport.
//!
//! Covers:
//! - Login handshake and joining configured channels
//! - Inbound chunk reassembly into events
//! - Keepalive replies bypassing the pacing queue
//! - Moderator status driving the send interval
//! - Paced, ordered delivery and requeue while disconnected
//! - Disconnect, server-requested reconnect and connection loss

mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use common::{FakeServer, MemoryConnector, WAIT, eventually, options};
use tmi_sdk::{Client, ClientError, ConnectionState, Event, EventKind};

#[tokio::test]
async fn handshake_then_configured_channels_are_joined() {
    let (connector, mut servers) = MemoryConnector::new();
    let client = Client::with_connector(options(10, 10).with_channels(["Foo", "#bar"]), connector);

    let handle = client.connect().await;
    assert!(handle.is_open());
    let mut server = FakeServer::accept(&mut servers).await;
    assert_eq!(
        server.read_line().await.unwrap(),
        "CAP REQ :twitch.tv/tags twitch.tv/commands twitch.tv/membership"
    );
    assert_eq!(server.read_line().await.unwrap(), "PASS oauth:secret");
    assert_eq!(server.read_line().await.unwrap(), "NICK me");
    assert_eq!(server.read_line().await.unwrap(), "JOIN #bar");
    assert_eq!(server.read_line().await.unwrap(), "JOIN #foo");
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn connect_twice_returns_existing_socket() {
    let (connector, mut servers) = MemoryConnector::new();
    let client = Client::with_connector(options(10, 10), connector);

    let first = client.connect().await;
    let second = client.connect().await;
    assert_eq!(first.generation(), second.generation());
    let _server = FakeServer::accept(&mut servers).await;
    assert!(servers.try_recv().is_err(), "a second socket was opened");
}

#[tokio::test]
async fn line_split_across_chunks_becomes_one_event() {
    let (connector, mut servers) = MemoryConnector::new();
    let client = Client::with_connector(options(10, 10), connector);
    let mut messages = client.subscribe(EventKind::Message);

    client.connect().await;
    let mut server = FakeServer::accept(&mut servers).await;
    server.expect_handshake("me").await;

    server.send("@color=#FF0000 :bob!bob@bob.tmi.twitch.tv PRIV").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    server.send("MSG #foo :hello there\r\n:bob!bob@bob.tmi.twitch.tv PRIVMSG #foo :\u{1}ACTION waves\u{1}\r\n").await;

    let first = tokio::time::timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    match first.event {
        Event::Message { channel, username, message, is_self, action, tags } => {
            assert_eq!(channel, "#foo");
            assert_eq!(username, "bob");
            assert_eq!(message, "hello there");
            assert!(!is_self);
            assert!(!action);
            assert_eq!(tags.get("color").map(String::as_str), Some("#FF0000"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(first.raw.is_some());

    let second = tokio::time::timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert!(matches!(second.event, Event::Message { action: true, ref message, .. } if message == "waves"));
}

#[tokio::test]
async fn server_ping_is_answered_immediately() {
    let (connector, mut servers) = MemoryConnector::new();
    // A slow queue would hold a paced reply back for seconds.
    let client = Client::with_connector(options(3_000, 3_000), connector);

    client.connect().await;
    let mut server = FakeServer::accept(&mut servers).await;
    server.expect_handshake("me").await;

    server.send("PING :tmi.twitch.tv\r\n").await;
    let reply = server.try_read_line(Duration::from_secs(1)).await.expect("no PONG");
    assert_eq!(reply.as_deref(), Some("PONG :tmi.twitch.tv"));
}

#[tokio::test]
async fn moderator_status_drives_rate_limit() {
    let (connector, mut servers) = MemoryConnector::new();
    let client = Client::with_connector(options(10, 200), connector);
    assert_eq!(client.rate_limit(), Duration::from_millis(10));

    client.connect().await;
    let mut server = FakeServer::accept(&mut servers).await;
    server.expect_handshake("me").await;

    server.send(":me!me@me.tmi.twitch.tv JOIN #a\r\n@mod=0 :tmi.twitch.tv USERSTATE #a\r\n").await;
    eventually("slow interval", || client.rate_limit() == Duration::from_millis(200)).await;

    server.send(":jtv MODE #a +o me\r\n").await;
    eventually("fast interval", || client.rate_limit() == Duration::from_millis(10)).await;

    // Someone else being unmodded changes nothing.
    server.send(":jtv MODE #a -o bob\r\n:jtv MODE #a +o bob\r\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.rate_limit(), Duration::from_millis(10));
}

#[tokio::test]
async fn sends_are_delivered_in_order_and_paced() {
    let (connector, mut servers) = MemoryConnector::new();
    let client = Client::with_connector(options(100, 100), connector);

    client.connect().await;
    let mut server = FakeServer::accept(&mut servers).await;
    server.expect_handshake("me").await;

    for text in ["one", "two", "three"] {
        client.say("#a", text).unwrap();
    }

    let mut arrivals = Vec::new();
    for expected in ["one", "two", "three"] {
        assert_eq!(server.read_line().await.unwrap(), format!("PRIVMSG #a :{expected}"));
        arrivals.push(Instant::now());
    }
    for pair in arrivals.windows(2) {
        // Arrival times carry some scheduling jitter on the reading side.
        assert!(pair[1] - pair[0] >= Duration::from_millis(80), "gap {:?}", pair[1] - pair[0]);
    }
}

#[tokio::test]
async fn lines_sent_while_disconnected_are_delivered_once() {
    let (connector, mut servers) = MemoryConnector::new();
    let client = Client::with_connector(options(10, 10), connector);

    client.say("#a", "queued early").unwrap();
    client.send("PRIVMSG #a :second\r\n").unwrap();
    // Several delivery attempts fail and requeue before a socket exists.
    tokio::time::sleep(Duration::from_millis(100)).await;
    // One entry may be between a failed attempt and its requeue.
    assert!(client.queue_len() >= 1);

    client.connect().await;
    let mut server = FakeServer::accept(&mut servers).await;
    server.expect_handshake("me").await;

    let mut lines = vec![server.read_line().await.unwrap(), server.read_line().await.unwrap()];
    lines.sort();
    assert_eq!(lines, ["PRIVMSG #a :queued early", "PRIVMSG #a :second"]);
    assert!(server.try_read_line(Duration::from_millis(200)).await.is_err(), "duplicate delivery");
    assert_eq!(client.queue_len(), 0);
}

#[tokio::test]
async fn disconnect_twice_fails_the_second_time() {
    let (connector, mut servers) = MemoryConnector::new();
    let client = Client::with_connector(options(10, 10), connector);
    let mut closed = client.subscribe(EventKind::Disconnected);

    client.connect().await;
    let mut server = FakeServer::accept(&mut servers).await;
    server.expect_handshake("me").await;

    client.disconnect().unwrap();
    assert!(matches!(client.disconnect(), Err(ClientError::CannotCloseAlreadyClosed)));

    assert_eq!(server.read_line().await, None);
    let event = tokio::time::timeout(WAIT, closed.recv()).await.unwrap().unwrap();
    assert!(matches!(event.event, Event::Disconnected { .. }));
    eventually("disconnected state", || client.state() == ConnectionState::Disconnected).await;
    assert!(matches!(client.disconnect(), Err(ClientError::CannotCloseAlreadyClosed)));
}

#[tokio::test]
async fn server_reconnect_command_reopens_and_rejoins() {
    let (connector, mut servers) = MemoryConnector::new();
    let client = Client::with_connector(options(10, 10).with_channels(["a"]), connector);

    let first = client.connect().await;
    let mut server = FakeServer::accept(&mut servers).await;
    server.expect_handshake("me").await;
    assert_eq!(server.read_line().await.unwrap(), "JOIN #a");

    server.send(":tmi.twitch.tv RECONNECT\r\n").await;
    assert_eq!(server.read_line().await, None);

    let mut server = FakeServer::accept(&mut servers).await;
    server.expect_handshake("me").await;
    assert_eq!(server.read_line().await.unwrap(), "JOIN #a");
    eventually("connected state", || client.state() == ConnectionState::Connected).await;
    assert_eq!(first.ready_state(), tmi_sdk::ReadyState::Closed);
}

#[tokio::test]
async fn connection_loss_reconnects_when_enabled() {
    let (connector, mut servers) = MemoryConnector::new();
    let mut opts = options(10, 10);
    opts.connection.reconnect = true;
    let client = Client::with_connector(opts, connector);
    let mut lost = client.subscribe(EventKind::Disconnected);

    client.connect().await;
    let mut server = FakeServer::accept(&mut servers).await;
    server.expect_handshake("me").await;
    drop(server);

    let event = tokio::time::timeout(WAIT, lost.recv()).await.unwrap().unwrap();
    assert!(matches!(event.event, Event::Disconnected { ref reason } if reason.contains("closed by server")));

    let mut server = FakeServer::accept(&mut servers).await;
    server.expect_handshake("me").await;
}

#[tokio::test]
async fn connection_loss_without_reconnect_stays_down() {
    let (connector, mut servers) = MemoryConnector::new();
    let client = Client::with_connector(options(10, 10), connector);

    client.connect().await;
    let mut server = FakeServer::accept(&mut servers).await;
    server.expect_handshake("me").await;
    drop(server);

    eventually("disconnected state", || client.state() == ConnectionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(servers.try_recv().is_err());
}

#[tokio::test]
async fn disconnect_cancels_requested_reconnect() {
    let (connector, mut servers) = MemoryConnector::new();
    let mut opts = options(10, 10);
    opts.connection.reconnect_interval = Duration::from_millis(300);
    let client = Client::with_connector(opts, connector);
    let mut closed = client.subscribe(EventKind::Disconnected);

    client.connect().await;
    let mut server = FakeServer::accept(&mut servers).await;
    server.expect_handshake("me").await;

    // The supervisor closes the socket and waits out the backoff.
    server.send(":tmi.twitch.tv RECONNECT\r\n").await;
    tokio::time::timeout(WAIT, closed.recv()).await.unwrap().unwrap();

    // Nothing left to close, but the pending reconnect is cancelled.
    assert!(client.disconnect().is_err());
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(servers.try_recv().is_err(), "stale reconnect opened a socket");
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn reconnect_attempts_are_bounded() {
    let (connector, _servers) = MemoryConnector::new();
    connector.refuse.store(true, Ordering::SeqCst);
    let mut opts = options(10, 10);
    opts.connection.reconnect = true;
    opts.connection.max_reconnect_attempts = Some(2);
    let client = Client::with_connector(opts, connector);
    let mut failures = client.subscribe(EventKind::ConnectFailed);
    let mut exhausted = client.subscribe(EventKind::ReconnectExhausted);

    client.connect().await;

    let event = tokio::time::timeout(WAIT, exhausted.recv()).await.unwrap().unwrap();
    assert_eq!(event.event, Event::ReconnectExhausted { attempts: 2 });
    let mut count = 0;
    while failures.try_recv().is_some() {
        count += 1;
    }
    // The initial connect plus two retries.
    assert_eq!(count, 3);
}
