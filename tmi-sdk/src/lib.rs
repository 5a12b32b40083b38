//! # tmi-sdk
//!
//! Client runtime for Twitch-style IRC chat.
//!
//! Inbound bytes are split into lines, parsed, classified by prefix and
//! published as typed [`Event`]s on an [`EventBus`]. Outbound lines go
//! through an [`OutboundQueue`] paced by a moderator-aware rate limit: fast
//! when the client moderates every joined channel, slow otherwise.
//!
//! Start with [`Client`].

pub mod bus;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod handlers;
pub mod irc;
pub mod pipeline;
pub mod queue;
pub mod ratelimit;
pub mod transport;

pub use bus::{EventBus, Subscription};
pub use client::Client;
pub use config::{ClientOptions, ConnectionOptions, Identity, QueueOptions, RateLimits, RequeuePolicy};
pub use connection::{ConnectionHandle, ConnectionState, ReadyState};
pub use error::{ClientError, ParseError};
pub use event::{Envelope, Event, EventKind, UserState};
pub use irc::Message;
pub use transport::{Connector, EstablishedConnection, TcpConnector};
