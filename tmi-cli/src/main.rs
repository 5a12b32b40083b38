//! tmi-cli: line-oriented terminal chat client.
//!
//! Prints chat from every joined channel and sends what you type to the
//! current channel. Type `/help` for commands.
//!
//! Configuration comes from flags, then `~/.config/tmi/cli.toml`, then
//! built-in defaults. Credentials may also be passed as `TMI_USERNAME` and
//! `TMI_TOKEN`.

mod command;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use command::Input;
use config::{Config, Resolved};
use tmi_sdk::{Client, Event};

#[derive(Parser, Debug)]
#[command(name = "tmi-cli", about = "Terminal chat client for Twitch-style IRC")]
pub struct Cli {
    /// Chat server host
    #[arg(long)]
    server: Option<String>,

    /// Server port (default 6667, or 6697 with --secure)
    #[arg(long)]
    port: Option<u16>,

    /// Use TLS
    #[arg(long)]
    secure: bool,

    /// Login name (anonymous when unset)
    #[arg(long, env = "TMI_USERNAME")]
    username: Option<String>,

    /// OAuth token
    #[arg(long, env = "TMI_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Channel to join (repeatable)
    #[arg(long = "channel", short = 'c')]
    channels: Vec<String>,

    /// Reconnect automatically after connection loss
    #[arg(long)]
    reconnect: bool,

    /// Give up after this many reconnect attempts
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,

    /// Log filter when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(config::default_path);
    let file = Config::load(&config_path);
    let resolved = Resolved::merge(&cli, &file);

    let fallback = format!("tmi_cli={0},tmi_sdk={0}", resolved.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = resolved.client_options();
    tracing::info!(
        server = %options.connection.server,
        port = options.connection.port,
        username = %options.identity.username,
        channels = ?options.channels,
        "Starting tmi-cli"
    );

    let client = Client::new(options);
    let mut current = resolved.channels.first().cloned();

    let printer = tokio::spawn(print_events(client.subscribe_all()));
    client.connect().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };

        let result = match command::parse(&line) {
            Input::Empty => Ok(()),
            Input::Quit => break,
            Input::Help => {
                println!("{}", command::HELP);
                Ok(())
            }
            Input::Unknown(line) => {
                println!("Unknown command: {line} (try /help)");
                Ok(())
            }
            Input::Join(channel) => {
                current = Some(channel.clone());
                client.join(&channel)
            }
            Input::Part(channel) => match channel.or_else(|| current.take()) {
                Some(channel) => client.part(&channel),
                None => {
                    println!("Not in a channel");
                    Ok(())
                }
            },
            Input::Whisper { to, text } => client.whisper(&to, &text),
            Input::Raw(raw) => client.send(raw),
            Input::Say(text) | Input::Action(text) if current.is_none() => {
                println!("No current channel, /join one first: {text}");
                Ok(())
            }
            Input::Say(text) => client.say(current.as_deref().unwrap_or_default(), &text),
            Input::Action(text) => client.action(current.as_deref().unwrap_or_default(), &text),
        };
        if let Err(e) = result {
            println!("Error: {e}");
        }
    }

    if let Err(e) = client.disconnect() {
        tracing::debug!("{e}");
    }
    // Let the close notification print before exiting.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    printer.abort();
    Ok(())
}

async fn print_events(mut events: tmi_sdk::Subscription) {
    while let Some(envelope) = events.recv().await {
        let ts = Local::now().format("%H:%M:%S");
        match envelope.event {
            Event::Message { channel, username, message, action: false, .. } => {
                println!("[{ts}] {channel} <{username}> {message}");
            }
            Event::Message { channel, username, message, action: true, .. } => {
                println!("[{ts}] {channel} * {username} {message}");
            }
            Event::Whisper { from, message } => println!("[{ts}] *{from}* {message}"),
            Event::Notice { channel, message, .. } => println!("[{ts}] {channel} -!- {message}"),
            Event::UserNotice { channel, message: Some(message), msg_id, .. } => {
                let kind = msg_id.unwrap_or_default();
                println!("[{ts}] {channel} [{kind}] {message}");
            }
            Event::Join { channel, is_self: true, .. } => println!("[{ts}] Joined {channel}"),
            Event::Part { channel, is_self: true, .. } => println!("[{ts}] Left {channel}"),
            Event::ClearChat { channel, target: None, .. } => println!("[{ts}] {channel} -!- chat cleared"),
            Event::Connected { server, port } => println!("[{ts}] Connected to {server}:{port}"),
            Event::Disconnected { reason } => println!("[{ts}] Disconnected: {reason}"),
            Event::ConnectFailed { reason } => println!("[{ts}] Connection failed: {reason}"),
            Event::ReconnectExhausted { attempts } => {
                println!("[{ts}] Gave up reconnecting after {attempts} attempts")
            }
            _ => {}
        }
    }
}
