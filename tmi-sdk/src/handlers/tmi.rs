//! Lines from the server identity: numerics, capability acks, and the
//! Twitch-specific state and moderation commands.

use std::time::Duration;

use super::TwitchHandlers;
use crate::event::{Event, UserState};
use crate::irc::Message;

impl TwitchHandlers {
    pub(super) fn handle_tmi(&self, msg: &Message) -> Event {
        let channel = || msg.param(0).unwrap_or_default().to_string();
        match msg.command.as_str() {
            "001" => Event::Registered {
                username: msg.param(0).unwrap_or(self.username.as_str()).to_string(),
            },
            "353" => super::names(msg),
            "CAP" => match msg.param(1) {
                Some("ACK") => Event::CapAck {
                    caps: msg
                        .params
                        .last()
                        .map(|caps| caps.split_whitespace().map(str::to_string).collect())
                        .unwrap_or_default(),
                },
                _ => super::server_info(msg),
            },
            "PONG" => Event::Pong,
            "RECONNECT" => Event::ReconnectRequested,
            "GLOBALUSERSTATE" => Event::GlobalUserState {
                userstate: UserState::from_tags(&msg.tags),
            },
            "USERSTATE" => {
                let userstate = UserState::from_tags(&msg.tags);
                self.userstates.lock().insert(channel(), userstate.clone());
                Event::UserState { channel: channel(), userstate }
            }
            "ROOMSTATE" => Event::RoomState {
                channel: channel(),
                tags: msg.tags.clone(),
            },
            "NOTICE" => Event::Notice {
                channel: channel(),
                msg_id: msg.tag("msg-id").map(str::to_string),
                message: msg.param(1).unwrap_or_default().to_string(),
            },
            "CLEARCHAT" => Event::ClearChat {
                channel: channel(),
                target: msg.param(1).map(str::to_string),
                duration: msg
                    .tag("ban-duration")
                    .and_then(|secs| secs.parse().ok())
                    .map(Duration::from_secs),
            },
            // HOSTTARGET #channel :<target|-> [viewers]
            "HOSTTARGET" => {
                let mut parts = msg.param(1).unwrap_or_default().split_whitespace();
                let target = parts.next().filter(|t| *t != "-").map(str::to_string);
                let viewers = parts.next().and_then(|v| v.parse().ok());
                Event::HostTarget { channel: channel(), target, viewers }
            }
            "USERNOTICE" => Event::UserNotice {
                channel: channel(),
                msg_id: msg.tag("msg-id").map(str::to_string),
                message: msg.param(1).map(str::to_string),
            },
            command if super::is_numeric(command) => super::server_info(msg),
            _ => super::unhandled(msg),
        }
    }
}
