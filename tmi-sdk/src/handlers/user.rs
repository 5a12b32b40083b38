//! Lines with a `nick!user@host` prefix: membership, chat and whispers.

use super::TwitchHandlers;
use crate::event::Event;
use crate::irc::Message;

const ACTION_PREFIX: &str = "\u{1}ACTION ";

impl TwitchHandlers {
    pub(super) fn handle_user(&self, msg: &Message) -> Event {
        let nick = msg.nick().unwrap_or_default().to_lowercase();
        let channel = msg.param(0).unwrap_or_default().to_string();
        match msg.command.as_str() {
            "JOIN" => {
                let is_self = self.is_me(&nick);
                let userstate = if is_self {
                    self.userstates.lock().get(&channel).cloned()
                } else {
                    None
                };
                Event::Join { channel, username: nick, is_self, userstate }
            }
            "PART" => {
                let is_self = self.is_me(&nick);
                if is_self {
                    self.userstates.lock().remove(&channel);
                }
                Event::Part { channel, username: nick, is_self }
            }
            "PRIVMSG" => {
                let text = msg.param(1).unwrap_or_default();
                let (message, action) = match text.strip_prefix(ACTION_PREFIX) {
                    Some(body) => (body.trim_end_matches('\u{1}').to_string(), true),
                    None => (text.to_string(), false),
                };
                Event::Message {
                    channel,
                    is_self: self.is_me(&nick),
                    username: nick,
                    message,
                    action,
                    tags: msg.tags.clone(),
                }
            }
            "WHISPER" => Event::Whisper {
                from: nick,
                message: msg.param(1).unwrap_or_default().to_string(),
            },
            // `:<me>.tmi.twitch.tv 353 ...` arrives with a host-style prefix.
            "353" => super::names(msg),
            command if super::is_numeric(command) => super::server_info(msg),
            _ => super::unhandled(msg),
        }
    }
}
