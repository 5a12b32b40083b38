//! Lines from the `jtv` gateway. Only moderator grants are still sent this way.

use crate::event::Event;
use crate::irc::Message;

pub(super) fn handle(msg: &Message) -> Event {
    if msg.command != "MODE" {
        return super::unhandled(msg);
    }
    match (msg.param(0), msg.param(1), msg.param(2)) {
        (Some(channel), Some("+o"), Some(nick)) => Event::Mod {
            channel: channel.to_string(),
            username: nick.to_lowercase(),
        },
        (Some(channel), Some("-o"), Some(nick)) => Event::Unmod {
            channel: channel.to_string(),
            username: nick.to_lowercase(),
        },
        _ => super::unhandled(msg),
    }
}
