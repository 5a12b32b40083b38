use crate::event::Event;
use crate::irc::Message;

pub(super) fn handle(msg: &Message) -> Event {
    match msg.command.as_str() {
        "PING" => Event::Ping {
            server: msg.param(0).unwrap_or("tmi.twitch.tv").to_string(),
        },
        "PONG" => Event::Pong,
        _ => super::unhandled(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_carries_server() {
        let msg = Message::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(handle(&msg), Event::Ping { server: "tmi.twitch.tv".into() });
    }

    #[test]
    fn unknown_is_unhandled() {
        let msg = Message::parse("FOO bar").unwrap();
        assert_eq!(handle(&msg), Event::Unhandled { command: "FOO".into() });
    }
}
