//! Parsing of lines typed at the prompt.

use tmi_sdk::config::normalize_channel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain text for the current channel.
    Say(String),
    Action(String),
    Join(String),
    /// `None` parts the current channel.
    Part(Option<String>),
    Whisper { to: String, text: String },
    Raw(String),
    Quit,
    Help,
    Empty,
    Unknown(String),
}

pub fn parse(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    // `//text` sends a message that starts with a slash.
    if let Some(text) = line.strip_prefix("//") {
        return Input::Say(format!("/{text}"));
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Say(line.to_string());
    };

    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    let rest = rest.trim();
    match name.to_lowercase().as_str() {
        "join" | "j" if !rest.is_empty() => Input::Join(normalize_channel(rest)),
        "part" | "leave" => Input::Part((!rest.is_empty()).then(|| normalize_channel(rest))),
        "me" if !rest.is_empty() => Input::Action(rest.to_string()),
        "w" | "whisper" => match rest.split_once(' ') {
            Some((to, text)) if !text.trim().is_empty() => Input::Whisper {
                to: to.to_string(),
                text: text.trim().to_string(),
            },
            _ => Input::Unknown(line.to_string()),
        },
        "raw" | "quote" if !rest.is_empty() => Input::Raw(rest.to_string()),
        "quit" | "exit" => Input::Quit,
        "help" => Input::Help,
        _ => Input::Unknown(line.to_string()),
    }
}

pub const HELP: &str = "\
/join <channel>       join a channel and make it current
/part [channel]       leave a channel (default: current)
/me <text>            send an action
/w <user> <text>      whisper
/raw <line>           send a raw protocol line
/quit                 disconnect and exit
anything else is sent to the current channel";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_said() {
        assert_eq!(parse("hello world"), Input::Say("hello world".into()));
        assert_eq!(parse("//slash"), Input::Say("/slash".into()));
        assert_eq!(parse("   "), Input::Empty);
    }

    #[test]
    fn commands() {
        assert_eq!(parse("/join Foo"), Input::Join("#foo".into()));
        assert_eq!(parse("/part"), Input::Part(None));
        assert_eq!(parse("/part #bar"), Input::Part(Some("#bar".into())));
        assert_eq!(parse("/me waves"), Input::Action("waves".into()));
        assert_eq!(
            parse("/w bob hi there"),
            Input::Whisper { to: "bob".into(), text: "hi there".into() }
        );
        assert_eq!(parse("/raw PING :x"), Input::Raw("PING :x".into()));
        assert_eq!(parse("/QUIT"), Input::Quit);
    }

    #[test]
    fn incomplete_commands_are_unknown() {
        assert_eq!(parse("/join"), Input::Unknown("/join".into()));
        assert_eq!(parse("/w bob"), Input::Unknown("/w bob".into()));
        assert_eq!(parse("/frobnicate"), Input::Unknown("/frobnicate".into()));
    }
}
