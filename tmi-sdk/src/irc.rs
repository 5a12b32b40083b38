//! IRC line parsing with IRCv3 message tags.

use std::collections::HashMap;
use std::fmt;

use crate::error::ParseError;

/// A single parsed protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub tags: HashMap<String, String>,
    /// Originator (`tmi.twitch.tv`, `jtv`, or `nick!user@host`).
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    /// The line as received, without the line terminator.
    pub raw: String,
}

impl Message {
    /// Build an outbound message with no tags or prefix.
    pub fn new(command: &str, params: Vec<String>) -> Self {
        let mut msg = Self {
            tags: HashMap::new(),
            prefix: None,
            command: command.to_string(),
            params,
            raw: String::new(),
        };
        msg.raw = msg.to_string();
        msg
    }

    /// Parse one line. The trailing `\r\n` (or `\n`) is optional.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let raw = line.trim_end_matches(['\r', '\n']);
        let mut rest = raw.trim_start_matches(' ');
        if rest.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut tags = HashMap::new();
        if let Some(after) = rest.strip_prefix('@') {
            let (tag_str, remainder) = after.split_once(' ').ok_or(ParseError::UnterminatedTags)?;
            for pair in tag_str.split(';').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                tags.insert(key.to_string(), unescape_tag_value(value));
            }
            rest = remainder.trim_start_matches(' ');
        }

        let mut prefix = None;
        if let Some(after) = rest.strip_prefix(':') {
            let (p, remainder) = after.split_once(' ').ok_or(ParseError::UnterminatedPrefix)?;
            prefix = Some(p.to_string());
            rest = remainder.trim_start_matches(' ');
        }

        let (command, mut rest) = match rest.split_once(' ') {
            Some((c, r)) => (c, r),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((p, r)) => {
                    params.push(p.to_string());
                    rest = r;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Ok(Self {
            tags,
            prefix,
            command: command.to_ascii_uppercase(),
            params,
            raw: raw.to_string(),
        })
    }

    /// Nick portion of a `nick!user@host` prefix.
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .and_then(|p| p.split('!').next())
            .filter(|n| !n.is_empty())
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(|s| s.as_str())
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|s| s.as_str())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            let mut keys: Vec<_> = self.tags.keys().collect();
            keys.sort();
            f.write_str("@")?;
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    f.write_str(";")?;
                }
                let value = &self.tags[key];
                if value.is_empty() {
                    f.write_str(key)?;
                } else {
                    write!(f, "{key}={}", escape_tag_value(value))?;
                }
            }
            f.write_str(" ")?;
        }
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        // With more than one parameter the last is free text (PRIVMSG, WHISPER).
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            let needs_colon =
                i == last && (last > 0 || param.is_empty() || param.contains(' ') || param.starts_with(':'));
            if needs_colon {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            // A lone trailing backslash is dropped.
            None => {}
        }
    }
    out
}

fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ping_without_prefix() {
        let msg = Message::parse("PING :tmi.twitch.tv\r\n").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["tmi.twitch.tv"]);
        assert_eq!(msg.raw, "PING :tmi.twitch.tv");
    }

    #[test]
    fn parse_privmsg_with_tags_and_prefix() {
        let line = "@badges=moderator/1;display-name=Ronni;mod=1;system-msg=hello\\sthere\\:x \
                    :ronni!ronni@ronni.tmi.twitch.tv PRIVMSG #dallas :Kappa Keepo Kappa";
        let msg = Message::parse(line).unwrap();
        assert_eq!(msg.tag("display-name"), Some("Ronni"));
        assert_eq!(msg.tag("mod"), Some("1"));
        assert_eq!(msg.tag("system-msg"), Some("hello there;x"));
        assert_eq!(msg.prefix.as_deref(), Some("ronni!ronni@ronni.tmi.twitch.tv"));
        assert_eq!(msg.nick(), Some("ronni"));
        assert_eq!(msg.params, vec!["#dallas", "Kappa Keepo Kappa"]);
    }

    #[test]
    fn parse_tag_without_value() {
        let msg = Message::parse("@emote-only;slow=0 :tmi.twitch.tv ROOMSTATE #a").unwrap();
        assert_eq!(msg.tag("emote-only"), Some(""));
        assert_eq!(msg.tag("slow"), Some("0"));
    }

    #[test]
    fn parse_numeric_and_middle_params() {
        let msg = Message::parse(":tmi.twitch.tv 353 justinfan1 = #a :alice bob").unwrap();
        assert_eq!(msg.command, "353");
        assert_eq!(msg.params, vec!["justinfan1", "=", "#a", "alice bob"]);
    }

    #[test]
    fn parse_lowercase_command_is_normalised() {
        let msg = Message::parse(":jtv mode #a +o bob").unwrap();
        assert_eq!(msg.command, "MODE");
        assert_eq!(msg.params, vec!["#a", "+o", "bob"]);
    }

    #[test]
    fn parse_failures() {
        assert_eq!(Message::parse(""), Err(ParseError::Empty));
        assert_eq!(Message::parse("\r\n"), Err(ParseError::Empty));
        assert_eq!(Message::parse("@a=b"), Err(ParseError::UnterminatedTags));
        assert_eq!(Message::parse(":prefix-only"), Err(ParseError::UnterminatedPrefix));
        assert_eq!(Message::parse("@a=b  "), Err(ParseError::MissingCommand));
    }

    #[test]
    fn unescape_drops_trailing_backslash() {
        assert_eq!(unescape_tag_value("abc\\"), "abc");
        assert_eq!(unescape_tag_value("a\\\\b"), "a\\b");
    }

    #[test]
    fn display_renders_wire_form() {
        let msg = Message::new("PRIVMSG", vec!["#a".into(), "hello world".into()]);
        assert_eq!(msg.to_string(), "PRIVMSG #a :hello world");

        let mut tagged = Message::new("PRIVMSG", vec!["#a".into(), "hi".into()]);
        tagged.tags.insert("reply-parent-msg-id".into(), "x y".into());
        assert_eq!(tagged.to_string(), "@reply-parent-msg-id=x\\sy PRIVMSG #a :hi");

        assert_eq!(Message::new("JOIN", vec!["#a".into()]).to_string(), "JOIN #a");
    }
}
