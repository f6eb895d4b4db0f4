//! Minimal IRC message parsing for the chat protocol.
//!
//! Handles exactly what the broker consumes: tagged PRIVMSG lines, PING,
//! and connection bookkeeping replies. Message tags carry the badge
//! attributes used for command authorization.

use std::collections::HashMap;

/// One parsed IRC line, borrowing from the input.
#[derive(Debug, PartialEq, Eq)]
pub struct IrcMessage<'a> {
    pub tags: HashMap<&'a str, &'a str>,
    /// Nick portion of the prefix (`:nick!user@host`), if present.
    pub sender: Option<&'a str>,
    pub command: &'a str,
    pub args: Vec<&'a str>,
    /// Trailing parameter after ` :`.
    pub data: Option<&'a str>,
}

impl<'a> IrcMessage<'a> {
    /// Parse a single line (without CRLF). Returns `None` on lines with no
    /// command.
    pub fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut rest = line;

        let mut tags = HashMap::new();
        if let Some(tail) = rest.strip_prefix('@') {
            let (raw_tags, tail) = tail.split_once(' ')?;
            for pair in raw_tags.split(';') {
                match pair.split_once('=') {
                    Some((k, v)) => tags.insert(k, v),
                    None => tags.insert(pair, ""),
                };
            }
            rest = tail;
        }

        let mut sender = None;
        if let Some(tail) = rest.strip_prefix(':') {
            let (prefix, tail) = tail.split_once(' ')?;
            sender = Some(prefix.split('!').next().unwrap_or(prefix));
            rest = tail;
        }

        let (args_part, data) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };
        let mut parts = args_part.split_ascii_whitespace();
        let command = parts.next()?;
        let args: Vec<&str> = parts.collect();

        Some(IrcMessage {
            tags,
            sender,
            command,
            args,
            data,
        })
    }

    fn badges(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.tags
            .get("badges")
            .copied()
            .unwrap_or("")
            .split(',')
            .filter_map(|b| b.split('/').next())
    }

    pub fn is_broadcaster(&self) -> bool {
        self.badges().any(|b| b == "broadcaster")
    }

    pub fn is_moderator(&self) -> bool {
        self.tags.get("mod").copied() == Some("1") || self.badges().any(|b| b == "moderator")
    }

    /// Badge check for `broadcaster-or-mod` commands.
    pub fn is_privileged(&self) -> bool {
        self.is_broadcaster() || self.is_moderator()
    }

    /// Display name from tags, falling back to the prefix nick.
    pub fn display_name(&self) -> Option<&'a str> {
        self.tags
            .get("display-name")
            .copied()
            .filter(|n| !n.is_empty())
            .or(self.sender)
    }
}

/// Split a buffer of newline-delimited IRC traffic into lines; a single
/// WebSocket text frame may carry several.
pub fn lines(buffer: &str) -> impl Iterator<Item = &str> {
    buffer.split("\r\n").filter(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAGGED_PRIVMSG: &str = "@badge-info=;badges=broadcaster/1,subscriber/6;color=#B22222;display-name=StreamerGal;mod=0;room-id=1234;user-id=1234 :streamergal!streamergal@streamergal.tmi.twitch.tv PRIVMSG #streamergal :!death+";

    #[test]
    fn parses_tagged_privmsg() {
        let msg = IrcMessage::parse(TAGGED_PRIVMSG).unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.args, vec!["#streamergal"]);
        assert_eq!(msg.data, Some("!death+"));
        assert_eq!(msg.sender, Some("streamergal"));
        assert_eq!(msg.display_name(), Some("StreamerGal"));
        assert!(msg.is_broadcaster());
        assert!(!msg.is_moderator());
        assert!(msg.is_privileged());
    }

    #[test]
    fn moderator_is_recognized_by_tag_or_badge() {
        let by_tag = IrcMessage::parse(
            "@badges=subscriber/1;mod=1 :helper!h@h.tmi PRIVMSG #chan :!swear+",
        )
        .unwrap();
        assert!(by_tag.is_privileged());

        let by_badge = IrcMessage::parse(
            "@badges=moderator/1;mod=0 :helper!h@h.tmi PRIVMSG #chan :!swear+",
        )
        .unwrap();
        assert!(by_badge.is_privileged());
    }

    #[test]
    fn plain_viewer_is_not_privileged() {
        let msg = IrcMessage::parse(
            "@badges=subscriber/3;mod=0;display-name=Viewer :viewer!v@v.tmi PRIVMSG #chan :!deaths",
        )
        .unwrap();
        assert!(!msg.is_privileged());
        assert_eq!(msg.data, Some("!deaths"));
    }

    #[test]
    fn parses_ping_without_tags_or_prefix() {
        let msg = IrcMessage::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.data, Some("tmi.twitch.tv"));
        assert!(msg.sender.is_none());
    }

    #[test]
    fn splits_multi_line_frames() {
        let buffer = "PING :a\r\n:x!x@x PRIVMSG #c :hello\r\n";
        let parsed: Vec<&str> = lines(buffer).collect();
        assert_eq!(parsed.len(), 2);
    }
}
