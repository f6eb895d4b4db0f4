//! Chat command vocabulary.
//!
//! Parsing is pure; execution happens in the dispatcher so chat, HTTP and
//! the subscriber protocol share one mutation path.

use ov_protocol::CounterKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// `!death+` / `!d-` style counter adjustment.
    Adjust { kind: CounterKind, delta: i8 },
    ResetCounters,
    SaveSeries { name: String },
    LoadSeries { series_id: String },
    ListSeries,
    DeleteSeries { series_id: String },
    /// Public single-counter read (`!deaths`, `!swears`).
    ReadCounter(CounterKind),
    /// Public `!bits`.
    ReadBits,
    /// Public `!stats`.
    Stats,
    /// Public `!streamstats`.
    StreamStats,
}

impl ChatCommand {
    /// Commands tagged broadcaster-or-mod; everyone else is silently
    /// ignored when issuing these.
    pub fn requires_privilege(&self) -> bool {
        !matches!(
            self,
            ChatCommand::ReadCounter(_)
                | ChatCommand::ReadBits
                | ChatCommand::Stats
                | ChatCommand::StreamStats
        )
    }
}

/// Parse a chat line into a command. Lines that are not commands (or carry
/// unknown command words) return `None` and are ignored.
pub fn parse(text: &str) -> Option<ChatCommand> {
    let text = text.trim();
    let mut parts = text.split_ascii_whitespace();
    let word = parts.next()?;

    let cmd = match word {
        "!death+" | "!d+" => ChatCommand::Adjust {
            kind: CounterKind::Deaths,
            delta: 1,
        },
        "!death-" | "!d-" => ChatCommand::Adjust {
            kind: CounterKind::Deaths,
            delta: -1,
        },
        "!swear+" | "!s+" => ChatCommand::Adjust {
            kind: CounterKind::Swears,
            delta: 1,
        },
        "!swear-" | "!s-" => ChatCommand::Adjust {
            kind: CounterKind::Swears,
            delta: -1,
        },
        "!scream+" | "!sc+" => ChatCommand::Adjust {
            kind: CounterKind::Screams,
            delta: 1,
        },
        "!scream-" | "!sc-" => ChatCommand::Adjust {
            kind: CounterKind::Screams,
            delta: -1,
        },
        "!resetcounters" => ChatCommand::ResetCounters,
        "!saveseries" => {
            let name = parts.collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                return None;
            }
            ChatCommand::SaveSeries { name }
        }
        "!loadseries" => ChatCommand::LoadSeries {
            series_id: parts.next()?.to_owned(),
        },
        "!listseries" => ChatCommand::ListSeries,
        "!deleteseries" => ChatCommand::DeleteSeries {
            series_id: parts.next()?.to_owned(),
        },
        "!deaths" => ChatCommand::ReadCounter(CounterKind::Deaths),
        "!swears" => ChatCommand::ReadCounter(CounterKind::Swears),
        "!screams" => ChatCommand::ReadCounter(CounterKind::Screams),
        "!bits" => ChatCommand::ReadBits,
        "!stats" => ChatCommand::Stats,
        "!streamstats" => ChatCommand::StreamStats,
        _ => return None,
    };
    Some(cmd)
}
