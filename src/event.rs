//! Raw host events and their classification into [`ChatEvent`]s.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Timestamp;

/// An event as delivered by the chat host: a name plus ordered string fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub name: String,
    pub fields: Vec<String>,
    pub time: Timestamp,
}

impl RawEvent {
    pub fn new<N, I, S>(name: N, fields: I, time: Timestamp) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            time,
        }
    }

    fn field(&self, index: usize) -> Option<&str> {
        self.fields
            .get(index)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Message {
        actor: String,
        host: String,
        text: String,
        time: Timestamp,
    },
    Connect {
        actor: String,
        time: Timestamp,
    },
    Disconnect {
        actor: String,
        time: Timestamp,
    },
    Away {
        actor: String,
        time: Timestamp,
    },
    Back {
        actor: String,
        time: Timestamp,
    },
}

impl ChatEvent {
    pub fn message(
        actor: impl Into<String>,
        host: impl Into<String>,
        text: impl Into<String>,
        time: Timestamp,
    ) -> Self {
        ChatEvent::Message {
            actor: actor.into(),
            host: host.into(),
            text: text.into(),
            time,
        }
    }

    pub fn actor(&self) -> &str {
        match self {
            ChatEvent::Message { actor, .. }
            | ChatEvent::Connect { actor, .. }
            | ChatEvent::Disconnect { actor, .. }
            | ChatEvent::Away { actor, .. }
            | ChatEvent::Back { actor, .. } => actor,
        }
    }

    pub fn time(&self) -> Timestamp {
        match self {
            ChatEvent::Message { time, .. }
            | ChatEvent::Connect { time, .. }
            | ChatEvent::Disconnect { time, .. }
            | ChatEvent::Away { time, .. }
            | ChatEvent::Back { time, .. } => *time,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ChatEvent::Message { .. } => EventKind::Message,
            ChatEvent::Connect { .. } => EventKind::Connect,
            ChatEvent::Disconnect { .. } => EventKind::Disconnect,
            ChatEvent::Away { .. } => EventKind::Away,
            ChatEvent::Back { .. } => EventKind::Back,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Connect,
    Disconnect,
    Away,
    Back,
}

impl EventKind {
    /// Resolves short names and host print-event names, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.trim().to_ascii_lowercase().as_str() {
            "message" | "msg" | "channel message" | "private message" | "channel msg hilight"
            | "private message to dialog" => EventKind::Message,
            "connect" | "join" | "connected" => EventKind::Connect,
            "disconnect" | "part" | "quit" | "disconnected" => EventKind::Disconnect,
            "away" | "you were away" | "you are away" => EventKind::Away,
            "back" | "you are back" => EventKind::Back,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Away => "away",
            EventKind::Back => "back",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a raw host event onto a [`ChatEvent`].
///
/// Unknown event names yield `None` without logging; malformed events (missing actor,
/// or a message without host or text) yield `None` with a warning.
pub fn classify(raw: &RawEvent) -> Option<ChatEvent> {
    let Some(kind) = EventKind::from_name(&raw.name) else {
        debug!(name = %raw.name, "ignoring unknown event");
        return None;
    };
    let Some(actor) = raw.field(0) else {
        warn!(kind = %kind, fields = raw.fields.len(), "dropping event without actor");
        return None;
    };
    let actor = actor.trim().to_string();
    let time = raw.time;
    let event = match kind {
        EventKind::Message => {
            let (Some(host), Some(text)) = (raw.field(1), raw.field(2)) else {
                warn!(%actor, fields = raw.fields.len(), "dropping message without host or text");
                return None;
            };
            ChatEvent::Message {
                actor,
                host: host.trim().to_string(),
                text: text.to_string(),
                time,
            }
        }
        EventKind::Connect => ChatEvent::Connect { actor, time },
        EventKind::Disconnect => ChatEvent::Disconnect { actor, time },
        EventKind::Away => ChatEvent::Away { actor, time },
        EventKind::Back => ChatEvent::Back { actor, time },
    };
    Some(event)
}

/// On-demand commands issued through the host's command interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Private report of per-user scores, one per line.
    ShowScores,
    /// The same scores broadcast to the channel, comma-joined.
    ShowScoresChat,
    /// Private report of each user's share of total message volume.
    ShowUs,
    /// Private engagement report (counts, away time, aliases).
    Metrics,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ShowScores => "SHOWSCORES",
            Command::ShowScoresChat => "SHOWSCORESCHAT",
            Command::ShowUs => "SHOWUS",
            Command::Metrics => "METRICS",
        }
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let name = value.trim().trim_start_matches('/');
        let name = name.split_whitespace().next().unwrap_or_default();
        match name.to_ascii_uppercase().as_str() {
            "SHOWSCORES" => Ok(Command::ShowScores),
            "SHOWSCORESCHAT" => Ok(Command::ShowScoresChat),
            "SHOWUS" => Ok(Command::ShowUs),
            "METRICS" => Ok(Command::Metrics),
            _ => Err(format!("unknown command {value:?}")),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
