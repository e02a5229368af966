//! Inbound events.
//!
//! An [`Event`] is built once by the router from an [`InboundMessage`] and is
//! never mutated afterwards; every task spawned for it shares the same
//! `Arc<Event>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of an inbound event.
///
/// Handlers are indexed by kind, so a handler only ever sees events of the
/// kind it registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Any message seen in a channel or in private.
    Message,
    /// A message directed at the bot, with the address token removed.
    Addressed,
    /// A user joined a channel.
    Join,
    /// A user left a channel.
    Part,
    /// A user changed their nick.
    Nick,
    /// The bot's own name changed.
    BotName,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 6] = [
        EventKind::Message,
        EventKind::Addressed,
        EventKind::Join,
        EventKind::Part,
        EventKind::Nick,
        EventKind::BotName,
    ];

    /// Returns the canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Addressed => "addressed",
            Self::Join => "join",
            Self::Part => "part",
            Self::Nick => "nick",
            Self::BotName => "bot_name",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown event kind '{s}'"))
    }
}

/// An immutable inbound event.
///
/// For [`EventKind::Join`] and [`EventKind::Part`], `author` is the user and
/// `target` the channel. For [`EventKind::Nick`] and [`EventKind::BotName`],
/// `author` is the old name and `raw_text` the new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    kind: EventKind,
    raw_text: String,
    trimmed_text: String,
    author: String,
    target: String,
    is_private: bool,
    is_action: bool,
}

impl Event {
    /// Creates an event whose trimmed text equals its raw text.
    pub fn new(
        kind: EventKind,
        raw_text: impl Into<String>,
        author: impl Into<String>,
        target: impl Into<String>,
        is_private: bool,
    ) -> Self {
        let raw_text = raw_text.into();
        Self {
            kind,
            trimmed_text: raw_text.clone(),
            raw_text,
            author: author.into(),
            target: target.into(),
            is_private,
            is_action: false,
        }
    }

    /// Creates an [`EventKind::Addressed`] event.
    pub fn addressed(
        raw_text: impl Into<String>,
        trimmed_text: impl Into<String>,
        author: impl Into<String>,
        target: impl Into<String>,
        is_private: bool,
    ) -> Self {
        Self {
            kind: EventKind::Addressed,
            raw_text: raw_text.into(),
            trimmed_text: trimmed_text.into(),
            author: author.into(),
            target: target.into(),
            is_private,
            is_action: false,
        }
    }

    /// Marks the event as a `/me` action.
    pub fn with_action(mut self, is_action: bool) -> Self {
        self.is_action = is_action;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn trimmed_text(&self) -> &str {
        &self.trimmed_text
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_private(&self) -> bool {
        self.is_private
    }

    /// Whether the message was sent as a `/me` action.
    pub fn is_action(&self) -> bool {
        self.is_action
    }

    /// The text handler filters are matched against.
    ///
    /// Addressed events match on the trimmed text so that patterns need not
    /// account for the bot's name.
    pub fn text(&self) -> &str {
        match self.kind {
            EventKind::Addressed => &self.trimmed_text,
            _ => &self.raw_text,
        }
    }

    /// Where a reply to this event should be sent.
    pub fn reply_target(&self) -> &str {
        if self.is_private {
            &self.author
        } else {
            &self.target
        }
    }

    /// A short description used in logs and task labels.
    pub fn summary(&self) -> String {
        format!("{} from {} in {}", self.kind, self.author, self.target)
    }
}

/// The tuple a transport hands to the runtime for every inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub kind: EventKind,
    pub raw_text: String,
    pub author: String,
    pub target: String,
    pub is_private: bool,
    pub is_action: bool,
}

impl InboundMessage {
    /// A channel message.
    pub fn channel(
        author: impl Into<String>,
        channel: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            kind: EventKind::Message,
            raw_text: text.into(),
            author: author.into(),
            target: channel.into(),
            is_private: false,
            is_action: false,
        }
    }

    /// A private message. The reply target is the author.
    pub fn private(author: impl Into<String>, text: impl Into<String>) -> Self {
        let author = author.into();
        Self {
            kind: EventKind::Message,
            raw_text: text.into(),
            target: author.clone(),
            author,
            is_private: true,
            is_action: false,
        }
    }

    /// A membership change (`Join` or `Part`).
    pub fn membership(kind: EventKind, user: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            kind,
            raw_text: String::new(),
            author: user.into(),
            target: channel.into(),
            is_private: false,
            is_action: false,
        }
    }

    /// A nick change from `old` to `new`.
    pub fn nick(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Nick,
            raw_text: new.into(),
            author: old.into(),
            target: String::new(),
            is_private: false,
            is_action: false,
        }
    }

    /// A `/me` action in a channel.
    pub fn action(
        author: impl Into<String>,
        channel: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            is_action: true,
            ..Self::channel(author, channel, text)
        }
    }

    /// Converts the message into an event without addressing.
    pub fn into_event(self) -> Event {
        Event::new(
            self.kind,
            self.raw_text,
            self.author,
            self.target,
            self.is_private,
        )
        .with_action(self.is_action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }
        assert!("kick".parse::<EventKind>().is_err());
    }

    #[test]
    fn addressed_events_match_on_trimmed_text() {
        let event = Event::addressed("cbot: karma alice++", "karma alice++", "bob", "#c", false);
        assert_eq!(event.text(), "karma alice++");
        assert_eq!(event.raw_text(), "cbot: karma alice++");

        let plain = Event::new(EventKind::Message, "hello", "bob", "#c", false);
        assert_eq!(plain.text(), "hello");
        assert_eq!(plain.trimmed_text(), "hello");
    }

    #[test]
    fn private_replies_go_to_author() {
        let event = InboundMessage::private("alice", "hi").into_event();
        assert_eq!(event.reply_target(), "alice");
        assert!(event.is_private());

        let event = InboundMessage::channel("alice", "#rust", "hi").into_event();
        assert_eq!(event.reply_target(), "#rust");
    }

    #[test]
    fn actions_keep_their_flag() {
        let event = InboundMessage::action("alice", "#rust", "waves").into_event();
        assert!(event.is_action());
        assert_eq!(event.text(), "waves");
        assert!(!InboundMessage::channel("alice", "#rust", "waves").into_event().is_action());
    }
}
