//! Detects messages directed at the bot.
//!
//! A message is addressed when it starts or ends with the bot's name (or one
//! of its aliases), compared case-insensitively and separated from the rest
//! of the text by whitespace or punctuation:
//!
//! ```text
//! "sprocket: karma alice++"  -> "karma alice++"
//! "karma alice++, sprocket"  -> "karma alice++"
//! "sprockets are neat"       -> not addressed
//! ```

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c.is_ascii_punctuation()
}

/// The bot's name and aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addressing {
    name: String,
    aliases: Vec<String>,
}

impl Addressing {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
        }
    }

    /// Adds an alias. Duplicates and empty strings are ignored.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.add_alias(alias);
        self
    }

    /// Adds an alias in place. Returns `false` if it was already known.
    pub fn add_alias(&mut self, alias: impl Into<String>) -> bool {
        let alias = alias.into();
        if alias.is_empty() || self.candidates().any(|c| c.eq_ignore_ascii_case(&alias)) {
            return false;
        }
        self.aliases.push(alias);
        true
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Replaces the bot's name, returning the previous one.
    pub fn set_name(&mut self, name: impl Into<String>) -> String {
        std::mem::replace(&mut self.name, name.into())
    }

    fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .filter(|c| !c.is_empty())
    }

    /// Returns the message with the address token removed, or `None` if the
    /// message is not addressed to the bot.
    pub fn strip<'a>(&self, message: &'a str) -> Option<&'a str> {
        let message = message.trim();
        self.candidates().find_map(|name| {
            strip_leading(message, name).or_else(|| strip_trailing(message, name))
        })
    }

    /// Returns the text handlers should see for a message, and whether it
    /// counts as addressed. Private messages are always addressed.
    pub fn resolve<'a>(&self, message: &'a str, is_private: bool) -> Option<&'a str> {
        match self.strip(message) {
            Some(trimmed) => Some(trimmed),
            None if is_private => Some(message.trim()),
            None => None,
        }
    }
}

fn strip_leading<'a>(message: &'a str, name: &str) -> Option<&'a str> {
    let head = message.get(..name.len())?;
    if !head.eq_ignore_ascii_case(name) {
        return None;
    }
    let rest = &message[name.len()..];
    match rest.chars().next() {
        None => Some(""),
        Some(c) if is_separator(c) => Some(rest.trim_start_matches(is_separator).trim_end()),
        Some(_) => None,
    }
}

fn strip_trailing<'a>(message: &'a str, name: &str) -> Option<&'a str> {
    let body = message.trim_end_matches(is_separator);
    let split = body.len().checked_sub(name.len())?;
    let tail = body.get(split..)?;
    if split == 0 || !tail.eq_ignore_ascii_case(name) {
        return None;
    }
    let rest = &body[..split];
    match rest.chars().next_back() {
        Some(c) if is_separator(c) => Some(rest.trim_end_matches(is_separator).trim_start()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot() -> Addressing {
        Addressing::new("sprocket").with_alias("sp")
    }

    #[test]
    fn leading_name_with_punctuation() {
        let bot = bot();
        assert_eq!(bot.strip("sprocket: karma alice++"), Some("karma alice++"));
        assert_eq!(bot.strip("Sprocket, hello"), Some("hello"));
        assert_eq!(bot.strip("sprocket   spaced"), Some("spaced"));
        assert_eq!(bot.strip("sprocket"), Some(""));
    }

    #[test]
    fn trailing_name() {
        let bot = bot();
        assert_eq!(bot.strip("hello there, sprocket!"), Some("hello there"));
        assert_eq!(bot.strip("thanks sp"), Some("thanks"));
    }

    #[test]
    fn name_must_be_a_whole_word() {
        let bot = bot();
        assert_eq!(bot.strip("sprockets are neat"), None);
        assert_eq!(bot.strip("I like mysprocket"), None);
        assert_eq!(bot.strip("spam is tasty"), None);
    }

    #[test]
    fn aliases_can_be_added_once() {
        let mut bot = Addressing::new("sprocket");
        assert!(bot.add_alias("sp"));
        assert!(!bot.add_alias("SP"));
        assert!(!bot.add_alias(""));
        assert_eq!(bot.aliases(), ["sp".to_string()]);
    }

    #[test]
    fn private_messages_are_always_addressed() {
        let bot = bot();
        assert_eq!(bot.resolve("  weather paris ", true), Some("weather paris"));
        assert_eq!(bot.resolve("weather paris", false), None);
        assert_eq!(bot.resolve("sp: weather paris", true), Some("weather paris"));
    }

    #[test]
    fn rename_changes_matching() {
        let mut bot = Addressing::new("sprocket");
        assert_eq!(bot.set_name("cog"), "sprocket");
        assert_eq!(bot.strip("cog: hi"), Some("hi"));
        assert_eq!(bot.strip("sprocket: hi"), None);
    }
}
