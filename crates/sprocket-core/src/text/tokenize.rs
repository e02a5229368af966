//! Space-separated tokens with double-quote grouping.
//!
//! ```text
//! karma "alice smith"++ -> error: quote must end a token
//! weather "New York"    -> ["weather", "New York"]
//! say "he said ""hi"""  -> ["say", "he said \"hi\""]
//! ```

use thiserror::Error;

/// A malformed quoted token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenizeError {
    /// A quoted token has no closing quote.
    #[error("unterminated quote starting at byte {start}")]
    Unterminated { start: usize },

    /// A closing quote is followed by something other than a space.
    #[error("closing quote at byte {offset} must be followed by a space")]
    TrailingGarbage { offset: usize },
}

/// Splits `input` on spaces. A token that begins with `"` extends to the
/// next lone `"`; a doubled `""` inside it stands for one literal quote.
pub fn tokenize(input: &str) -> Result<Vec<String>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    loop {
        while chars.next_if(|&(_, c)| c == ' ').is_some() {}
        let Some(&(start, first)) = chars.peek() else {
            return Ok(tokens);
        };

        if first != '"' {
            let mut token = String::new();
            while let Some((_, c)) = chars.next_if(|&(_, c)| c != ' ') {
                token.push(c);
            }
            tokens.push(token);
            continue;
        }

        chars.next();
        let mut token = String::new();
        loop {
            match chars.next() {
                None => return Err(TokenizeError::Unterminated { start }),
                Some((offset, '"')) => match chars.peek() {
                    Some(&(_, '"')) => {
                        chars.next();
                        token.push('"');
                    }
                    None | Some(&(_, ' ')) => break,
                    Some(_) => return Err(TokenizeError::TrailingGarbage { offset }),
                },
                Some((_, c)) => token.push(c),
            }
        }
        tokens.push(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_tokens() {
        assert_eq!(
            tokenize("  weather  paris now ").unwrap(),
            vec!["weather", "paris", "now"]
        );
        assert!(tokenize("   ").unwrap().is_empty());
    }

    #[test]
    fn quoted_tokens() {
        assert_eq!(
            tokenize(r#"weather "New York" today"#).unwrap(),
            vec!["weather", "New York", "today"]
        );
        assert_eq!(
            tokenize(r#"say "he said ""hi""""#).unwrap(),
            vec!["say", r#"he said "hi""#]
        );
        assert_eq!(tokenize(r#""""#).unwrap(), vec![""]);
    }

    #[test]
    fn quotes_inside_plain_tokens_are_literal() {
        assert_eq!(tokenize(r#"it"s fine"#).unwrap(), vec![r#"it"s"#, "fine"]);
    }

    #[test]
    fn malformed_quotes() {
        assert_eq!(
            tokenize(r#"say "never closed"#),
            Err(TokenizeError::Unterminated { start: 4 })
        );
        assert_eq!(
            tokenize(r#"karma "alice smith"++"#),
            Err(TokenizeError::TrailingGarbage { offset: 18 })
        );
    }
}
