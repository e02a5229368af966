//! `{name}` template expansion.
//!
//! Text outside braces is copied verbatim, `{{` produces a literal `{`, and
//! each `{key}` is handed to a [`Formatter`] which appends its expansion.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// A `{` without a matching `}`.
    #[error("unterminated placeholder at byte {offset}")]
    Unterminated { offset: usize },

    /// The formatter does not know the key.
    #[error("unknown placeholder '{key}'")]
    UnknownKey { key: String },

    /// The formatter rejected the key for another reason.
    #[error("cannot format '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

impl FormatError {
    pub fn unknown(key: impl Into<String>) -> Self {
        Self::UnknownKey { key: key.into() }
    }
}

/// Appends the expansion of one placeholder.
pub trait Formatter {
    fn format(&mut self, key: &str, out: &mut String) -> Result<(), FormatError>;
}

impl<F> Formatter for F
where
    F: FnMut(&str, &mut String) -> Result<(), FormatError>,
{
    fn format(&mut self, key: &str, out: &mut String) -> Result<(), FormatError> {
        self(key, out)
    }
}

/// Expands `template` into `out`, returning the number of placeholders
/// formatted. On error `out` may hold a partial expansion.
pub fn format_into(
    out: &mut String,
    template: &str,
    mut formatter: impl Formatter,
) -> Result<usize, FormatError> {
    let mut count = 0;
    let mut rest = template;
    let mut consumed = 0;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        if let Some(escaped) = after.strip_prefix('{') {
            out.push('{');
            consumed += open + 2;
            rest = escaped;
            continue;
        }
        let close = after.find('}').ok_or(FormatError::Unterminated {
            offset: consumed + open,
        })?;
        formatter.format(&after[..close], out)?;
        count += 1;
        consumed += open + close + 2;
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(count)
}

/// Expands `template` into a new string.
pub fn format(template: &str, formatter: impl Formatter) -> Result<String, FormatError> {
    let mut out = String::with_capacity(template.len());
    format_into(&mut out, template, formatter)?;
    Ok(out)
}

/// Expands `template` from a map of values.
pub fn format_map(template: &str, values: &HashMap<String, String>) -> Result<String, FormatError> {
    format(template, |key: &str, out: &mut String| -> Result<(), FormatError> {
        let value = values.get(key).ok_or_else(|| FormatError::unknown(key))?;
        out.push_str(value);
        Ok(())
    })
}

/// Expands `template` from a list of `(key, value)` pairs.
pub fn format_pairs(template: &str, pairs: &[(&str, &str)]) -> Result<String, FormatError> {
    format(template, |key: &str, out: &mut String| -> Result<(), FormatError> {
        let (_, value) = pairs
            .iter()
            .find(|(k, _)| *k == key)
            .ok_or_else(|| FormatError::unknown(key))?;
        out.push_str(value);
        Ok(())
    })
}
