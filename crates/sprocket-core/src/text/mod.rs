//! Small text services plugins use to parse commands and build replies.

pub mod format;
pub mod tokenize;

pub use format::{FormatError, Formatter, format, format_into, format_map, format_pairs};
pub use tokenize::{TokenizeError, tokenize};
