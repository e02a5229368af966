//! URL templates with percent-encoded `{name}` placeholders.

use sprocket_core::text::{FormatError, format};

/// Fills each `{name}` in `template` with the percent-encoded value bound to
/// `name`. A placeholder with no binding is an error.
pub fn expand(template: &str, bindings: &[(String, String)]) -> Result<String, FormatError> {
    format(template, |key: &str, out: &mut String| -> Result<(), FormatError> {
        let (_, value) = bindings
            .iter()
            .find(|(name, _)| name == key)
            .ok_or_else(|| FormatError::unknown(key))?;
        out.push_str(&urlencoding::encode(value));
        Ok(())
    })
}
