//! Allow-list cleaning for usernames and emails.
//!
//! Runs before an identifier is persisted and again before a stored
//! identifier is echoed back in a response. Markup removal is a plain
//! `<...>` strip, not an HTML parser: unbalanced or nested angle brackets
//! are only neutralized because `<` and `>` never pass the allow-list.
//!
//! Hyphens are allowed in both modes, so `--` survives cleaning. Storage
//! must keep using bound parameters.

use once_cell::sync::Lazy;
use regex::Regex;

static MARKUP_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<.*?>").expect("markup tag pattern must compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SanitizeMode {
    #[default]
    Username,
    Email,
}

impl SanitizeMode {
    pub fn allows(self, ch: char) -> bool {
        match self {
            SanitizeMode::Username => ch.is_ascii_alphanumeric() || ch == '_' || ch == '-',
            SanitizeMode::Email => {
                ch.is_ascii_alphanumeric() || matches!(ch, '@' | '.' | '_' | '-')
            }
        }
    }
}

pub fn sanitize_identifier(input: &str, mode: SanitizeMode) -> String {
    if input.trim().is_empty() {
        return String::new();
    }

    let without_markup = MARKUP_TAG.replace_all(input, "");
    let mut cleaned = String::with_capacity(without_markup.len());
    for ch in without_markup.chars() {
        if mode.allows(ch) {
            cleaned.push(ch);
        }
    }
    cleaned
}
