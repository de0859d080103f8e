//! Shared text equivalence for every textual comparison in the resolver.
//!
//! County names, dataset aliases and user input are all compared through
//! [`normalize`]: two strings match if and only if their normalized forms
//! are equal.

use regex::Regex;
use std::sync::LazyLock;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Z0-9\s]+").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Uppercase, turn punctuation runs into spaces, collapse whitespace, trim.
pub fn normalize(text: &str) -> String {
    let upper = text.trim().to_uppercase();
    let spaced = NON_ALNUM.replace_all(&upper, " ");
    WHITESPACE.replace_all(&spaced, " ").trim().to_string()
}

/// Classified form of raw user input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationInput<'a> {
    Zip(&'a str),
    Text(&'a str),
}

/// Exactly five ASCII digits is a ZIP lookup; anything else is text.
pub fn classify(raw: &str) -> LocationInput<'_> {
    let trimmed = raw.trim();
    if is_zip(trimmed) {
        LocationInput::Zip(trimmed)
    } else {
        LocationInput::Text(trimmed)
    }
}

pub fn is_zip(text: &str) -> bool {
    text.len() == 5 && text.bytes().all(|b| b.is_ascii_digit())
}
