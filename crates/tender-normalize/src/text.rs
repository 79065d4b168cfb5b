//! Small text helpers shared by the rule path, the enhancer and the decision engine.

use std::sync::OnceLock;

use regex::Regex;
use scraper::Html;

fn tag_re() -> &'static Regex {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    TAG_RE.get_or_init(|| {
        Regex::new(r"</?[a-zA-Z][a-zA-Z0-9]*(?:\s[^<>]*)?/?>|&[a-z]+;|&#\d+;")
            .expect("valid html tag regex")
    })
}

pub fn looks_like_html(text: &str) -> bool {
    tag_re().is_match(text)
}

/// Collapses runs of whitespace into single spaces and trims.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Renders an HTML fragment as plain text. Non-HTML input is only whitespace-collapsed.
pub fn html_to_text(input: &str) -> String {
    if !looks_like_html(input) {
        return collapse_whitespace(input);
    }
    let fragment = Html::parse_fragment(input);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&text)
}

pub fn non_empty(text: impl AsRef<str>) -> Option<String> {
    let trimmed = text.as_ref().trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Alphabetic word tokens, apostrophes kept inside words.
pub fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphabetic() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
}

/// Truncates on a char boundary, at most `max` bytes.
pub fn truncate_on_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let cut = (0..=max).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
    &text[..cut]
}

/// True when every cased character is uppercase and there are at least a few letters.
pub fn is_all_caps(text: &str) -> bool {
    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    letters >= 4 && !text.chars().any(|c| c.is_lowercase())
}
