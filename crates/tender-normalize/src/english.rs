//! English-language likelihood from function-word density.

use crate::text::words;

const ENGLISH_FUNCTION_WORDS: &[&str] = &[
    "the", "and", "of", "to", "for", "in", "a", "an", "is", "are", "be", "been", "with", "on",
    "by", "this", "that", "these", "will", "shall", "from", "as", "at", "or", "which", "all",
    "its", "their", "must", "should", "into", "under", "not", "has", "have", "including",
];

/// Common function words of the other languages seen in tender feeds.
const FOREIGN_FUNCTION_WORDS: &[&str] = &[
    "der", "die", "das", "und", "von", "für", "mit", "le", "la", "les", "des", "et", "du", "pour",
    "avec", "el", "los", "las", "y", "del", "para", "con", "por", "da", "do", "dos", "em", "di",
    "il", "per", "della", "de", "een", "het", "voor", "och", "på",
];

const SHORT_TEXT_WORDS: usize = 40;
const SHORT_TEXT_MIN_HITS: usize = 3;
const LONG_TEXT_MIN_DENSITY: f64 = 0.05;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnglishScore {
    pub words: usize,
    pub hits: usize,
    pub foreign_hits: usize,
}

impl EnglishScore {
    pub fn density(&self) -> f64 {
        if self.words == 0 {
            0.0
        } else {
            self.hits as f64 / self.words as f64
        }
    }

    /// Three hits for short text, five percent density for long text.
    pub fn is_strong(&self) -> bool {
        if self.words < SHORT_TEXT_WORDS {
            self.hits >= SHORT_TEXT_MIN_HITS
        } else {
            self.density() >= LONG_TEXT_MIN_DENSITY
        }
    }
}

pub fn english_score(text: &str) -> EnglishScore {
    let mut score = EnglishScore::default();
    for word in words(text) {
        let lower = word.to_lowercase();
        score.words += 1;
        if ENGLISH_FUNCTION_WORDS.contains(&lower.as_str()) {
            score.hits += 1;
        }
        if FOREIGN_FUNCTION_WORDS.contains(&lower.as_str()) {
            score.foreign_hits += 1;
        }
    }
    score
}

pub fn is_strong_english(text: &str) -> bool {
    english_score(text).is_strong()
}

/// `en`, `eng`, `english`, or a regional tag such as `en-GB`.
pub fn declares_english(code: &str) -> bool {
    let code = code.trim().to_ascii_lowercase();
    code == "en" || code == "eng" || code == "english" || code.starts_with("en-") || code.starts_with("en_")
}

/// Weaker judgement used to mirror a value into its `*_english` slot.
pub fn looks_english(text: &str) -> bool {
    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    if letters == 0 {
        return false;
    }
    let non_ascii = text
        .chars()
        .filter(|c| c.is_alphabetic() && !c.is_ascii())
        .count();
    if non_ascii * 10 > letters {
        return false;
    }
    let score = english_score(text);
    if score.is_strong() {
        return true;
    }
    score.foreign_hits == 0 && (score.hits > 0 || score.words <= 3)
}
