//! Permissive calendar-date parsing.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;
use tender_core::parse_timestamp;

use crate::error::FieldWarning;

/// Explicit day-first and year-first layouts tried after the native formats.
const EXPLICIT_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d", "%Y-%m-%d", "%d.%m.%Y"];

const LONG_FORMATS: &[&str] = &["%d %B %Y", "%d %b %Y", "%B %d, %Y", "%b %d, %Y", "%B %d %Y"];

/// Parses a date string into a calendar date. `None` when nothing matches.
pub fn parse_date_str(input: &str) -> Option<NaiveDate> {
    let text = input.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.date_naive());
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(text) {
        return Some(ts.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.date());
        }
    }
    if let Some(date) = parse_explicit(text) {
        return Some(date);
    }
    // "30/11/2026 17:00 GMT" and similar: retry on the first token.
    let first = text.split_whitespace().next()?;
    if first.len() < text.len() {
        if let Some(date) = parse_explicit(first.trim_end_matches([',', 'T'])) {
            return Some(date);
        }
        let head = first.split('T').next().unwrap_or(first);
        if let Some(date) = parse_explicit(head) {
            return Some(date);
        }
    }
    None
}

fn parse_explicit(text: &str) -> Option<NaiveDate> {
    EXPLICIT_FORMATS
        .iter()
        .chain(LONG_FORMATS)
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

/// Parses a raw JSON date value, reporting anything present but unusable.
pub fn parse_date_value(field: &'static str, value: &JsonValue) -> Result<Option<NaiveDate>, FieldWarning> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) if s.trim().is_empty() => Ok(None),
        JsonValue::String(s) => parse_date_str(s)
            .map(Some)
            .ok_or_else(|| FieldWarning::new(field, s.as_str(), "unrecognized date format")),
        JsonValue::Number(_) => parse_timestamp(value)
            .map(|ts| Some(ts.date_naive()))
            .ok_or_else(|| FieldWarning::new(field, value.to_string(), "epoch out of range")),
        other => Err(FieldWarning::new(field, other.to_string(), "unsupported value shape")),
    }
}
