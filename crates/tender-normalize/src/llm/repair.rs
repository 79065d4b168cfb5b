//! Recovery of JSON objects from raw completion text.
//!
//! Stages run in a fixed order; the first that yields a non-empty object wins:
//! fenced block, direct parse, fence stripping, brace balancing, then per-field
//! regular expressions.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tender_core::CANONICAL_FIELDS;

use crate::error::ParseFailure;

pub type JsonObject = Map<String, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStage {
    FencedBlock,
    Direct,
    StrippedFences,
    BalancedBraces,
    FieldRegex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    pub fields: JsonObject,
    pub stage: RecoveryStage,
}

pub fn recover_object(text: &str) -> Result<Recovered, ParseFailure> {
    let stages: [(RecoveryStage, fn(&str) -> Option<JsonObject>); 5] = [
        (RecoveryStage::FencedBlock, parse_fenced_block),
        (RecoveryStage::Direct, parse_direct),
        (RecoveryStage::StrippedFences, parse_stripped_fences),
        (RecoveryStage::BalancedBraces, parse_balanced),
        (RecoveryStage::FieldRegex, extract_known_fields),
    ];
    stages
        .into_iter()
        .find_map(|(stage, parse)| parse(text).map(|fields| Recovered { fields, stage }))
        .ok_or(ParseFailure { len: text.len() })
}

fn fenced_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z]*\s*(\{.*?\})\s*```").expect("valid fenced block regex")
    })
}

fn field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let names = CANONICAL_FIELDS.join("|");
        Regex::new(&format!(
            r#""({names})"\s*:\s*("(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?|true|false|null)"#
        ))
        .expect("valid field regex")
    })
}

fn non_empty_object(text: &str) -> Option<JsonObject> {
    match serde_json::from_str::<JsonValue>(text).ok()? {
        JsonValue::Object(map) if !map.is_empty() => Some(map),
        _ => None,
    }
}

pub fn parse_fenced_block(text: &str) -> Option<JsonObject> {
    fenced_re()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| non_empty_object(m.as_str()))
}

pub fn parse_direct(text: &str) -> Option<JsonObject> {
    non_empty_object(text.trim())
}

fn strip_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    }
    body = body.trim();
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

/// Drops code-fence wrapping and any prose around the outermost braces.
pub fn parse_stripped_fences(text: &str) -> Option<JsonObject> {
    let body = strip_fences(text);
    if let Some(found) = non_empty_object(body) {
        return Some(found);
    }
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start)
        .then(|| non_empty_object(&body[start..=end]))
        .flatten()
}

#[derive(Debug, Default)]
struct Scan {
    /// Open `{`/`[` at the end of the text.
    stack: Vec<char>,
    in_string: bool,
    /// Byte offsets of top-level commas inside an object, with the stack at that point.
    boundaries: Vec<(usize, Vec<char>)>,
}

fn scan(text: &str) -> Scan {
    let mut scan = Scan::default();
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if scan.in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => scan.in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => scan.in_string = true,
            '{' | '[' => scan.stack.push(c),
            '}' | ']' => {
                scan.stack.pop();
            }
            ',' if scan.stack.last() == Some(&'{') => {
                scan.boundaries.push((i, scan.stack.clone()));
            }
            _ => {}
        }
    }
    scan
}

fn closers(stack: &[char]) -> String {
    stack
        .iter()
        .rev()
        .map(|open| if *open == '{' { '}' } else { ']' })
        .collect()
}

/// Treats text opening with `{` as a truncated object: closes what is open,
/// then retries at each earlier property boundary.
pub fn parse_balanced(text: &str) -> Option<JsonObject> {
    let body = strip_fences(text);
    if !body.starts_with('{') {
        return None;
    }
    let scanned = scan(body);

    let mut whole = body.to_string();
    if scanned.in_string {
        whole.push('"');
    }
    whole.push_str(&closers(&scanned.stack));
    if let Some(found) = non_empty_object(&whole) {
        return Some(found);
    }

    scanned.boundaries.iter().rev().find_map(|(offset, stack)| {
        let mut candidate = body[..*offset].to_string();
        candidate.push_str(&closers(stack));
        non_empty_object(&candidate)
    })
}

/// Pulls individual scalar values of known fields out of otherwise unusable text.
pub fn extract_known_fields(text: &str) -> Option<JsonObject> {
    let mut fields = JsonObject::new();
    for caps in field_re().captures_iter(text) {
        let (Some(name), Some(raw_value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if fields.contains_key(name.as_str()) {
            continue;
        }
        match serde_json::from_str::<JsonValue>(raw_value.as_str()) {
            Ok(JsonValue::Null) | Err(_) => {}
            Ok(value) => {
                fields.insert(name.as_str().to_string(), value);
            }
        }
    }
    (!fields.is_empty()).then_some(fields)
}
