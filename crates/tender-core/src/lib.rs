//! Core domain model for unified tender ingestion.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Largest absolute value accepted for a financial field.
pub const MAX_FINANCIAL_MAGNITUDE: f64 = 1e15;

/// Canonical field names a normalizer may fill, in schema order.
/// Identity and provenance metadata are set by the pipeline, not by normalizers.
pub const CANONICAL_FIELDS: &[&str] = &[
    "notice_id",
    "reference_number",
    "title",
    "title_english",
    "description",
    "description_english",
    "organization_name",
    "organization_name_english",
    "buyer",
    "buyer_english",
    "project_name",
    "project_name_english",
    "tender_type",
    "status",
    "sector",
    "procurement_method",
    "publication_date",
    "deadline_date",
    "country",
    "city",
    "estimated_value",
    "currency",
    "contact_name",
    "contact_email",
    "contact_phone",
    "contact_address",
    "url",
    "document_links",
];

/// Source-specific raw record with no fixed schema.
///
/// Wraps the decoded JSON object as-is; nothing in the pipeline mutates it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawTenderRecord {
    fields: Map<String, JsonValue>,
}

impl RawTenderRecord {
    pub fn new(fields: Map<String, JsonValue>) -> Self {
        Self { fields }
    }

    /// Wraps a JSON object. Any other JSON shape is rejected.
    pub fn from_json(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Object(fields) => Some(Self::new(fields)),
            _ => None,
        }
    }

    pub fn fields(&self) -> &Map<String, JsonValue> {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Value stored under `key`, with JSON `null` treated as absent.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    /// Trimmed textual rendering of `key`; numbers and booleans are stringified.
    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(value_as_text)
    }

    /// True when `key` holds something other than null, blank text or an empty container.
    pub fn has_value(&self, key: &str) -> bool {
        self.get(key).is_some_and(is_usable)
    }

    /// First candidate key holding a usable value.
    pub fn first_value(&self, candidates: &[&str]) -> Option<&JsonValue> {
        candidates
            .iter()
            .filter_map(|key| self.get(key))
            .find(|value| is_usable(value))
    }

    /// First candidate key holding usable text.
    pub fn first_text(&self, candidates: &[&str]) -> Option<String> {
        candidates.iter().find_map(|key| self.text(key))
    }
}

/// Renders scalar JSON as trimmed, non-empty text.
pub fn value_as_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parses a freshness marker: RFC 3339, naive date-time, bare date, or epoch
/// seconds/milliseconds.
pub fn parse_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            // Epoch values past year 5138 in seconds are milliseconds.
            if raw.abs() >= 100_000_000_000 {
                DateTime::from_timestamp_millis(raw)
            } else {
                DateTime::from_timestamp(raw, 0)
            }
        }
        JsonValue::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

fn parse_timestamp_str(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%d %H:%M:%S%.f%#z",
        "%Y-%m-%d %H:%M:%S%#z",
    ] {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn is_usable(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::String(s) => !s.trim().is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
        JsonValue::Number(_) | JsonValue::Bool(_) => true,
    }
}

/// Closed set of canonical tender statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TenderStatus {
    Open,
    Closed,
    Awarded,
    Canceled,
}

impl TenderStatus {
    pub const ALL: [TenderStatus; 4] = [
        TenderStatus::Open,
        TenderStatus::Closed,
        TenderStatus::Awarded,
        TenderStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TenderStatus::Open => "Open",
            TenderStatus::Closed => "Closed",
            TenderStatus::Awarded => "Awarded",
            TenderStatus::Canceled => "Canceled",
        }
    }

    /// Matches the canonical spelling only, ignoring case.
    pub fn from_canonical(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for TenderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which normalization path produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NormalizedMethod {
    Llm,
    RuleBasedFast,
    RuleBasedFallback,
}

impl NormalizedMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizedMethod::Llm => "llm",
            NormalizedMethod::RuleBasedFast => "rule-based-fast",
            NormalizedMethod::RuleBasedFallback => "rule-based-fallback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "llm" => Some(NormalizedMethod::Llm),
            "rule-based-fast" => Some(NormalizedMethod::RuleBasedFast),
            "rule-based-fallback" => Some(NormalizedMethod::RuleBasedFallback),
            _ => None,
        }
    }
}

impl fmt::Display for NormalizedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLink {
    pub title: Option<String>,
    pub url: String,
}

/// Canonical tender record persisted to the unified store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedTender {
    pub source_table: Option<String>,
    pub source_id: Option<String>,
    pub notice_id: Option<String>,
    pub reference_number: Option<String>,

    pub title: Option<String>,
    pub title_english: Option<String>,
    pub description: Option<String>,
    pub description_english: Option<String>,
    pub organization_name: Option<String>,
    pub organization_name_english: Option<String>,
    pub buyer: Option<String>,
    pub buyer_english: Option<String>,
    pub project_name: Option<String>,
    pub project_name_english: Option<String>,

    pub tender_type: Option<String>,
    pub status: Option<TenderStatus>,
    pub sector: Option<String>,
    pub procurement_method: Option<String>,

    pub publication_date: Option<NaiveDate>,
    pub deadline_date: Option<NaiveDate>,

    pub country: Option<String>,
    pub city: Option<String>,

    pub estimated_value: Option<f64>,
    pub currency: Option<String>,

    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_address: Option<String>,

    pub url: Option<String>,
    #[serde(default)]
    pub document_links: Vec<DocumentLink>,

    pub normalized_at: Option<DateTime<Utc>>,
    pub normalized_method: Option<NormalizedMethod>,
    pub processing_time_ms: Option<u64>,
    /// Freshness marker of the raw record this tender was built from.
    pub source_updated_at: Option<DateTime<Utc>>,
}

impl NormalizedTender {
    pub fn new(source_table: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            source_table: Some(source_table.into()),
            source_id: Some(source_id.into()),
            ..Default::default()
        }
    }

    /// Compound store key, present only when both halves are set.
    pub fn key(&self) -> Option<(&str, &str)> {
        match (self.source_table.as_deref(), self.source_id.as_deref()) {
            (Some(table), Some(id)) => Some((table, id)),
            _ => None,
        }
    }

    pub fn text_fields_mut(&mut self) -> Vec<&mut Option<String>> {
        vec![
            &mut self.source_table,
            &mut self.source_id,
            &mut self.notice_id,
            &mut self.reference_number,
            &mut self.title,
            &mut self.title_english,
            &mut self.description,
            &mut self.description_english,
            &mut self.organization_name,
            &mut self.organization_name_english,
            &mut self.buyer,
            &mut self.buyer_english,
            &mut self.project_name,
            &mut self.project_name_english,
            &mut self.tender_type,
            &mut self.sector,
            &mut self.procurement_method,
            &mut self.country,
            &mut self.city,
            &mut self.currency,
            &mut self.contact_name,
            &mut self.contact_email,
            &mut self.contact_phone,
            &mut self.contact_address,
            &mut self.url,
        ]
    }

    /// Text slot for a canonical field name. Typed fields (dates, money,
    /// status, links, metadata) are not addressable here.
    pub fn text_field_mut(&mut self, name: &str) -> Option<&mut Option<String>> {
        let slot = match name {
            "notice_id" => &mut self.notice_id,
            "reference_number" => &mut self.reference_number,
            "title" => &mut self.title,
            "title_english" => &mut self.title_english,
            "description" => &mut self.description,
            "description_english" => &mut self.description_english,
            "organization_name" => &mut self.organization_name,
            "organization_name_english" => &mut self.organization_name_english,
            "buyer" => &mut self.buyer,
            "buyer_english" => &mut self.buyer_english,
            "project_name" => &mut self.project_name,
            "project_name_english" => &mut self.project_name_english,
            "tender_type" => &mut self.tender_type,
            "sector" => &mut self.sector,
            "procurement_method" => &mut self.procurement_method,
            "country" => &mut self.country,
            "city" => &mut self.city,
            "currency" => &mut self.currency,
            "contact_name" => &mut self.contact_name,
            "contact_email" => &mut self.contact_email,
            "contact_phone" => &mut self.contact_phone,
            "contact_address" => &mut self.contact_address,
            "url" => &mut self.url,
            _ => return None,
        };
        Some(slot)
    }

    /// Turns blank strings into `None` and drops links without a URL.
    pub fn clear_blank_strings(&mut self) {
        for field in self.text_fields_mut() {
            if field.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *field = None;
            }
        }
        self.document_links.retain(|link| !link.url.trim().is_empty());
        for link in &mut self.document_links {
            if link.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
                link.title = None;
            }
        }
    }

    /// Nulls out financial values the store schema cannot hold.
    pub fn sanitize_financials(&mut self) {
        if let Some(value) = self.estimated_value {
            if !value.is_finite() || value.abs() > MAX_FINANCIAL_MAGNITUDE {
                self.estimated_value = None;
            }
        }
        if let Some(code) = self.currency.as_deref() {
            let code = code.trim().to_ascii_uppercase();
            self.currency = if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
                Some(code)
            } else {
                None
            };
        }
    }

    /// Schema cleanup applied right before a write.
    pub fn prepare_for_write(&mut self) {
        self.clear_blank_strings();
        self.sanitize_financials();
    }

    /// Copies every field of `other` into the slots still empty here.
    pub fn fill_missing_from(&mut self, other: &NormalizedTender) {
        macro_rules! fill {
            ($($field:ident),* $(,)?) => {
                $(
                    if self.$field.is_none() {
                        self.$field = other.$field.clone();
                    }
                )*
            };
        }
        fill!(
            source_table,
            source_id,
            notice_id,
            reference_number,
            title,
            title_english,
            description,
            description_english,
            organization_name,
            organization_name_english,
            buyer,
            buyer_english,
            project_name,
            project_name_english,
            tender_type,
            status,
            sector,
            procurement_method,
            publication_date,
            deadline_date,
            country,
            city,
            estimated_value,
            currency,
            contact_name,
            contact_email,
            contact_phone,
            contact_address,
            url,
            normalized_at,
            normalized_method,
            processing_time_ms,
            source_updated_at,
        );
        if self.document_links.is_empty() {
            self.document_links = other.document_links.clone();
        }
    }

    /// Freshness used when comparing against an incoming raw record.
    pub fn freshness(&self) -> Option<DateTime<Utc>> {
        self.source_updated_at.or(self.normalized_at)
    }
}

/// Why the decision engine picked a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    SourceFastPath,
    DeclaredSourceLanguage,
    NearlyComplete { missing: usize },
    StrongEnglish,
    LowInformation,
    Oversized,
    AlreadyNormalized,
    RequiresLlm,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::SourceFastPath => "source_fast_path",
            DecisionReason::DeclaredSourceLanguage => "declared_source_language",
            DecisionReason::NearlyComplete { .. } => "nearly_complete",
            DecisionReason::StrongEnglish => "strong_english",
            DecisionReason::LowInformation => "low_information",
            DecisionReason::Oversized => "oversized",
            DecisionReason::AlreadyNormalized => "already_normalized",
            DecisionReason::RequiresLlm => "requires_llm",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::NearlyComplete { missing } => {
                write!(f, "nearly_complete ({missing} critical fields missing)")
            }
            other => f.write_str(other.as_str()),
        }
    }
}

/// Per-record routing decision. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationDecision {
    pub use_llm: bool,
    pub reason: DecisionReason,
}

impl NormalizationDecision {
    pub fn skip_llm(reason: DecisionReason) -> Self {
        Self {
            use_llm: false,
            reason,
        }
    }

    pub fn require_llm() -> Self {
        Self {
            use_llm: true,
            reason: DecisionReason::RequiresLlm,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTally {
    pub evaluated: u64,
    pub skipped_llm: u64,
}

/// LLM-skip observability counters, global and per source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionTally {
    pub evaluated: u64,
    pub skipped_llm: u64,
    pub per_source: BTreeMap<String, SourceTally>,
}

impl DecisionTally {
    pub fn record(&mut self, source_table: &str, decision: &NormalizationDecision) {
        let entry = self.per_source.entry(source_table.to_string()).or_default();
        self.evaluated += 1;
        entry.evaluated += 1;
        if !decision.use_llm {
            self.skipped_llm += 1;
            entry.skipped_llm += 1;
        }
    }

    pub fn skip_rate(&self) -> f64 {
        if self.evaluated == 0 {
            0.0
        } else {
            self.skipped_llm as f64 / self.evaluated as f64
        }
    }

    pub fn merge(&mut self, other: &DecisionTally) {
        self.evaluated += other.evaluated;
        self.skipped_llm += other.skipped_llm;
        for (source, tally) in &other.per_source {
            let entry = self.per_source.entry(source.clone()).or_default();
            entry.evaluated += tally.evaluated;
            entry.skipped_llm += tally.skipped_llm;
        }
    }
}

/// Result summary of one ingestion batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub processed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub fallback: usize,
    pub fast_normalization: usize,
    pub llm: usize,
    pub llm_disabled: bool,
    pub decision_tally: DecisionTally,
}

impl IngestStats {
    pub fn merge(&mut self, other: &IngestStats) {
        self.processed += other.processed;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.fallback += other.fallback;
        self.fast_normalization += other.fast_normalization;
        self.llm += other.llm;
        self.llm_disabled |= other.llm_disabled;
        self.decision_tally.merge(&other.decision_tally);
    }
}
