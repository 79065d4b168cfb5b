//! Chooses between the LLM path and the rule-based fast path.
//!
//! Rules are evaluated in a fixed order and the first match wins. The
//! function is pure: the same record and profile always give the same
//! decision. Skip-rate counting happens in the caller.

use tender_adapters::SourceProfile;
use tender_core::{DecisionReason, NormalizationDecision, RawTenderRecord};

use crate::english::{declares_english, is_strong_english};
use crate::rules::{
    DEADLINE_FIELDS, DESCRIPTION_FIELDS, LANGUAGE_FIELDS, PUBLICATION_FIELDS, STATUS_FIELDS,
    TITLE_FIELDS,
};

/// Canonical fields checked verbatim by the completeness rule.
pub const CRITICAL_FIELDS: [&str; 7] = [
    "title",
    "description",
    "publication_date",
    "deadline_date",
    "status",
    "tender_type",
    "estimated_value",
];

/// Size thresholds, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionConfig {
    /// Highest number of missing critical fields still counted as nearly complete.
    pub max_missing_critical: usize,
    pub low_info_description_chars: usize,
    pub low_info_title_chars: usize,
    pub max_description_chars: usize,
    pub quality_title_chars: usize,
    pub quality_description_chars: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            max_missing_critical: 2,
            low_info_description_chars: 50,
            low_info_title_chars: 80,
            max_description_chars: 15_000,
            quality_title_chars: 10,
            quality_description_chars: 100,
        }
    }
}

pub fn decide(
    raw: &RawTenderRecord,
    profile: &SourceProfile,
    config: &DecisionConfig,
) -> NormalizationDecision {
    if profile.fast_path {
        return NormalizationDecision::skip_llm(DecisionReason::SourceFastPath);
    }

    let declared_english = raw
        .first_text(LANGUAGE_FIELDS)
        .is_some_and(|code| declares_english(&code));
    if declared_english && profile.majority_language_is("en") {
        return NormalizationDecision::skip_llm(DecisionReason::DeclaredSourceLanguage);
    }

    let missing = missing_critical(raw);
    if missing <= config.max_missing_critical {
        return NormalizationDecision::skip_llm(DecisionReason::NearlyComplete { missing });
    }

    let title = raw.first_text(TITLE_FIELDS).unwrap_or_default();
    let description = raw.first_text(DESCRIPTION_FIELDS).unwrap_or_default();
    if declared_english || is_strong_english(&format!("{title} {description}")) {
        return NormalizationDecision::skip_llm(DecisionReason::StrongEnglish);
    }

    let title_len = title.chars().count();
    let description_len = description.chars().count();
    if description_len < config.low_info_description_chars
        && title_len < config.low_info_title_chars
    {
        return NormalizationDecision::skip_llm(DecisionReason::LowInformation);
    }
    if description_len > config.max_description_chars {
        return NormalizationDecision::skip_llm(DecisionReason::Oversized);
    }

    let has_date = raw.first_value(PUBLICATION_FIELDS).is_some()
        || raw.first_value(DEADLINE_FIELDS).is_some();
    let has_status = raw.first_text(STATUS_FIELDS).is_some();
    if title_len > config.quality_title_chars
        && description_len > config.quality_description_chars
        && has_date
        && has_status
    {
        return NormalizationDecision::skip_llm(DecisionReason::AlreadyNormalized);
    }

    NormalizationDecision::require_llm()
}

/// Critical fields absent under their canonical names.
pub fn missing_critical(raw: &RawTenderRecord) -> usize {
    CRITICAL_FIELDS
        .iter()
        .filter(|field| !raw.has_value(field))
        .count()
}
