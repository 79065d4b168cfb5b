//! Rule-based normalization, shared by the fast path and the fallback path.
//!
//! Every canonical field is filled from an ordered list of plausible raw keys;
//! the first present, usable value wins. Nothing here performs I/O.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value as JsonValue;
use tender_adapters::SourceProfile;
use tender_core::{
    value_as_text, DocumentLink, NormalizedMethod, NormalizedTender, RawTenderRecord, TenderStatus,
};

use crate::classify::{canonical_name, infer_sector, infer_tender_type, SECTORS, TENDER_TYPES};
use crate::dates::parse_date_value;
use crate::error::FieldWarning;
use crate::money::{parse_money_value, Money};
use crate::text::{html_to_text, non_empty, words};

pub(crate) const TITLE_FIELDS: &[&str] = &[
    "title",
    "opportunity_title",
    "name",
    "project_name",
    "tender_title",
    "subject",
    "notice_title",
];
pub(crate) const DESCRIPTION_FIELDS: &[&str] = &[
    "description",
    "synopsis",
    "summary",
    "details",
    "body",
    "tender_description",
    "notice_text",
    "scope",
];
pub(crate) const PUBLICATION_FIELDS: &[&str] = &[
    "publication_date",
    "published_date",
    "published",
    "posted_date",
    "post_date",
    "publish_date",
    "date_published",
    "issue_date",
];
pub(crate) const DEADLINE_FIELDS: &[&str] = &[
    "deadline_date",
    "deadline",
    "closing_date",
    "close_date",
    "response_deadline",
    "submission_deadline",
    "due_date",
    "bid_deadline",
];
pub(crate) const STATUS_FIELDS: &[&str] = &["status", "state", "tender_status", "opportunity_status"];
pub(crate) const LANGUAGE_FIELDS: &[&str] = &["language", "lang", "language_code"];
/// Raw keys carrying an organization id resolvable through the source profile.
pub(crate) const ORGANIZATION_ID_FIELDS: &[&str] =
    &["organization_id", "org_id", "agency_code", "agency_id"];

const NOTICE_ID_FIELDS: &[&str] = &["notice_id", "notice_number", "publication_number"];
const REFERENCE_FIELDS: &[&str] = &[
    "reference_number",
    "reference",
    "ref_no",
    "solicitation_number",
    "tender_number",
    "opportunity_number",
    "bid_number",
];
const ORGANIZATION_FIELDS: &[&str] = &[
    "organization_name",
    "organization",
    "agency",
    "agency_name",
    "department",
    "issuer",
    "entity",
];
const BUYER_FIELDS: &[&str] = &[
    "buyer",
    "buyer_name",
    "contracting_authority",
    "procuring_entity",
    "purchaser",
    "office",
];
const PROJECT_FIELDS: &[&str] = &["project_name", "project", "project_title"];
const TENDER_TYPE_FIELDS: &[&str] = &["tender_type", "notice_type", "type", "procurement_type"];
const SECTOR_FIELDS: &[&str] = &["sector", "industry"];
const METHOD_FIELDS: &[&str] = &[
    "procurement_method",
    "method",
    "procurement_method_name",
    "solicitation_procedure",
];
const COUNTRY_FIELDS: &[&str] = &[
    "country",
    "country_name",
    "beneficiary_country",
    "place_of_performance_country",
];
const CITY_FIELDS: &[&str] = &["city", "town", "location_city", "place_of_performance_city"];
const VALUE_FIELDS: &[&str] = &[
    "estimated_value",
    "value",
    "amount",
    "budget",
    "contract_value",
    "estimated_amount",
    "award_amount",
    "award_ceiling",
];
const CURRENCY_FIELDS: &[&str] = &["currency", "currency_code"];
const CONTACT_NAME_FIELDS: &[&str] = &["contact_name", "contact_person", "contact"];
const CONTACT_EMAIL_FIELDS: &[&str] = &["contact_email", "email", "email_address"];
const CONTACT_PHONE_FIELDS: &[&str] = &["contact_phone", "phone", "telephone", "phone_number"];
const CONTACT_ADDRESS_FIELDS: &[&str] = &["contact_address", "address"];
const CONTACT_OBJECT_FIELDS: &[&str] = &["point_of_contact", "pointOfContact", "contacts", "contact"];
const URL_FIELDS: &[&str] = &["url", "link", "notice_url", "tender_url", "ui_link", "detail_url"];
const DOCUMENT_FIELDS: &[&str] = &["document_links", "documents", "attachments", "resource_links", "files"];

/// Status keywords, most specific outcome first.
const STATUS_KEYWORDS: &[(&str, TenderStatus)] = &[
    ("canceled", TenderStatus::Canceled),
    ("cancelled", TenderStatus::Canceled),
    ("terminated", TenderStatus::Canceled),
    ("withdrawn", TenderStatus::Canceled),
    ("awarded", TenderStatus::Awarded),
    ("award", TenderStatus::Awarded),
    ("closed", TenderStatus::Closed),
    ("expired", TenderStatus::Closed),
    ("archived", TenderStatus::Closed),
    ("inactive", TenderStatus::Closed),
    ("open", TenderStatus::Open),
    ("active", TenderStatus::Open),
    ("ongoing", TenderStatus::Open),
    ("published", TenderStatus::Open),
    ("posted", TenderStatus::Open),
    ("forecasted", TenderStatus::Open),
];

const SCAN_CHUNK: usize = 4_000;
const SCAN_OVERLAP: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMode {
    /// Chosen up front by the decision engine.
    Fast,
    /// Used after the LLM path failed.
    Fallback,
}

impl RuleMode {
    pub fn method(self) -> NormalizedMethod {
        match self {
            RuleMode::Fast => NormalizedMethod::RuleBasedFast,
            RuleMode::Fallback => NormalizedMethod::RuleBasedFallback,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub tender: NormalizedTender,
    pub warnings: Vec<FieldWarning>,
}

fn email_re() -> &'static Regex {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("valid email regex")
    })
}

fn phone_re() -> &'static Regex {
    static PHONE_RE: OnceLock<Regex> = OnceLock::new();
    PHONE_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:tel|phone|telephone|mobile|mob)\b\.?\s*(?:no\.?|number)?\s*[:.]?\s*(\+?\d[\d\s().\-/]{5,}\d)",
        )
        .expect("valid phone regex")
    })
}

fn reference_re() -> &'static Regex {
    static REFERENCE_RE: OnceLock<Regex> = OnceLock::new();
    REFERENCE_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:ref(?:erence)?|tender|solicitation|bid|rfp|rfq|itb)\s*(?:no|number|nr|#)\.?\s*[:.]?\s*([A-Z0-9][A-Z0-9/_.\-]{2,})",
        )
        .expect("valid reference regex")
    })
}

/// Normalizes one raw record without any network access.
pub fn normalize_without_llm(
    raw: &RawTenderRecord,
    profile: &SourceProfile,
    mode: RuleMode,
    today: NaiveDate,
) -> RuleOutcome {
    let mut warnings = Vec::new();
    let mut tender = NormalizedTender {
        source_table: Some(profile.source_table.clone()),
        ..Default::default()
    };

    tender.title = clean_text(raw, TITLE_FIELDS);
    tender.description = clean_text(raw, DESCRIPTION_FIELDS);
    tender.title_english = clean_text(raw, &["title_english", "title_en"]);
    tender.description_english = clean_text(raw, &["description_english", "description_en"]);
    tender.notice_id = raw.first_text(NOTICE_ID_FIELDS);
    tender.reference_number = raw.first_text(REFERENCE_FIELDS).or_else(|| {
        tender
            .description
            .as_deref()
            .and_then(find_reference)
    });

    tender.organization_name = clean_text(raw, ORGANIZATION_FIELDS).or_else(|| {
        raw.first_text(ORGANIZATION_ID_FIELDS)
            .and_then(|id| profile.organization_name(&id).map(str::to_string))
    });
    tender.organization_name_english =
        clean_text(raw, &["organization_name_english", "organization_name_en"]);
    tender.buyer = clean_text(raw, BUYER_FIELDS);
    tender.buyer_english = clean_text(raw, &["buyer_english", "buyer_en"]);
    tender.project_name = clean_text(raw, PROJECT_FIELDS);
    tender.project_name_english = clean_text(raw, &["project_name_english", "project_name_en"]);
    tender.procurement_method = raw.first_text(METHOD_FIELDS);
    tender.country = raw.first_text(COUNTRY_FIELDS);
    tender.city = raw.first_text(CITY_FIELDS);

    tender.publication_date = first_date(raw, "publication_date", PUBLICATION_FIELDS, &mut warnings);
    tender.deadline_date = first_date(raw, "deadline_date", DEADLINE_FIELDS, &mut warnings);

    let money = first_money(raw, &mut warnings);
    tender.estimated_value = money.amount;
    tender.currency = raw
        .first_text(CURRENCY_FIELDS)
        .map(|c| c.to_ascii_uppercase())
        .or(money.currency);

    tender.status = status_from_raw(raw, profile, &mut warnings)
        .or_else(|| status_from_deadline(tender.deadline_date, today));

    let title = tender.title.as_deref();
    let description = tender.description.as_deref();
    tender.tender_type = raw
        .first_text(TENDER_TYPE_FIELDS)
        .map(|v| canonical_name(TENDER_TYPES, &v).map(str::to_string).unwrap_or(v))
        .or_else(|| infer_tender_type(title, description).map(str::to_string));
    tender.sector = raw
        .first_text(SECTOR_FIELDS)
        .map(|v| canonical_name(SECTORS, &v).map(str::to_string).unwrap_or(v))
        .or_else(|| infer_sector(title, description).map(str::to_string));

    apply_contacts(raw, &mut tender);
    tender.url = raw
        .first_text(URL_FIELDS)
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"));
    tender.document_links = document_links(raw);
    tender.normalized_method = Some(mode.method());

    RuleOutcome { tender, warnings }
}

fn clean_text(raw: &RawTenderRecord, candidates: &[&str]) -> Option<String> {
    raw.first_text(candidates)
        .map(|text| html_to_text(&text))
        .and_then(non_empty)
}

fn first_date(
    raw: &RawTenderRecord,
    field: &'static str,
    candidates: &[&str],
    warnings: &mut Vec<FieldWarning>,
) -> Option<NaiveDate> {
    for key in candidates {
        let Some(value) = raw.get(key) else { continue };
        match parse_date_value(field, value) {
            Ok(Some(date)) => return Some(date),
            Ok(None) => {}
            Err(warning) => warnings.push(warning),
        }
    }
    None
}

fn first_money(raw: &RawTenderRecord, warnings: &mut Vec<FieldWarning>) -> Money {
    for key in VALUE_FIELDS {
        let Some(value) = raw.get(key) else { continue };
        match parse_money_value(value) {
            Ok(money) if money.amount.is_some() => return money,
            Ok(_) => {}
            Err(warning) => warnings.push(warning),
        }
    }
    Money::default()
}

/// Maps a status word to the canonical set: profile aliases, then the
/// canonical spelling, then the keyword table.
pub fn normalize_status(word: &str, profile: Option<&SourceProfile>) -> Option<TenderStatus> {
    let word = word.trim();
    if let Some(status) = profile.and_then(|p| p.status_alias(word)) {
        return Some(status);
    }
    if let Some(status) = TenderStatus::from_canonical(word) {
        return Some(status);
    }
    let lower = word.to_lowercase();
    let tokens: Vec<&str> = words(&lower).collect();
    STATUS_KEYWORDS
        .iter()
        .find(|(keyword, _)| tokens.contains(keyword))
        .map(|(_, status)| *status)
}

/// Open while the deadline has not passed, closed afterwards.
pub fn status_from_deadline(deadline: Option<NaiveDate>, today: NaiveDate) -> Option<TenderStatus> {
    deadline.map(|d| {
        if d >= today {
            TenderStatus::Open
        } else {
            TenderStatus::Closed
        }
    })
}

fn status_from_raw(
    raw: &RawTenderRecord,
    profile: &SourceProfile,
    warnings: &mut Vec<FieldWarning>,
) -> Option<TenderStatus> {
    let word = raw.first_text(STATUS_FIELDS)?;
    let status = normalize_status(&word, Some(profile));
    if status.is_none() {
        warnings.push(FieldWarning::new("status", word, "unknown status word"));
    }
    status
}

fn apply_contacts(raw: &RawTenderRecord, tender: &mut NormalizedTender) {
    tender.contact_name = raw.first_text(CONTACT_NAME_FIELDS);
    tender.contact_email = raw
        .first_text(CONTACT_EMAIL_FIELDS)
        .and_then(|e| email_re().find(&e).map(|m| m.as_str().to_string()));
    tender.contact_phone = raw.first_text(CONTACT_PHONE_FIELDS);
    tender.contact_address = raw.first_text(CONTACT_ADDRESS_FIELDS);

    if let Some(contact) = contact_object(raw) {
        fn pick(contact: &serde_json::Map<String, JsonValue>, keys: &[&str]) -> Option<String> {
            keys.iter().find_map(|k| contact.get(*k).and_then(value_as_text))
        }
        if tender.contact_name.is_none() {
            tender.contact_name = pick(contact, &["fullName", "full_name", "name"]);
        }
        if tender.contact_email.is_none() {
            tender.contact_email = pick(contact, &["email"]);
        }
        if tender.contact_phone.is_none() {
            tender.contact_phone = pick(contact, &["phone", "telephone"]);
        }
    }

    if let Some(description) = tender.description.as_deref() {
        if tender.contact_email.is_none() {
            tender.contact_email =
                scan_chunks(description, |chunk| email_re().find(chunk).map(|m| m.as_str().to_string()));
        }
        if tender.contact_phone.is_none() {
            tender.contact_phone = scan_chunks(description, |chunk| {
                phone_re()
                    .captures(chunk)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().trim().to_string())
            });
        }
    }
}

fn contact_object(raw: &RawTenderRecord) -> Option<&serde_json::Map<String, JsonValue>> {
    CONTACT_OBJECT_FIELDS.iter().find_map(|key| match raw.get(key)? {
        JsonValue::Object(map) => Some(map),
        JsonValue::Array(items) => items.iter().find_map(JsonValue::as_object),
        _ => None,
    })
}

/// Reference-number-like token announced by a label in free text.
///
/// Only tokens containing a digit count: the label pattern is case-insensitive,
/// so an all-letter capture is usually prose (`Reference number: pending`).
/// Values under an explicit reference key are taken verbatim, letters-only
/// codes included.
pub(crate) fn find_reference(text: &str) -> Option<String> {
    scan_chunks(text, |chunk| {
        reference_re()
            .captures_iter(chunk)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim_end_matches(['.', '-', '/']).to_string())
            .find(|candidate| candidate.chars().any(|c| c.is_ascii_digit()))
    })
}

/// Document links from arrays of URLs or `{title|name, url|href|link}` objects, de-duplicated by URL.
pub(crate) fn document_links(raw: &RawTenderRecord) -> Vec<DocumentLink> {
    let Some(JsonValue::Array(items)) = raw.first_value(DOCUMENT_FIELDS) else {
        return Vec::new();
    };
    links_from_items(items)
}

pub(crate) fn links_from_items(items: &[JsonValue]) -> Vec<DocumentLink> {
    let mut out: Vec<DocumentLink> = Vec::new();
    for item in items {
        let link = match item {
            JsonValue::String(url) => non_empty(url).map(|url| DocumentLink { title: None, url }),
            JsonValue::Object(map) => ["url", "href", "link"]
                .iter()
                .find_map(|k| map.get(*k).and_then(value_as_text))
                .map(|url| DocumentLink {
                    title: ["title", "name", "label"]
                        .iter()
                        .find_map(|k| map.get(*k).and_then(value_as_text)),
                    url,
                }),
            _ => None,
        };
        if let Some(link) = link {
            if !out.iter().any(|existing| existing.url == link.url) {
                out.push(link);
            }
        }
    }
    out
}

/// Runs `find` over overlapping windows so pattern work stays bounded on
/// oversized descriptions.
pub(crate) fn scan_chunks<F>(text: &str, mut find: F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    if text.len() <= SCAN_CHUNK {
        return find(text);
    }
    let mut start = 0;
    loop {
        let end = floor_boundary(text, (start + SCAN_CHUNK).min(text.len()));
        if let Some(found) = find(&text[start..end]) {
            return Some(found);
        }
        if end >= text.len() {
            return None;
        }
        start = floor_boundary(text, end - SCAN_OVERLAP);
    }
}

fn floor_boundary(text: &str, index: usize) -> usize {
    (0..=index).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0)
}
