//! Field enhancement applied after either normalization path.
//!
//! Title cleanup rewrites `title`; every other step only fills empty slots.
//! Applying [`enhance`] to its own output changes nothing.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use tender_adapters::SourceProfile;
use tender_core::{NormalizedTender, RawTenderRecord};

use crate::classify::{infer_sector, infer_tender_type};
use crate::english::looks_english;
use crate::rules::{status_from_deadline, ORGANIZATION_ID_FIELDS};
use crate::text::{collapse_whitespace, is_all_caps, non_empty};

const MINOR_WORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "but", "by", "for", "from", "in", "into", "nor", "of", "on",
    "or", "per", "the", "to", "via", "with",
];

/// Tokens that are always written in capitals.
const ALWAYS_UPPER: &[&str] = &[
    "UN", "US", "USA", "EU", "UK", "IT", "AI", "API", "ICT", "GIS", "HIV", "AIDS", "NGO", "UNDP",
    "UNICEF", "UNOPS", "WFP", "PPE", "CCTV", "UPS", "ERP", "LAN", "WAN", "HVAC", "LED", "SME",
    "II", "III", "IV", "VI", "VII", "VIII", "IX", "XI", "XII",
];

const ACRONYMS: &[(&str, &str)] = &[
    ("EOI", "Expression of Interest"),
    ("RFQ", "Request for Quotation"),
    ("RFP", "Request for Proposal"),
    ("RFI", "Request for Information"),
    ("ITB", "Invitation to Bid"),
    ("IFB", "Invitation for Bids"),
    ("TOR", "Terms of Reference"),
    ("TORS", "Terms of Reference"),
];

const COUNTRIES: &[&str] = &[
    "Afghanistan", "Albania", "Algeria", "Angola", "Argentina", "Armenia", "Bangladesh", "Benin",
    "Bolivia", "Bosnia and Herzegovina", "Botswana", "Brazil", "Burkina Faso", "Burundi",
    "Cambodia", "Cameroon", "Chad", "Chile", "China", "Colombia", "Côte d'Ivoire", "Democratic Republic of the Congo",
    "Djibouti", "Ecuador", "Egypt", "El Salvador", "Eritrea", "Ethiopia", "France", "Gabon",
    "Gambia", "Georgia", "Germany", "Ghana", "Guatemala", "Guinea", "Haiti", "Honduras", "India",
    "Indonesia", "Iraq", "Jordan", "Kenya", "Kosovo", "Lebanon", "Lesotho", "Liberia", "Libya",
    "Madagascar", "Malawi", "Mali", "Mauritania", "Mexico", "Moldova", "Mongolia", "Morocco",
    "Mozambique", "Myanmar", "Namibia", "Nepal", "Nicaragua", "Niger", "Nigeria", "Pakistan",
    "Peru", "Philippines", "Rwanda", "Senegal", "Sierra Leone", "Somalia", "South Africa",
    "South Sudan", "Sri Lanka", "Sudan", "Syria", "Tajikistan", "Tanzania", "Togo", "Tunisia",
    "Turkey", "Uganda", "Ukraine", "United Kingdom", "United States", "Uzbekistan", "Viet Nam",
    "Vietnam", "Yemen", "Zambia", "Zimbabwe",
];

/// Inputs the enhancer needs beyond the tender itself.
#[derive(Debug, Clone, Copy)]
pub struct EnhanceContext<'a> {
    pub profile: Option<&'a SourceProfile>,
    /// Raw organization id, resolved through the profile's lookup table.
    pub organization_id: Option<&'a str>,
    pub today: NaiveDate,
}

impl<'a> EnhanceContext<'a> {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            profile: None,
            organization_id: None,
            today,
        }
    }

    pub fn with_profile(mut self, profile: &'a SourceProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_organization_id(mut self, organization_id: Option<&'a str>) -> Self {
        self.organization_id = organization_id;
        self
    }
}

/// Raw organization id carried by a record, if any.
pub fn organization_id_of(raw: &RawTenderRecord) -> Option<String> {
    raw.first_text(ORGANIZATION_ID_FIELDS)
}

fn short_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^|]{1,32}?)\s+(?:--|\||::)\s+(.+)$").expect("valid prefix regex"))
}

fn boilerplate_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:tender notice|procurement notice|contract notice|bid notice|call for tenders?|invitation to bid|tender|notice|new)\s*(?:--|[:\-|])\s*",
        )
        .expect("valid boilerplate regex")
    })
}

fn boilerplate_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\s*(?:--|[:\-|])\s*(?:tender notice|procurement notice|contract notice|invitation to bid|notice|tender)\s*$",
        )
        .expect("valid suffix regex")
    })
}

fn reference_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[?([A-Z0-9]+(?:[/_.\-][A-Z0-9]+)+)\]?\s*(?:--|[:\-|])\s+(.+)$")
            .expect("valid reference prefix regex")
    })
}

fn reference_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Z]{2,}[A-Z0-9]*(?:[/_\-][A-Z0-9]+){2,}\b").expect("valid reference token regex")
    })
}

fn buyer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:buyer|purchaser|contracting authority|procuring entity|employer)\s*[:\-]\s*([^.;\n]{3,120})",
        )
        .expect("valid buyer regex")
    })
}

fn project_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bproject(?:\s+name|\s+title)?\s*[:\-]\s*([^.;\n]{3,150})")
            .expect("valid project regex")
    })
}

fn country_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let mut names: Vec<&str> = COUNTRIES.to_vec();
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));
        let alternation = names
            .iter()
            .map(|n| regex::escape(n))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("valid country regex")
    })
}

pub fn enhance(mut tender: NormalizedTender, ctx: &EnhanceContext<'_>) -> NormalizedTender {
    if let Some(title) = tender.title.take() {
        let (title, reference) = clean_title(&title, tender.reference_number.as_deref());
        tender.title = non_empty(title);
        if tender.reference_number.is_none() {
            tender.reference_number = reference;
        }
    }

    infer_missing(&mut tender, ctx);
    backfill_english(&mut tender);
    tender
}

const MAX_TITLE_ROUNDS: usize = 6;

/// Cleans a title. Returns the new title and a reference number discovered in it.
///
/// Rounds repeat until the title is stable, so cleaning an already cleaned
/// title (with the discovered reference passed back in) is a no-op.
pub fn clean_title(title: &str, reference: Option<&str>) -> (String, Option<String>) {
    let mut current = title.to_string();
    let mut discovered: Option<String> = None;
    for _ in 0..MAX_TITLE_ROUNDS {
        let known = reference.or(discovered.as_deref());
        let (next, found) = clean_title_once(&current, known);
        if known.is_none() {
            discovered = found;
        }
        if next == current {
            break;
        }
        current = next;
    }
    (current, discovered)
}

fn clean_title_once(title: &str, reference: Option<&str>) -> (String, Option<String>) {
    let original = collapse_whitespace(title);
    let mut discovered: Option<String> = None;
    let known = reference.map(str::to_string);

    // Keep an already relocated "(REF)" suffix out of the way.
    let mut body = original.clone();
    let mut kept_suffix: Option<String> = None;
    if let Some(r) = known.as_deref() {
        let suffix = format!(" ({r})");
        if let Some(stripped) = body.strip_suffix(&suffix) {
            body = stripped.to_string();
            kept_suffix = Some(suffix);
        }
    }

    loop {
        let before = body.clone();
        body = strip_short_prefix(&body);
        body = strip_boilerplate_prefixes(&body);
        if discovered.is_none() {
            if let Some((code, rest)) = split_reference_prefix(&body) {
                if known.is_none() {
                    discovered = Some(code);
                }
                body = rest;
            }
        }
        if body == before {
            break;
        }
    }

    loop {
        let stripped = boilerplate_suffix_re().replace(&body, "").into_owned();
        if stripped == body || stripped.trim().is_empty() {
            break;
        }
        body = stripped;
    }

    let was_all_caps = is_all_caps(&body);
    body = expand_acronyms(&body);
    if was_all_caps {
        body = title_case(&body);
    }
    body = fix_uppercase_tokens(&body);
    body = dedupe_repeated_words(&body);

    let reference = known.clone().or_else(|| discovered.clone());
    let (body, found) = relocate_reference(&body, reference.as_deref());
    if known.is_none() && discovered.is_none() {
        discovered = found;
    }

    let mut body = trim_separators(&collapse_whitespace(&body));
    if body.is_empty() {
        return (original, discovered);
    }
    if let Some(suffix) = kept_suffix {
        if !body.ends_with(&suffix) {
            body.push_str(&suffix);
        }
    }
    (body, discovered)
}

/// Drops a short all-caps label such as `LOT 2 --` or `FORECAST II |`.
fn strip_short_prefix(body: &str) -> String {
    let Some(caps) = short_prefix_re().captures(body) else {
        return body.to_string();
    };
    let prefix = caps.get(1).map_or("", |m| m.as_str());
    let rest = caps.get(2).map_or("", |m| m.as_str());
    if prefix.split_whitespace().count() <= 4
        && prefix.chars().any(char::is_alphabetic)
        && !prefix.chars().any(char::is_lowercase)
        && rest.chars().any(char::is_alphabetic)
    {
        rest.to_string()
    } else {
        body.to_string()
    }
}

fn strip_boilerplate_prefixes(body: &str) -> String {
    let mut body = body.to_string();
    loop {
        let stripped = boilerplate_prefix_re().replace(&body, "").into_owned();
        if stripped == body || stripped.trim().is_empty() {
            return body;
        }
        body = stripped;
    }
}

/// `UNDP/RFQ/2026/041 - Supply of laptops` -> (`UNDP/RFQ/2026/041`, `Supply of laptops`).
fn split_reference_prefix(body: &str) -> Option<(String, String)> {
    let caps = reference_prefix_re().captures(body)?;
    let code = caps.get(1).map_or("", |m| m.as_str());
    let rest = caps.get(2).map_or("", |m| m.as_str());
    (code.chars().any(|c| c.is_ascii_digit()) && rest.chars().any(char::is_alphabetic))
        .then(|| (code.to_string(), rest.to_string()))
}

fn expand_acronyms(text: &str) -> String {
    map_tokens(text, |core| {
        ACRONYMS
            .iter()
            .find(|(acronym, _)| *acronym == core)
            .map(|(_, expansion)| expansion.to_string())
    })
}

fn title_case(text: &str) -> String {
    let mut first = true;
    map_tokens(text, |core| {
        let is_first = std::mem::replace(&mut first, false);
        if core.chars().any(|c| c.is_ascii_digit()) {
            return None;
        }
        let lower = core.to_lowercase();
        if !is_first && MINOR_WORDS.contains(&lower.as_str()) {
            return Some(lower);
        }
        let mut chars = lower.chars();
        chars
            .next()
            .map(|c| c.to_uppercase().chain(chars).collect::<String>())
    })
}

/// `Un` -> `UN`, `Ict` -> `ICT`. Lower-case words are left alone.
fn fix_uppercase_tokens(text: &str) -> String {
    map_tokens(text, |core| {
        let mut chars = core.chars();
        let capitalized = chars.next().is_some_and(char::is_uppercase) && chars.all(char::is_lowercase);
        if !capitalized {
            return None;
        }
        let upper = core.to_uppercase();
        ALWAYS_UPPER.contains(&upper.as_str()).then_some(upper)
    })
}

fn dedupe_repeated_words(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for token in text.split_whitespace() {
        let repeated = out.last().is_some_and(|prev| {
            prev.eq_ignore_ascii_case(token) && token.chars().any(char::is_alphabetic)
        });
        if !repeated {
            out.push(token);
        }
    }
    out.join(" ")
}

/// Moves a reference-like token to a trailing `(REF)`.
fn relocate_reference(text: &str, reference: Option<&str>) -> (String, Option<String>) {
    let (token, found) = match reference {
        Some(r) if !r.is_empty() && text.contains(r) => (r.to_string(), None),
        Some(_) => return (text.to_string(), None),
        None => match reference_token_re().find(text) {
            Some(m) if m.as_str().chars().any(|c| c.is_ascii_digit()) => {
                (m.as_str().to_string(), Some(m.as_str().to_string()))
            }
            _ => return (text.to_string(), None),
        },
    };
    let remainder = text
        .replacen(&token, " ", 1)
        .replace("()", " ")
        .replace("[]", " ");
    let remainder = trim_separators(&collapse_whitespace(&remainder));
    if remainder.is_empty() || !remainder.chars().any(char::is_alphabetic) {
        return (text.to_string(), found);
    }
    (format!("{remainder} ({token})"), found)
}

fn trim_separators(text: &str) -> String {
    text.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ':' | '|' | ',' | '/' | ';'))
        .to_string()
}

/// Rewrites whitespace-separated tokens, keeping surrounding punctuation.
fn map_tokens<F>(text: &str, mut f: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    text.split_whitespace()
        .map(|token| {
            let start = token
                .char_indices()
                .find(|(_, c)| c.is_alphanumeric())
                .map(|(i, _)| i);
            let Some(start) = start else {
                return token.to_string();
            };
            let end = token
                .char_indices()
                .filter(|(_, c)| c.is_alphanumeric())
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(token.len());
            let core = &token[start..end];
            match f(core) {
                Some(replacement) => format!("{}{}{}", &token[..start], replacement, &token[end..]),
                None => token.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn backfill_english(tender: &mut NormalizedTender) {
    fn mirror(primary: &Option<String>, english: &mut Option<String>) {
        if english.is_none() {
            if let Some(value) = primary.as_deref().filter(|v| looks_english(v)) {
                *english = Some(value.to_string());
            }
        }
    }
    mirror(&tender.title, &mut tender.title_english);
    mirror(&tender.description, &mut tender.description_english);
    mirror(&tender.organization_name, &mut tender.organization_name_english);
    mirror(&tender.buyer, &mut tender.buyer_english);
    mirror(&tender.project_name, &mut tender.project_name_english);
}

fn infer_missing(tender: &mut NormalizedTender, ctx: &EnhanceContext<'_>) {
    if tender.organization_name.is_none() {
        if let (Some(profile), Some(id)) = (ctx.profile, ctx.organization_id) {
            tender.organization_name = profile.organization_name(id).map(str::to_string);
        }
    }
    if tender.status.is_none() {
        tender.status = status_from_deadline(tender.deadline_date, ctx.today);
    }

    let description = tender.description.clone().unwrap_or_default();
    if tender.buyer.is_none() {
        tender.buyer = labeled_phrase(buyer_re(), &description);
    }
    if tender.project_name.is_none() {
        tender.project_name = labeled_phrase(project_re(), &description);
    }
    if tender.country.is_none() {
        tender.country = find_country(&description);
    }

    let title = tender.title.as_deref();
    let description = tender.description.as_deref();
    if tender.tender_type.is_none() {
        tender.tender_type = infer_tender_type(title, description).map(str::to_string);
    }
    if tender.sector.is_none() {
        tender.sector = infer_sector(title, description).map(str::to_string);
    }
}

fn labeled_phrase(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| collapse_whitespace(m.as_str()))
        .and_then(non_empty)
}

/// Earliest country name mentioned in `text`, in its canonical spelling.
pub fn find_country(text: &str) -> Option<String> {
    let found = country_re().find(text)?;
    COUNTRIES
        .iter()
        .find(|name| name.to_lowercase() == found.as_str().to_lowercase())
        .map(|name| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tender_core::TenderStatus;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    fn with_title(title: &str) -> NormalizedTender {
        let mut tender = NormalizedTender::new("sam_gov", "1");
        tender.title = Some(title.to_string());
        tender
    }

    fn title_of(title: &str) -> String {
        enhance(with_title(title), &EnhanceContext::new(today()))
            .title
            .unwrap_or_default()
    }

    #[test]
    fn caps_prefix_is_stripped_and_title_recased() {
        assert_eq!(title_of("FORECAST II -- SUPPLY OF GENERATORS"), "Supply of Generators");
    }

    #[test]
    fn boilerplate_prefixes_and_suffixes_go() {
        assert_eq!(title_of("Tender: Notice: Supply of vaccines"), "Supply of vaccines");
        assert_eq!(title_of("Road maintenance - Tender Notice"), "Road maintenance");
    }

    #[test]
    fn reference_prefix_moves_to_reference_number_and_suffix() {
        let out = enhance(
            with_title("UNDP/RFQ/2026/041 - Supply of laptops"),
            &EnhanceContext::new(today()),
        );
        assert_eq!(out.title.as_deref(), Some("Supply of laptops"));
        assert_eq!(out.reference_number.as_deref(), Some("UNDP/RFQ/2026/041"));

        let mut tender = with_title("Supply of laptops KE-2026-117 for schools");
        tender.reference_number = Some("KE-2026-117".into());
        let out = enhance(tender, &EnhanceContext::new(today()));
        assert_eq!(out.title.as_deref(), Some("Supply of laptops for schools (KE-2026-117)"));
    }

    #[test]
    fn uppercase_tokens_and_acronyms() {
        assert_eq!(title_of("SUPPLY OF IT EQUIPMENT FOR UN OFFICES"), "Supply of IT Equipment for UN Offices");
        assert_eq!(title_of("RFQ for office furniture"), "Request for Quotation for office furniture");
        assert_eq!(title_of("Support to it teams"), "Support to it teams");
    }

    #[test]
    fn repeated_words_collapse() {
        assert_eq!(title_of("Supply of of generators generators"), "Supply of generators");
    }

    #[test]
    fn stacked_title_prefixes_are_all_removed() {
        assert_eq!(title_of("Tender: LOT 2 -- Supply of pumps"), "Supply of pumps");
        assert_eq!(title_of("ITB - Supply of pumps"), "Supply of pumps");

        let out = enhance(
            with_title("NOTICE: UNDP/RFQ/2026/041 - Tender: Supply of laptops"),
            &EnhanceContext::new(today()),
        );
        assert_eq!(out.title.as_deref(), Some("Supply of laptops"));
        assert_eq!(out.reference_number.as_deref(), Some("UNDP/RFQ/2026/041"));
    }

    fn wfp_profile() -> SourceProfile {
        let mut profile = SourceProfile::named("ungm");
        profile.organization_ids =
            BTreeMap::from([("WFP".to_string(), "World Food Programme".to_string())]);
        profile
    }

    #[test]
    fn enhancement_is_idempotent() {
        let profile = wfp_profile();
        let plain = EnhanceContext::new(today());
        let with_org = EnhanceContext::new(today())
            .with_profile(&profile)
            .with_organization_id(Some("WFP"));
        for ctx in [plain, with_org] {
            for title in [
                "FORECAST II -- SUPPLY OF GENERATORS",
                "UNDP/RFQ/2026/041 - Supply of laptops",
                "EOI: CONSULTING SERVICES FOR ICT AUDIT",
                "Supply of laptops KE-2026-117 for schools",
                "Tender: Rehabilitation of boreholes in Kenya",
                "Tender: LOT 2 -- Supply of pumps",
                "NOTICE: UNDP/RFQ/2026/041 - Tender: Supply of laptops",
                "ITB - Supply of pumps - Tender Notice",
            ] {
                let mut tender = with_title(title);
                tender.description = Some(
                    "Project name: Rural Water Access. Contracting authority: Ministry of Water, Kenya. Deadline soon.".into(),
                );
                tender.deadline_date = NaiveDate::from_ymd_opt(2026, 7, 1);
                let once = enhance(tender, &ctx);
                assert_eq!(once.buyer_english.as_deref(), Some("Ministry of Water, Kenya"), "{title}");
                assert_eq!(once.project_name_english.as_deref(), Some("Rural Water Access"), "{title}");
                let twice = enhance(once.clone(), &ctx);
                assert_eq!(once, twice, "{title}");
            }
        }
    }

    #[test]
    fn rule_normalized_records_are_stable_under_enhancement() {
        use crate::rules::{normalize_without_llm, RuleMode};
        use serde_json::json;

        let profile = wfp_profile();
        let records = [
            json!({"id": "1", "title": "FORECAST II -- SUPPLY OF GENERATORS", "status": "active"}),
            json!({
                "id": "2",
                "title": "Tender: LOT 2 -- Supply of pumps",
                "description": "Buyer: Ministry of Agriculture. Project: Food Security Programme. Delivery to Malawi.",
                "organization_id": "WFP",
                "deadline": "2026-05-01",
                "estimated_value": "EUR 90.000"
            }),
            json!({
                "id": "3",
                "title": "NOTICE: UNDP/RFQ/2026/041 - Tender: SUPPLY OF IT EQUIPMENT FOR UN OFFICES",
                "description": "Tender No: UNDP/RFQ/2026/041. Employer: UNDP Kenya.",
                "buyer": "UNDP",
                "country": "Kenya",
                "sector": "Food"
            }),
            json!({
                "id": "4",
                "name": "Road maintenance - Tender Notice",
                "synopsis": "<p>Rehabilitation of <b>40 km</b> of feeder roads in Zambia.</p>",
                "closing_date": "30/11/2026"
            }),
            json!({"id": "5", "titre": "Fourniture de groupes électrogènes", "status": "ouvert"}),
        ];

        for value in records {
            let raw = RawTenderRecord::from_json(value.clone()).expect("object");
            let organization_id = organization_id_of(&raw);
            let ctx = EnhanceContext::new(today())
                .with_profile(&profile)
                .with_organization_id(organization_id.as_deref());
            let normalized = normalize_without_llm(&raw, &profile, RuleMode::Fast, today()).tender;

            let once = enhance(normalized.clone(), &ctx);
            let twice = enhance(once.clone(), &ctx);
            assert_eq!(once, twice, "{value}");

            let before = serde_json::to_value(&normalized).expect("serialize");
            let after = serde_json::to_value(&once).expect("serialize");
            for (field, old) in before.as_object().expect("object") {
                let filled = !(old.is_null() || old.as_array().is_some_and(Vec::is_empty));
                if field != "title" && filled {
                    assert_eq!(&after[field], old, "{field} changed for {value}");
                }
            }
        }
    }

    #[test]
    fn inference_is_additive_only() {
        let profile = wfp_profile();
        let ctx = EnhanceContext::new(today())
            .with_profile(&profile)
            .with_organization_id(Some("WFP"));

        let mut tender = with_title("Supply of maize seeds");
        tender.description = Some(
            "Buyer: Ministry of Agriculture. Project: Food Security Programme. Delivery to Malawi and Zambia."
                .into(),
        );
        tender.deadline_date = NaiveDate::from_ymd_opt(2026, 5, 1);
        tender.country = None;
        let out = enhance(tender, &ctx);
        assert_eq!(out.organization_name.as_deref(), Some("World Food Programme"));
        assert_eq!(out.status, Some(TenderStatus::Closed));
        assert_eq!(out.buyer.as_deref(), Some("Ministry of Agriculture"));
        assert_eq!(out.project_name.as_deref(), Some("Food Security Programme"));
        assert_eq!(out.country.as_deref(), Some("Malawi"));
        assert_eq!(out.tender_type.as_deref(), Some("Goods"));
        assert_eq!(out.sector.as_deref(), Some("Agriculture"));

        let mut tender = with_title("Supply of maize seeds");
        tender.status = Some(TenderStatus::Awarded);
        tender.country = Some("Kenya".into());
        tender.sector = Some("Food".into());
        let out = enhance(tender, &ctx);
        assert_eq!(out.status, Some(TenderStatus::Awarded));
        assert_eq!(out.country.as_deref(), Some("Kenya"));
        assert_eq!(out.sector.as_deref(), Some("Food"));
    }

    #[test]
    fn english_fields_are_mirrored_only_for_english_text() {
        let mut tender = with_title("Supply of generators");
        tender.organization_name = Some("Ministère de la Santé".into());
        let out = enhance(tender, &EnhanceContext::new(today()));
        assert_eq!(out.title_english.as_deref(), Some("Supply of generators"));
        assert_eq!(out.organization_name_english, None);
    }

    #[test]
    fn countries_match_whole_names() {
        assert_eq!(find_country("Works in Nigeria and Niger"), Some("Nigeria".to_string()));
        assert_eq!(find_country("delivery to south sudan"), Some("South Sudan".to_string()));
        assert_eq!(find_country("Nigerian suppliers"), None);
    }
}
