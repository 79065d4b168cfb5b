use serde_json::Value as JsonValue;
use tender_adapters::SourceProfile;
use tender_core::{value_as_text, NormalizedMethod, NormalizedTender};

use crate::dates::parse_date_value;
use crate::error::FieldWarning;
use crate::money::{extract_currency, parse_money_value};
use crate::rules::{links_from_items, normalize_status};
use crate::text::{html_to_text, non_empty};

use super::repair::JsonObject;

#[derive(Debug, Clone, PartialEq)]
pub struct MappedTender {
    pub tender: NormalizedTender,
    pub warnings: Vec<FieldWarning>,
}

/// Builds a tender from recovered completion JSON. Values go through the same
/// typed parsers as the rule path; unknown keys are dropped.
pub fn tender_from_json(fields: &JsonObject, profile: &SourceProfile) -> MappedTender {
    let mut tender = NormalizedTender {
        source_table: Some(profile.source_table.clone()),
        normalized_method: Some(NormalizedMethod::Llm),
        ..Default::default()
    };
    let mut warnings = Vec::new();

    for (key, value) in fields {
        if value.is_null() {
            continue;
        }
        match key.as_str() {
            "publication_date" | "deadline_date" => {
                let field = if key == "publication_date" {
                    "publication_date"
                } else {
                    "deadline_date"
                };
                match parse_date_value(field, value) {
                    Ok(date) if field == "publication_date" => tender.publication_date = date,
                    Ok(date) => tender.deadline_date = date,
                    Err(warning) => warnings.push(warning),
                }
            }
            "estimated_value" => match parse_money_value(value) {
                Ok(money) => {
                    tender.estimated_value = money.amount;
                    if tender.currency.is_none() {
                        tender.currency = money.currency;
                    }
                }
                Err(warning) => warnings.push(warning),
            },
            "currency" => {
                if let Some(code) = value_as_text(value) {
                    tender.currency = extract_currency(&code).or(Some(code.to_ascii_uppercase()));
                }
            }
            "status" => {
                if let Some(word) = value_as_text(value) {
                    tender.status = normalize_status(&word, Some(profile));
                    if tender.status.is_none() {
                        warnings.push(FieldWarning::new("status", word, "unknown status word"));
                    }
                }
            }
            "document_links" => {
                if let JsonValue::Array(items) = value {
                    tender.document_links = links_from_items(items);
                }
            }
            other => {
                if let Some(slot) = tender.text_field_mut(other) {
                    *slot = value_as_text(value)
                        .map(|text| html_to_text(&text))
                        .and_then(non_empty);
                }
            }
        }
    }

    MappedTender { tender, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use tender_core::TenderStatus;

    fn object(value: JsonValue) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn typed_fields_use_rule_parsers() {
        let fields = object(json!({
            "title": "Supply of generators",
            "deadline_date": "30/06/2026",
            "estimated_value": "USD 1,250,000.50",
            "status": "active",
            "document_links": ["https://x.org/a.pdf", {"name": "ToR", "href": "https://x.org/b.pdf"}],
            "source_id": "hijack",
            "confidence": 0.9,
        }));
        let mapped = tender_from_json(&fields, &SourceProfile::named("ungm"));
        let tender = mapped.tender;
        assert!(mapped.warnings.is_empty());
        assert_eq!(tender.title.as_deref(), Some("Supply of generators"));
        assert_eq!(tender.deadline_date, NaiveDate::from_ymd_opt(2026, 6, 30));
        assert_eq!(tender.estimated_value, Some(1_250_000.5));
        assert_eq!(tender.currency.as_deref(), Some("USD"));
        assert_eq!(tender.status, Some(TenderStatus::Open));
        assert_eq!(tender.document_links.len(), 2);
        assert_eq!(tender.source_id, None);
        assert_eq!(tender.source_table.as_deref(), Some("ungm"));
        assert_eq!(tender.normalized_method, Some(NormalizedMethod::Llm));
    }

    #[test]
    fn unparsable_values_become_warnings_and_nulls() {
        let fields = object(json!({
            "deadline_date": "when ready",
            "estimated_value": "a lot",
            "status": "pending review",
            "title": "   ",
        }));
        let mapped = tender_from_json(&fields, &SourceProfile::named("ungm"));
        assert_eq!(mapped.tender.deadline_date, None);
        assert_eq!(mapped.tender.estimated_value, None);
        assert_eq!(mapped.tender.status, None);
        assert_eq!(mapped.tender.title, None);
        let fields: Vec<&str> = mapped.warnings.iter().map(|w| w.field).collect();
        assert_eq!(fields.len(), 3);
        assert!(fields.contains(&"deadline_date"));
        assert!(fields.contains(&"estimated_value"));
        assert!(fields.contains(&"status"));
    }

    #[test]
    fn explicit_currency_beats_the_amount_prefix() {
        let fields = object(json!({"currency": "eur", "estimated_value": 5000}));
        let mapped = tender_from_json(&fields, &SourceProfile::named("ted_eu"));
        assert_eq!(mapped.tender.currency.as_deref(), Some("EUR"));
        assert_eq!(mapped.tender.estimated_value, Some(5000.0));
    }
}
