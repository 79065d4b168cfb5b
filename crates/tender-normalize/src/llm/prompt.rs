use tender_core::{RawTenderRecord, TenderStatus, CANONICAL_FIELDS};

use crate::text::truncate_on_boundary;

/// Serialized raw records longer than this are cut before embedding.
pub const MAX_RECORD_BYTES: usize = 12_000;

fn field_hint(field: &str) -> String {
    match field {
        "publication_date" | "deadline_date" => "date as YYYY-MM-DD or null".to_string(),
        "estimated_value" => "number without currency symbols or separators, or null".to_string(),
        "currency" => "ISO 4217 code such as USD or EUR, or null".to_string(),
        "status" => {
            let allowed: Vec<&str> = TenderStatus::ALL.iter().map(TenderStatus::as_str).collect();
            format!("one of {} or null", allowed.join(", "))
        }
        "document_links" => "array of {\"title\": string|null, \"url\": string}".to_string(),
        f if f.ends_with("_english") => "English rendering of the matching field, or null".to_string(),
        _ => "string or null".to_string(),
    }
}

/// Prompt for one record: schema, source guidance, then the raw record itself.
pub fn build_prompt(raw: &RawTenderRecord, guidance: &str) -> String {
    let mut prompt = String::from(
        "Normalize the procurement notice below into a JSON object with exactly these keys:\n",
    );
    for field in CANONICAL_FIELDS {
        prompt.push_str(&format!("- {field}: {}\n", field_hint(field)));
    }
    prompt.push_str(
        "Use null for anything the notice does not state. Do not invent values. \
         Translate title, description, organization_name, buyer and project_name into the *_english keys.\n",
    );

    let guidance = guidance.trim();
    if !guidance.is_empty() {
        prompt.push_str("\nSource notes:\n");
        prompt.push_str(guidance);
        prompt.push('\n');
    }

    let record = serde_json::to_string(raw.fields()).unwrap_or_else(|_| "{}".to_string());
    let record = truncate_on_boundary(&record, MAX_RECORD_BYTES);
    prompt.push_str("\nNotice:\n");
    prompt.push_str(record);
    prompt
}
