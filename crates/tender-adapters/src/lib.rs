//! Source adapter contract, per-source profiles and the YAML source registry.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tender_core::{
    parse_timestamp, value_as_text, DocumentLink, NormalizedTender, RawTenderRecord, TenderStatus,
    CANONICAL_FIELDS,
};
use tracing::debug;

/// Raw keys probed for a source id when the profile names none.
pub const ID_CANDIDATES: &[&str] = &[
    "id",
    "source_id",
    "notice_id",
    "tender_id",
    "opportunity_id",
    "uuid",
];

const URL_CANDIDATES: &[&str] = &["url", "link", "notice_url", "tender_url", "ui_link", "detail_url"];

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceProfile>,
}

/// Everything the core knows about one source, loaded from `sources.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceProfile {
    pub source_table: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub id_field: Option<String>,
    /// Raw column carrying the record's own last-modified marker.
    #[serde(default)]
    pub freshness_field: Option<String>,
    /// Always route to the rule-based path.
    #[serde(default)]
    pub fast_path: bool,
    /// ISO 639-1 code of the language most records are written in.
    #[serde(default)]
    pub majority_language: Option<String>,
    #[serde(default)]
    pub llm_timeout_secs: Option<u64>,
    #[serde(default)]
    pub url_template: Option<String>,
    #[serde(default)]
    pub prompt_guidance: Option<String>,
    /// Raw key -> canonical field name.
    #[serde(default)]
    pub field_map: BTreeMap<String, String>,
    /// Source-language status word -> canonical status.
    #[serde(default)]
    pub status_aliases: BTreeMap<String, TenderStatus>,
    #[serde(default)]
    pub organization_ids: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl SourceProfile {
    /// Bare profile with no overrides.
    pub fn named(source_table: impl Into<String>) -> Self {
        Self {
            source_table: source_table.into(),
            enabled: true,
            ..Default::default()
        }
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.source_table)
    }

    pub fn llm_timeout(&self) -> Option<Duration> {
        self.llm_timeout_secs.map(Duration::from_secs)
    }

    pub fn majority_language_is(&self, code: &str) -> bool {
        self.majority_language
            .as_deref()
            .is_some_and(|lang| lang.eq_ignore_ascii_case(code))
    }

    /// Looks up a source-language status word, ignoring case and surrounding space.
    pub fn status_alias(&self, word: &str) -> Option<TenderStatus> {
        let word = word.trim();
        self.status_aliases
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(word))
            .map(|(_, status)| *status)
    }

    pub fn organization_name(&self, organization_id: &str) -> Option<&str> {
        self.organization_ids
            .get(organization_id.trim())
            .map(String::as_str)
    }

    fn validate(&self) -> Result<()> {
        if self.source_table.trim().is_empty() {
            bail!("source entry without source_table");
        }
        for (raw_key, canonical) in &self.field_map {
            if !CANONICAL_FIELDS.contains(&canonical.as_str()) {
                bail!(
                    "{}: field_map entry {raw_key} -> {canonical} names no canonical field",
                    self.source_table
                );
            }
        }
        Ok(())
    }
}

impl SourceRegistry {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let registry: SourceRegistry = serde_yaml::from_str(text).context("parsing source registry")?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !seen.insert(source.source_table.as_str()) {
                bail!("duplicate source_table {}", source.source_table);
            }
        }
        Ok(())
    }

    pub fn get(&self, source_table: &str) -> Option<&SourceProfile> {
        self.sources.iter().find(|s| s.source_table == source_table)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceProfile> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// Boundary between one external feed and the normalization core.
pub trait SourceAdapter: Send + Sync {
    fn profile(&self) -> &SourceProfile;

    fn source_table(&self) -> &str {
        &self.profile().source_table
    }

    /// Identity of `raw` within its source, rendered as text.
    fn source_id(&self, raw: &RawTenderRecord) -> Option<String>;

    /// Default canonical values, used for fields normalization left empty.
    fn map_fields(&self, raw: &RawTenderRecord) -> NormalizedTender;

    fn generate_url(&self, raw: &RawTenderRecord) -> Option<String>;

    /// Opaque guidance appended to the LLM prompt.
    fn source_prompt(&self) -> &str;
}

/// Key-renaming adapter driven entirely by a [`SourceProfile`].
#[derive(Debug, Clone)]
pub struct ConfiguredAdapter {
    profile: SourceProfile,
}

impl ConfiguredAdapter {
    pub fn new(profile: SourceProfile) -> Self {
        Self { profile }
    }
}

impl SourceAdapter for ConfiguredAdapter {
    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    fn source_id(&self, raw: &RawTenderRecord) -> Option<String> {
        match self.profile.id_field.as_deref() {
            Some(field) => raw.text(field),
            None => raw.first_text(ID_CANDIDATES),
        }
    }

    fn map_fields(&self, raw: &RawTenderRecord) -> NormalizedTender {
        let mut tender = NormalizedTender {
            source_table: Some(self.profile.source_table.clone()),
            source_id: self.source_id(raw),
            ..Default::default()
        };
        for (raw_key, canonical) in &self.profile.field_map {
            if let Some(value) = raw.get(raw_key) {
                assign_canonical(&mut tender, canonical, value, &self.profile);
            }
        }
        tender
    }

    fn generate_url(&self, raw: &RawTenderRecord) -> Option<String> {
        if let Some(template) = self.profile.url_template.as_deref() {
            if let Some(url) = expand_template(template, raw) {
                return Some(url);
            }
        }
        raw.first_text(URL_CANDIDATES)
            .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
    }

    fn source_prompt(&self) -> &str {
        self.profile.prompt_guidance.as_deref().unwrap_or_default()
    }
}

/// Plain renaming: only values already in the target shape are kept.
fn assign_canonical(
    tender: &mut NormalizedTender,
    canonical: &str,
    value: &JsonValue,
    profile: &SourceProfile,
) {
    match canonical {
        "publication_date" => {
            tender.publication_date = parse_timestamp(value).map(|ts| ts.date_naive());
        }
        "deadline_date" => {
            tender.deadline_date = parse_timestamp(value).map(|ts| ts.date_naive());
        }
        "estimated_value" => {
            tender.estimated_value = match value {
                JsonValue::Number(n) => n.as_f64(),
                JsonValue::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
        }
        "status" => {
            tender.status = value_as_text(value).and_then(|word| {
                profile
                    .status_alias(&word)
                    .or_else(|| TenderStatus::from_canonical(&word))
            });
        }
        "document_links" => {
            if let JsonValue::Array(items) = value {
                tender.document_links = items
                    .iter()
                    .filter_map(value_as_text)
                    .map(|url| DocumentLink { title: None, url })
                    .collect();
            }
        }
        other => match tender.text_field_mut(other) {
            Some(slot) => *slot = value_as_text(value),
            None => debug!(source = %profile.source_table, field = other, "unmapped canonical field"),
        },
    }
}

/// Substitutes `{raw_key}` placeholders. Any missing key yields `None`.
fn expand_template(template: &str, raw: &RawTenderRecord) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}')?;
        let value = raw.text(&after[..end])?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

/// Builds the adapter for a registered source.
pub fn adapter_for_source(
    registry: &SourceRegistry,
    source_table: &str,
) -> Option<Arc<dyn SourceAdapter>> {
    registry
        .get(source_table)
        .cloned()
        .map(|profile| Arc::new(ConfiguredAdapter::new(profile)) as Arc<dyn SourceAdapter>)
}
