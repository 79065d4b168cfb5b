use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value as JsonValue};
use tender_adapters::SourceRegistry;
use tender_core::{NormalizedMethod, NormalizedTender, RawTenderRecord, TenderStatus};
use tender_normalize::CompletionError;
use tender_normalize::CompletionClient;
use tender_storage::{
    CandidateQuery, FreshnessMap, MemoryTenderStore, RawRecordSource, StoreError, UnifiedStore,
};
use tender_sync::{IngestConfig, IngestError, IngestOptions, Ingestor};

const REGISTRY: &str = r#"
sources:
  - source_table: sam_gov
    id_field: notice_id
    freshness_field: last_modified
    majority_language: en
    url_template: "https://sam.gov/opp/{notice_id}/view"
  - source_table: ted_eu
    freshness_field: updated_at
    majority_language: multi
    prompt_guidance: Notices are mostly in French and German.
  - source_table: grants_gov
    fast_path: true
  - source_table: missing_table
"#;

const FRENCH_SUMMARY: &str = "Fourniture et installation des équipements informatiques pour le ministère de la santé publique, avec formation des utilisateurs et maintenance pendant deux ans.";

fn registry() -> SourceRegistry {
    SourceRegistry::from_yaml_str(REGISTRY).expect("registry")
}

fn raw(value: JsonValue) -> RawTenderRecord {
    RawTenderRecord::from_json(value).expect("object")
}

fn config() -> IngestConfig {
    IngestConfig {
        stagger: Duration::ZERO,
        llm_timeout: Duration::from_secs(1),
        concurrency: 4,
        ..IngestConfig::default()
    }
}

fn sam_notice(id: &str, title: &str, modified_day: u32) -> RawTenderRecord {
    raw(json!({
        "notice_id": id,
        "title": title,
        "status": "active",
        "last_modified": format!("2026-05-{modified_day:02}T00:00:00Z"),
    }))
}

fn french_notice(id: &str) -> RawTenderRecord {
    raw(json!({
        "id": id,
        "name": "Fourniture de matériel médical",
        "summary": FRENCH_SUMMARY,
        "updated_at": "2026-05-02T08:00:00Z",
    }))
}

fn store_with(table: &str, records: Vec<RawTenderRecord>) -> Arc<MemoryTenderStore> {
    let store = Arc::new(MemoryTenderStore::new());
    store.set_raw(table, records);
    store
}

enum Script {
    Reply(&'static str),
    Hang,
    Quota,
}

struct FakeClient {
    script: Script,
    calls: AtomicUsize,
}

impl FakeClient {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for FakeClient {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Reply(text) => Ok(text.to_string()),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok("{}".to_string())
            }
            Script::Quota => Err(CompletionError::Quota {
                status: 429,
                body: "insufficient_quota".to_string(),
            }),
        }
    }
}

/// Hides existing records from the freshness lookup so inserts race into a conflict.
struct BlindStore(Arc<MemoryTenderStore>);

#[async_trait]
impl RawRecordSource for BlindStore {
    async fn fetch_candidates(
        &self,
        query: CandidateQuery<'_>,
    ) -> Result<Vec<RawTenderRecord>, StoreError> {
        self.0.fetch_candidates(query).await
    }
}

#[async_trait]
impl UnifiedStore for BlindStore {
    async fn find(
        &self,
        source_table: &str,
        source_id: &str,
    ) -> Result<Option<NormalizedTender>, StoreError> {
        self.0.find(source_table, source_id).await
    }

    async fn existing_freshness(
        &self,
        _source_table: &str,
        _source_ids: &[String],
    ) -> Result<FreshnessMap, StoreError> {
        Ok(FreshnessMap::new())
    }

    async fn insert(&self, tender: &NormalizedTender) -> Result<(), StoreError> {
        self.0.insert(tender).await
    }

    async fn update(&self, tender: &NormalizedTender) -> Result<bool, StoreError> {
        self.0.update(tender).await
    }
}

#[tokio::test]
async fn sparse_english_notice_takes_the_fast_path_and_is_cleaned() {
    let store = store_with(
        "sam_gov",
        vec![sam_notice("N1", "FORECAST II -- SUPPLY OF GENERATORS", 1)],
    );
    let ingestor = Ingestor::new(store.clone(), config());
    let stats = ingestor
        .ingest(&registry(), "sam_gov", IngestOptions::default())
        .await
        .expect("ingest");

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.fast_normalization, 1);
    assert_eq!(stats.decision_tally.skipped_llm, 1);

    let stored = store.get("sam_gov", "N1").expect("stored");
    assert_eq!(stored.title.as_deref(), Some("Supply of Generators"));
    assert_eq!(stored.status, Some(TenderStatus::Open));
    assert_eq!(stored.normalized_method, Some(NormalizedMethod::RuleBasedFast));
    assert_eq!(stored.url.as_deref(), Some("https://sam.gov/opp/N1/view"));
    assert_eq!(
        stored.source_updated_at,
        Some(Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap())
    );
    assert!(stored.normalized_at.is_some());
    assert!(stored.processing_time_ms.is_some());
}

#[tokio::test]
async fn llm_output_is_used_when_recoverable() {
    let client = FakeClient::new(Script::Reply(
        r#"{"title": "Fourniture de matériel médical", "title_english": "Supply of medical equipment", "status": "Open", "deadline_date": "2099-01-31", "estimated_value": "EUR 1.200.000,00"#,
    ));
    let store = store_with("ted_eu", vec![french_notice("T1")]);
    let ingestor = Ingestor::new(store.clone(), config()).with_llm(client.clone());
    let stats = ingestor
        .ingest(&registry(), "ted_eu", IngestOptions::default())
        .await
        .expect("ingest");

    assert_eq!(client.calls(), 1);
    assert_eq!(stats.llm, 1);
    assert_eq!(stats.processed, 1);
    let stored = store.get("ted_eu", "T1").expect("stored");
    assert_eq!(stored.normalized_method, Some(NormalizedMethod::Llm));
    assert_eq!(stored.title_english.as_deref(), Some("Supply of medical equipment"));
    assert_eq!(stored.status, Some(TenderStatus::Open));
    // The truncated trailing string still yields a value after brace balancing.
    assert_eq!(stored.estimated_value, Some(1_200_000.0));
    assert_eq!(stored.currency.as_deref(), Some("EUR"));
}

#[tokio::test(start_paused = true)]
async fn llm_timeout_falls_back_without_counting_an_error() {
    let client = FakeClient::new(Script::Hang);
    let store = store_with("ted_eu", vec![french_notice("T1")]);
    let ingestor = Ingestor::new(store.clone(), config()).with_llm(client.clone());
    let stats = ingestor
        .ingest(&registry(), "ted_eu", IngestOptions::default())
        .await
        .expect("ingest");

    assert_eq!(client.calls(), 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.fallback, 1);
    assert_eq!(stats.processed, 1);
    let stored = store.get("ted_eu", "T1").expect("stored");
    assert_eq!(stored.normalized_method, Some(NormalizedMethod::RuleBasedFallback));
    assert_eq!(stored.title.as_deref(), Some("Fourniture de matériel médical"));
}

#[tokio::test]
async fn quota_failure_disables_the_llm_for_the_rest_of_the_run() {
    let client = FakeClient::new(Script::Quota);
    let store = store_with(
        "ted_eu",
        vec![french_notice("T1"), french_notice("T2"), french_notice("T3")],
    );
    let ingestor = Ingestor::new(
        store.clone(),
        IngestConfig {
            concurrency: 1,
            ..config()
        },
    )
    .with_llm(client.clone());
    let stats = ingestor
        .ingest(&registry(), "ted_eu", IngestOptions::default())
        .await
        .expect("ingest");

    assert_eq!(client.calls(), 1);
    assert!(stats.llm_disabled);
    assert!(ingestor.llm_disabled());
    assert_eq!(stats.fallback, 3);
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn missing_llm_client_routes_to_fallback() {
    let store = store_with("ted_eu", vec![french_notice("T1")]);
    let ingestor = Ingestor::new(store.clone(), config());
    let stats = ingestor
        .ingest(&registry(), "ted_eu", IngestOptions::default())
        .await
        .expect("ingest");
    assert_eq!(stats.fallback, 1);
    assert_eq!(stats.decision_tally.skipped_llm, 0);
}

#[tokio::test]
async fn rerun_on_unchanged_candidates_processes_nothing() {
    let store = store_with(
        "sam_gov",
        vec![
            sam_notice("N1", "Supply of generators", 1),
            sam_notice("N2", "Supply of fuel", 2),
        ],
    );
    let ingestor = Ingestor::new(store.clone(), config());
    let first = ingestor
        .ingest(&registry(), "sam_gov", IngestOptions::default())
        .await
        .expect("first run");
    let second = ingestor
        .ingest(&registry(), "sam_gov", IngestOptions::default())
        .await
        .expect("second run");

    assert_eq!(first.processed, 2);
    assert_eq!(second.processed, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(store.unified_len(), 2);
}

#[tokio::test]
async fn newer_raw_record_updates_and_force_reprocesses() {
    let store = store_with("sam_gov", vec![sam_notice("N1", "Supply of generators", 1)]);
    let ingestor = Ingestor::new(store.clone(), config());
    ingestor
        .ingest(&registry(), "sam_gov", IngestOptions::default())
        .await
        .expect("first run");

    store.set_raw("sam_gov", vec![sam_notice("N1", "Supply of diesel generators", 3)]);
    let stats = ingestor
        .ingest(&registry(), "sam_gov", IngestOptions::default())
        .await
        .expect("update run");
    assert_eq!((stats.processed, stats.updated), (1, 1));
    assert_eq!(
        store.get("sam_gov", "N1").and_then(|t| t.title),
        Some("Supply of diesel generators".to_string())
    );

    let forced = ingestor
        .ingest(
            &registry(),
            "sam_gov",
            IngestOptions {
                force: true,
                ..IngestOptions::default()
            },
        )
        .await
        .expect("forced run");
    assert_eq!((forced.processed, forced.updated), (1, 1));
    assert_eq!(store.unified_len(), 1);
}

#[tokio::test]
async fn older_raw_record_never_regresses_the_unified_record() {
    let store = store_with("sam_gov", vec![sam_notice("N1", "Old title", 5)]);
    let mut current = NormalizedTender::new("sam_gov", "N1");
    current.title = Some("Current title".into());
    current.source_updated_at = Some(Utc.with_ymd_and_hms(2026, 5, 10, 0, 0, 0).unwrap());
    store.seed_unified(current);

    let ingestor = Ingestor::new(store.clone(), config());
    let stats = ingestor
        .ingest(&registry(), "sam_gov", IngestOptions::default())
        .await
        .expect("ingest");

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.processed, 0);
    assert_eq!(stats.updated, 0);
    assert_eq!(store.unified_len(), 1);
    assert_eq!(
        store.get("sam_gov", "N1").and_then(|t| t.title),
        Some("Current title".to_string())
    );
}

#[tokio::test]
async fn concurrent_insert_conflict_is_a_benign_skip() {
    let memory = store_with("sam_gov", vec![sam_notice("N1", "Supply of generators", 1)]);
    memory.seed_unified(NormalizedTender::new("sam_gov", "N1"));
    let ingestor = Ingestor::new(Arc::new(BlindStore(memory.clone())), config());
    let stats = ingestor
        .ingest(&registry(), "sam_gov", IngestOptions::default())
        .await
        .expect("ingest");

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.processed, 0);
    assert_eq!(memory.unified_len(), 1);
}

#[tokio::test]
async fn store_failures_are_counted_per_record() {
    let store = store_with(
        "sam_gov",
        vec![
            sam_notice("N1", "Supply of generators", 1),
            sam_notice("N2", "Supply of fuel", 2),
            sam_notice("N3", "Supply of tyres", 3),
        ],
    );
    store.fail_writes_for("N2");
    let ingestor = Ingestor::new(store.clone(), config());
    let stats = ingestor
        .ingest(&registry(), "sam_gov", IngestOptions::default())
        .await
        .expect("batch completes");

    assert_eq!(stats.errors, 1);
    assert_eq!(stats.processed, 2);
    assert!(store.get("sam_gov", "N2").is_none());
}

#[tokio::test]
async fn records_without_an_id_are_skipped() {
    let store = store_with(
        "sam_gov",
        vec![
            raw(json!({"title": "Orphan notice", "last_modified": "2026-05-01T00:00:00Z"})),
            sam_notice("N1", "Supply of generators", 1),
        ],
    );
    let ingestor = Ingestor::new(store.clone(), config());
    let stats = ingestor
        .ingest(&registry(), "sam_gov", IngestOptions::default())
        .await
        .expect("ingest");
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.processed, 1);
}

#[tokio::test]
async fn limit_counts_new_normalizations_only() {
    let records = (1..=5)
        .map(|i| sam_notice(&format!("N{i}"), "Supply of generators", i))
        .collect();
    let store = store_with("sam_gov", records);
    let ingestor = Ingestor::new(store.clone(), config());

    let limited = ingestor
        .ingest(&registry(), "sam_gov", IngestOptions::with_limit(2))
        .await
        .expect("limited run");
    assert_eq!(limited.processed, 2);
    assert_eq!(store.unified_len(), 2);
    // Newest first.
    assert!(store.get("sam_gov", "N5").is_some());
    assert!(store.get("sam_gov", "N4").is_some());

    let rest = ingestor
        .ingest(&registry(), "sam_gov", IngestOptions::with_limit(0))
        .await
        .expect("unbounded run");
    assert_eq!(rest.processed, 3);
    assert_eq!(rest.skipped, 2);
    assert_eq!(store.unified_len(), 5);
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let store = store_with("grants_gov", vec![raw(json!({"id": "G1", "title": "Community grant"}))]);
    let ingestor = Ingestor::new(store.clone(), config());
    let stats = ingestor
        .ingest(
            &registry(),
            "grants_gov",
            IngestOptions {
                dry_run: true,
                ..IngestOptions::default()
            },
        )
        .await
        .expect("dry run");
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.fast_normalization, 1);
    assert_eq!(store.unified_len(), 0);
}

#[tokio::test]
async fn unreachable_or_unknown_sources_are_hard_failures() {
    let store = Arc::new(MemoryTenderStore::new());
    let ingestor = Ingestor::new(store, config());

    let err = ingestor
        .ingest(&registry(), "missing_table", IngestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::SourceUnavailable { .. }));

    let err = ingestor
        .ingest(&registry(), "not_registered", IngestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::UnknownSource(_)));
}

#[tokio::test]
async fn ingest_all_merges_sources_and_reports_failures() {
    let store = Arc::new(MemoryTenderStore::new());
    store.set_raw("sam_gov", vec![sam_notice("N1", "Supply of generators", 1)]);
    store.set_raw("ted_eu", vec![french_notice("T1")]);
    store.set_raw("grants_gov", vec![raw(json!({"id": "G1", "title": "Community grant"}))]);

    let ingestor = Ingestor::new(store.clone(), config());
    let summary = ingestor.ingest_all(&registry(), IngestOptions::default()).await;

    assert!(summary.run_id.is_some());
    assert_eq!(summary.totals.processed, 3);
    assert_eq!(summary.sources.len(), 3);
    assert!(summary.failures.contains_key("missing_table"));
    assert_eq!(summary.totals.decision_tally.per_source.len(), 3);
    assert_eq!(store.unified_len(), 3);
}
