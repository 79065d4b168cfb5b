use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tender_adapters::{adapter_for_source, SourceAdapter, SourceRegistry};
use tender_core::{
    parse_timestamp, IngestStats, NormalizationDecision, NormalizedMethod, NormalizedTender,
    RawTenderRecord,
};
use tender_normalize::enhance::organization_id_of;
use tender_normalize::{
    decide, enhance, normalize_with_llm_timeout, normalize_without_llm, CompletionClient,
    EnhanceContext, FieldWarning, RuleMode,
};
use tender_storage::{CandidateQuery, FreshnessMap, TenderStore};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{IngestConfig, IngestError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// New normalizations to perform; zero or negative means all candidates.
    pub limit: i64,
    pub force: bool,
    /// Normalize without writing.
    pub dry_run: bool,
}

impl IngestOptions {
    pub fn with_limit(limit: i64) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    fn target(&self) -> Option<usize> {
        (self.limit > 0).then_some(self.limit as usize)
    }
}

/// Totals of a multi-source run, plus each source's own stats.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiSourceSummary {
    pub run_id: Option<Uuid>,
    pub totals: IngestStats,
    pub sources: BTreeMap<String, IngestStats>,
    /// Sources whose batch could not start, with the reason.
    pub failures: BTreeMap<String, String>,
}

#[derive(Debug)]
struct Candidate {
    raw: RawTenderRecord,
    source_id: String,
    exists: bool,
    freshness: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteResult {
    Inserted,
    Updated,
    DryRun,
    Conflict,
    Failed,
}

#[derive(Debug)]
struct RecordOutcome {
    decision: NormalizationDecision,
    method: NormalizedMethod,
    write: WriteResult,
}

struct Batch<'a> {
    adapter: &'a dyn SourceAdapter,
    options: IngestOptions,
    today: NaiveDate,
}

/// Runs ingestion batches against one store. The LLM kill switch lives as
/// long as the ingestor, so one quota failure disables the LLM for the rest
/// of the run.
pub struct Ingestor {
    store: Arc<dyn TenderStore>,
    llm: Option<Arc<dyn CompletionClient>>,
    config: IngestConfig,
    llm_disabled: AtomicBool,
}

impl Ingestor {
    pub fn new(store: Arc<dyn TenderStore>, config: IngestConfig) -> Self {
        Self {
            store,
            llm: None,
            config,
            llm_disabled: AtomicBool::new(false),
        }
    }

    pub fn with_llm(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.llm = Some(client);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn llm_disabled(&self) -> bool {
        self.llm_disabled.load(Ordering::Relaxed)
    }

    /// Ingests one registered source.
    pub async fn ingest(
        &self,
        registry: &SourceRegistry,
        source_table: &str,
        options: IngestOptions,
    ) -> Result<IngestStats, IngestError> {
        let adapter = adapter_for_source(registry, source_table)
            .ok_or_else(|| IngestError::UnknownSource(source_table.to_string()))?;
        self.ingest_with_adapter(adapter.as_ref(), options).await
    }

    /// Ingests every enabled source in turn. A source whose candidates cannot
    /// be fetched is recorded as a failure and the run moves on.
    pub async fn ingest_all(
        &self,
        registry: &SourceRegistry,
        options: IngestOptions,
    ) -> MultiSourceSummary {
        let mut summary = MultiSourceSummary {
            run_id: Some(Uuid::new_v4()),
            ..MultiSourceSummary::default()
        };
        for profile in registry.enabled() {
            let table = profile.source_table.as_str();
            match self.ingest(registry, table, options).await {
                Ok(stats) => {
                    summary.totals.merge(&stats);
                    summary.sources.insert(table.to_string(), stats);
                }
                Err(err) => {
                    error!(source = %table, error = %err, "source batch aborted");
                    summary.failures.insert(table.to_string(), err.to_string());
                }
            }
        }
        summary.totals.llm_disabled |= self.llm_disabled();
        summary
    }

    pub async fn ingest_with_adapter(
        &self,
        adapter: &dyn SourceAdapter,
        options: IngestOptions,
    ) -> Result<IngestStats, IngestError> {
        let run_id = Uuid::new_v4();
        let source_table = adapter.source_table().to_string();
        let span = info_span!("ingest", %run_id, source = %source_table);
        self.run_batch(adapter, options).instrument(span).await
    }

    async fn run_batch(
        &self,
        adapter: &dyn SourceAdapter,
        options: IngestOptions,
    ) -> Result<IngestStats, IngestError> {
        let profile = adapter.profile();
        let source_table = adapter.source_table();
        let mut stats = IngestStats::default();

        let candidates = self
            .store
            .fetch_candidates(CandidateQuery {
                source_table,
                freshness_field: profile.freshness_field.as_deref(),
                limit: None,
            })
            .await
            .map_err(|source| IngestError::SourceUnavailable {
                source_table: source_table.to_string(),
                source,
            })?;
        let fetched = candidates.len();

        let mut keyed = Vec::with_capacity(candidates.len());
        let mut seen = HashSet::new();
        for raw in candidates {
            let Some(source_id) = adapter.source_id(&raw) else {
                warn!(source = %source_table, "raw record has no source id; skipped");
                stats.skipped += 1;
                continue;
            };
            if !seen.insert(source_id.clone()) {
                debug!(source = %source_table, %source_id, "duplicate candidate; keeping newest");
                stats.skipped += 1;
                continue;
            }
            keyed.push((source_id, raw));
        }

        let ids: Vec<String> = keyed.iter().map(|(id, _)| id.clone()).collect();
        let existing = match self.store.existing_freshness(source_table, &ids).await {
            Ok(existing) => existing,
            Err(source) => {
                return Err(IngestError::SourceUnavailable {
                    source_table: source_table.to_string(),
                    source,
                })
            }
        };

        let mut queue = Vec::with_capacity(keyed.len());
        for (source_id, raw) in keyed {
            let freshness = profile
                .freshness_field
                .as_deref()
                .and_then(|field| raw.get(field))
                .and_then(parse_timestamp);
            if !needs_processing(&existing, &source_id, freshness, options.force) {
                stats.skipped += 1;
                continue;
            }
            queue.push(Candidate {
                raw,
                exists: existing.contains_key(&source_id),
                source_id,
                freshness,
            });
        }
        info!(
            source = %source_table,
            fetched,
            queued = queue.len(),
            skipped = stats.skipped,
            "candidates selected"
        );

        let batch = Batch {
            adapter,
            options,
            today: Utc::now().date_naive(),
        };
        let chunk_size = self.config.chunk_size.max(1);
        let concurrency = self.config.concurrency.max(1);
        let mut queue = queue.into_iter().peekable();

        while queue.peek().is_some() {
            let remaining = match options.target() {
                Some(target) if stats.processed >= target => break,
                Some(target) => target - stats.processed,
                None => usize::MAX,
            };
            let chunk: Vec<Candidate> = queue.by_ref().take(chunk_size.min(remaining)).collect();
            let batch = &batch;
            let outcomes: Vec<RecordOutcome> = stream::iter(chunk.into_iter().enumerate())
                .map(|(slot, candidate)| async move {
                    let delay = self.config.stagger.saturating_mul(slot as u32);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let span = info_span!("record", source_id = %candidate.source_id);
                    self.process_record(batch, candidate).instrument(span).await
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
            for outcome in &outcomes {
                tally(&mut stats, source_table, outcome);
            }
        }

        stats.llm_disabled = self.llm_disabled();
        info!(
            source = %source_table,
            processed = stats.processed,
            updated = stats.updated,
            skipped = stats.skipped,
            errors = stats.errors,
            fallback = stats.fallback,
            fast = stats.fast_normalization,
            llm = stats.llm,
            llm_skip_rate = stats.decision_tally.skip_rate(),
            "ingestion batch finished"
        );
        Ok(stats)
    }

    async fn process_record(&self, batch: &Batch<'_>, candidate: Candidate) -> RecordOutcome {
        let started = Instant::now();
        let adapter = batch.adapter;
        let profile = adapter.profile();
        let source_table = adapter.source_table();
        let raw = &candidate.raw;

        let decision = decide(raw, profile, &self.config.decision);
        debug!(reason = %decision.reason, use_llm = decision.use_llm, "normalization decision");

        let (mut tender, method) = if decision.use_llm {
            match self.try_llm(adapter, raw, &candidate.source_id).await {
                Some(tender) => (tender, NormalizedMethod::Llm),
                None => (
                    self.rule_path(batch, raw, RuleMode::Fallback, &candidate.source_id),
                    NormalizedMethod::RuleBasedFallback,
                ),
            }
        } else {
            (
                self.rule_path(batch, raw, RuleMode::Fast, &candidate.source_id),
                NormalizedMethod::RuleBasedFast,
            )
        };

        tender.source_table = Some(source_table.to_string());
        tender.source_id = Some(candidate.source_id.clone());
        tender.fill_missing_from(&adapter.map_fields(raw));
        if tender.url.is_none() {
            tender.url = adapter.generate_url(raw);
        }

        let organization_id = organization_id_of(raw);
        let ctx = EnhanceContext::new(batch.today)
            .with_profile(profile)
            .with_organization_id(organization_id.as_deref());
        let mut tender = enhance(tender, &ctx);
        tender.prepare_for_write();

        tender.normalized_method = Some(method);
        tender.normalized_at = Some(Utc::now());
        tender.processing_time_ms = Some(started.elapsed().as_millis() as u64);
        tender.source_updated_at = candidate.freshness;

        let write = if batch.options.dry_run {
            WriteResult::DryRun
        } else {
            self.write(&tender, candidate.exists).await
        };
        debug!(method = %method, ?write, "record finished");

        RecordOutcome {
            decision,
            method,
            write,
        }
    }

    /// LLM path, or `None` when it is unavailable or failed.
    async fn try_llm(
        &self,
        adapter: &dyn SourceAdapter,
        raw: &RawTenderRecord,
        source_id: &str,
    ) -> Option<NormalizedTender> {
        let client = self.llm.as_ref()?;
        if self.llm_disabled() {
            return None;
        }
        let limit = adapter.profile().llm_timeout().unwrap_or(self.config.llm_timeout);
        match normalize_with_llm_timeout(client.as_ref(), adapter, raw, limit).await {
            Ok(outcome) => {
                log_warnings(&outcome.warnings, adapter.source_table(), source_id);
                Some(outcome.tender)
            }
            Err(err) if err.is_quota() => {
                if !self.llm_disabled.swap(true, Ordering::Relaxed) {
                    warn!(error = %err, "completion quota exhausted; LLM disabled for the rest of the run");
                }
                None
            }
            Err(err) => {
                warn!(error = %err, "LLM normalization failed; using fallback");
                None
            }
        }
    }

    fn rule_path(
        &self,
        batch: &Batch<'_>,
        raw: &RawTenderRecord,
        mode: RuleMode,
        source_id: &str,
    ) -> NormalizedTender {
        let outcome = normalize_without_llm(raw, batch.adapter.profile(), mode, batch.today);
        log_warnings(&outcome.warnings, batch.adapter.source_table(), source_id);
        outcome.tender
    }

    async fn write(&self, tender: &NormalizedTender, exists: bool) -> WriteResult {
        if exists {
            match self.store.update(tender).await {
                Ok(true) => return WriteResult::Updated,
                Ok(false) => debug!("record vanished before update; inserting"),
                Err(err) => {
                    warn!(error = %err, "update failed");
                    return WriteResult::Failed;
                }
            }
        }
        match self.store.insert(tender).await {
            Ok(()) => WriteResult::Inserted,
            Err(err) if err.is_conflict() => {
                debug!("record inserted concurrently; skipped");
                WriteResult::Conflict
            }
            Err(err) => {
                warn!(error = %err, "insert failed");
                WriteResult::Failed
            }
        }
    }
}

/// Whether a candidate must be (re)normalized. A stored record is only
/// refreshed when the candidate carries a strictly newer freshness marker.
fn needs_processing(
    existing: &FreshnessMap,
    source_id: &str,
    candidate: Option<DateTime<Utc>>,
    force: bool,
) -> bool {
    if force {
        return true;
    }
    match existing.get(source_id) {
        None => true,
        Some(stored) => match (candidate, stored) {
            (Some(candidate), Some(stored)) => candidate > *stored,
            (Some(_), None) => true,
            (None, _) => false,
        },
    }
}

fn tally(stats: &mut IngestStats, source_table: &str, outcome: &RecordOutcome) {
    stats.decision_tally.record(source_table, &outcome.decision);
    match outcome.method {
        NormalizedMethod::Llm => stats.llm += 1,
        NormalizedMethod::RuleBasedFast => stats.fast_normalization += 1,
        NormalizedMethod::RuleBasedFallback => stats.fallback += 1,
    }
    match outcome.write {
        WriteResult::Inserted | WriteResult::DryRun => stats.processed += 1,
        WriteResult::Updated => {
            stats.processed += 1;
            stats.updated += 1;
        }
        WriteResult::Conflict => stats.skipped += 1,
        WriteResult::Failed => stats.errors += 1,
    }
}

fn log_warnings(warnings: &[FieldWarning], source_table: &str, source_id: &str) {
    for warning in warnings {
        warning.log(source_table, Some(source_id));
    }
}
