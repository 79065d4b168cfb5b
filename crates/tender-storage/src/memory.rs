//! In-memory backend with the same conflict and merge semantics as Postgres.
//!
//! Used by the orchestrator tests and dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use tender_core::{parse_timestamp, NormalizedTender, RawTenderRecord};

use crate::{
    require_key, CandidateQuery, FreshnessMap, RawRecordSource, StoreError, UnifiedStore,
};

type Key = (String, String);

#[derive(Debug, Default)]
pub struct MemoryTenderStore {
    raw: RwLock<HashMap<String, Vec<RawTenderRecord>>>,
    unified: RwLock<HashMap<Key, NormalizedTender>>,
    failing_ids: RwLock<HashSet<String>>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

impl MemoryTenderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a raw source table (possibly empty).
    pub fn add_source(&self, source_table: &str) {
        if let Ok(mut raw) = self.raw.write() {
            raw.entry(source_table.to_string()).or_default();
        }
    }

    pub fn push_raw(&self, source_table: &str, record: RawTenderRecord) {
        if let Ok(mut raw) = self.raw.write() {
            raw.entry(source_table.to_string()).or_default().push(record);
        }
    }

    /// Replaces the raw rows of one table.
    pub fn set_raw(&self, source_table: &str, records: Vec<RawTenderRecord>) {
        if let Ok(mut raw) = self.raw.write() {
            raw.insert(source_table.to_string(), records);
        }
    }

    /// Makes every write for `source_id` fail with a backend error.
    pub fn fail_writes_for(&self, source_id: &str) {
        if let Ok(mut ids) = self.failing_ids.write() {
            ids.insert(source_id.to_string());
        }
    }

    pub fn unified_len(&self) -> usize {
        self.unified.read().map(|u| u.len()).unwrap_or(0)
    }

    pub fn unified_records(&self) -> Vec<NormalizedTender> {
        let mut out = self
            .unified
            .read()
            .map(|u| u.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        out.sort_by(|a, b| a.key().cmp(&b.key()));
        out
    }

    pub fn get(&self, source_table: &str, source_id: &str) -> Option<NormalizedTender> {
        self.unified
            .read()
            .ok()?
            .get(&(source_table.to_string(), source_id.to_string()))
            .cloned()
    }

    /// Seeds the unified table directly, bypassing conflict checks.
    pub fn seed_unified(&self, tender: NormalizedTender) {
        if let (Some((table, id)), Ok(mut unified)) = (tender.key(), self.unified.write()) {
            unified.insert((table.to_string(), id.to_string()), tender.clone());
        }
    }

    fn check_failure(&self, source_id: &str) -> Result<(), StoreError> {
        let failing = self.failing_ids.read().map_err(poisoned)?;
        if failing.contains(source_id) {
            return Err(StoreError::Backend(format!(
                "injected write failure for {source_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RawRecordSource for MemoryTenderStore {
    async fn fetch_candidates(
        &self,
        query: CandidateQuery<'_>,
    ) -> Result<Vec<RawTenderRecord>, StoreError> {
        let raw = self.raw.read().map_err(poisoned)?;
        let mut rows = raw
            .get(query.source_table)
            .cloned()
            .ok_or_else(|| StoreError::UnknownSource(query.source_table.to_string()))?;
        if let Some(field) = query.freshness_field {
            // Stable sort keeps insertion order among equal or missing markers.
            rows.sort_by(|a, b| {
                let fa = a.get(field).and_then(parse_timestamp);
                let fb = b.get(field).and_then(parse_timestamp);
                fb.cmp(&fa)
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

#[async_trait]
impl UnifiedStore for MemoryTenderStore {
    async fn find(
        &self,
        source_table: &str,
        source_id: &str,
    ) -> Result<Option<NormalizedTender>, StoreError> {
        let unified = self.unified.read().map_err(poisoned)?;
        Ok(unified
            .get(&(source_table.to_string(), source_id.to_string()))
            .cloned())
    }

    async fn existing_freshness(
        &self,
        source_table: &str,
        source_ids: &[String],
    ) -> Result<FreshnessMap, StoreError> {
        let unified = self.unified.read().map_err(poisoned)?;
        Ok(source_ids
            .iter()
            .filter_map(|id| {
                unified
                    .get(&(source_table.to_string(), id.clone()))
                    .map(|tender| (id.clone(), tender.freshness()))
            })
            .collect())
    }

    async fn insert(&self, tender: &NormalizedTender) -> Result<(), StoreError> {
        let (table, id) = require_key(tender)?;
        self.check_failure(id)?;
        let mut unified = self.unified.write().map_err(poisoned)?;
        let key = (table.to_string(), id.to_string());
        if unified.contains_key(&key) {
            return Err(StoreError::Conflict {
                source_table: key.0,
                source_id: key.1,
            });
        }
        unified.insert(key, tender.clone());
        Ok(())
    }

    async fn update(&self, tender: &NormalizedTender) -> Result<bool, StoreError> {
        let (table, id) = require_key(tender)?;
        self.check_failure(id)?;
        let mut unified = self.unified.write().map_err(poisoned)?;
        let Some(existing) = unified.get_mut(&(table.to_string(), id.to_string())) else {
            return Ok(false);
        };
        let mut merged = tender.clone();
        merged.fill_missing_from(existing);
        *existing = merged;
        Ok(true)
    }
}
