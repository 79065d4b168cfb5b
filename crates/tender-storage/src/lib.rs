//! Raw-record source and unified-store contracts, plus Postgres and in-memory backends.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tender_core::{NormalizedTender, RawTenderRecord};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryTenderStore;
pub use postgres::PgTenderStore;

/// Default name of the unified table.
pub const UNIFIED_TABLE: &str = "unified_tenders";

/// Stored freshness per source id, for the ids that already exist.
pub type FreshnessMap = HashMap<String, Option<DateTime<Utc>>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unified record {source_table}/{source_id} already exists")]
    Conflict {
        source_table: String,
        source_id: String,
    },
    #[error("tender has no source_table/source_id key")]
    MissingKey,
    #[error("invalid SQL identifier {0:?}")]
    InvalidIdentifier(String),
    #[error("unknown source table {0}")]
    UnknownSource(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    /// Uniqueness violation on insert; the record was written concurrently.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CandidateQuery<'a> {
    pub source_table: &'a str,
    /// Raw column holding the record's own freshness marker, if the source has one.
    pub freshness_field: Option<&'a str>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait RawRecordSource: Send + Sync {
    /// Candidate raw records, newest first when a freshness field is known.
    async fn fetch_candidates(
        &self,
        query: CandidateQuery<'_>,
    ) -> Result<Vec<RawTenderRecord>, StoreError>;
}

#[async_trait]
pub trait UnifiedStore: Send + Sync {
    async fn find(
        &self,
        source_table: &str,
        source_id: &str,
    ) -> Result<Option<NormalizedTender>, StoreError>;

    /// Presence and freshness of every id in `source_ids` that already exists.
    async fn existing_freshness(
        &self,
        source_table: &str,
        source_ids: &[String],
    ) -> Result<FreshnessMap, StoreError>;

    /// Inserts a new record. A duplicate key is reported as [`StoreError::Conflict`].
    async fn insert(&self, tender: &NormalizedTender) -> Result<(), StoreError>;

    /// Merges non-null fields into the existing record. Returns `false` when no row matched.
    async fn update(&self, tender: &NormalizedTender) -> Result<bool, StoreError>;
}

/// A backend serving both raw candidates and the unified table.
pub trait TenderStore: RawRecordSource + UnifiedStore {}

impl<T: RawRecordSource + UnifiedStore> TenderStore for T {}

/// Rejects anything that is not a plain SQL identifier.
pub fn validate_identifier(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63;
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

pub(crate) fn require_key(tender: &NormalizedTender) -> Result<(&str, &str), StoreError> {
    tender.key().ok_or(StoreError::MissingKey)
}
