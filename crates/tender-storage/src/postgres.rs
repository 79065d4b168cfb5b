//! Postgres backend.
//!
//! Raw rows are read from each source's own table via `row_to_json`. The
//! unified table carries a unique constraint on `(source_table, source_id)`;
//! its schema is owned by the migration tooling, not by this crate.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row};
use tender_core::{DocumentLink, NormalizedMethod, NormalizedTender, RawTenderRecord, TenderStatus};
use tracing::{debug, warn};

use crate::{
    require_key, validate_identifier, CandidateQuery, FreshnessMap, RawRecordSource, StoreError,
    UnifiedStore, UNIFIED_TABLE,
};

/// Unified-table columns in bind order. The first two form the key.
const COLUMNS: &[&str] = &[
    "source_table",
    "source_id",
    "notice_id",
    "reference_number",
    "title",
    "title_english",
    "description",
    "description_english",
    "organization_name",
    "organization_name_english",
    "buyer",
    "buyer_english",
    "project_name",
    "project_name_english",
    "tender_type",
    "status",
    "sector",
    "procurement_method",
    "publication_date",
    "deadline_date",
    "country",
    "city",
    "estimated_value",
    "currency",
    "contact_name",
    "contact_email",
    "contact_phone",
    "contact_address",
    "url",
    "document_links",
    "normalized_at",
    "normalized_method",
    "processing_time_ms",
    "source_updated_at",
];

#[derive(Debug, Clone)]
pub struct PgTenderStore {
    pool: PgPool,
    unified_table: String,
}

impl PgTenderStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .context("connecting to the unified tender database")?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            unified_table: UNIFIED_TABLE.to_string(),
        }
    }

    pub fn with_unified_table(mut self, table: &str) -> Result<Self, StoreError> {
        self.unified_table = validate_identifier(table)?.to_string();
        Ok(self)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn candidates_sql(
    source_table: &str,
    freshness_field: Option<&str>,
) -> Result<String, StoreError> {
    let table = validate_identifier(source_table)?;
    let order = match freshness_field {
        Some(field) => format!(" ORDER BY t.{} DESC NULLS LAST", validate_identifier(field)?),
        None => String::new(),
    };
    Ok(format!(
        "SELECT row_to_json(t)::jsonb AS data FROM {table} t{order} LIMIT $1"
    ))
}

pub(crate) fn insert_sql(unified_table: &str) -> String {
    let placeholders = COLUMNS
        .iter()
        .enumerate()
        .map(|(i, column)| {
            if *column == "document_links" {
                format!("COALESCE(${}, '[]'::jsonb)", i + 1)
            } else {
                format!("${}", i + 1)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {unified_table} ({}) VALUES ({placeholders})",
        COLUMNS.join(", ")
    )
}

pub(crate) fn update_sql(unified_table: &str) -> String {
    let assignments = COLUMNS
        .iter()
        .enumerate()
        .skip(2)
        .map(|(i, column)| format!("{column} = COALESCE(${}, {column})", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!("UPDATE {unified_table} SET {assignments} WHERE source_table = $1 AND source_id = $2")
}

fn bind_tender<'q>(
    query: Query<'q, Postgres, PgArguments>,
    tender: &'q NormalizedTender,
) -> Query<'q, Postgres, PgArguments> {
    let links = if tender.document_links.is_empty() {
        None
    } else {
        Some(Json(&tender.document_links))
    };
    query
        .bind(tender.source_table.as_deref())
        .bind(tender.source_id.as_deref())
        .bind(tender.notice_id.as_deref())
        .bind(tender.reference_number.as_deref())
        .bind(tender.title.as_deref())
        .bind(tender.title_english.as_deref())
        .bind(tender.description.as_deref())
        .bind(tender.description_english.as_deref())
        .bind(tender.organization_name.as_deref())
        .bind(tender.organization_name_english.as_deref())
        .bind(tender.buyer.as_deref())
        .bind(tender.buyer_english.as_deref())
        .bind(tender.project_name.as_deref())
        .bind(tender.project_name_english.as_deref())
        .bind(tender.tender_type.as_deref())
        .bind(tender.status.map(|s| s.as_str()))
        .bind(tender.sector.as_deref())
        .bind(tender.procurement_method.as_deref())
        .bind(tender.publication_date)
        .bind(tender.deadline_date)
        .bind(tender.country.as_deref())
        .bind(tender.city.as_deref())
        .bind(tender.estimated_value)
        .bind(tender.currency.as_deref())
        .bind(tender.contact_name.as_deref())
        .bind(tender.contact_email.as_deref())
        .bind(tender.contact_phone.as_deref())
        .bind(tender.contact_address.as_deref())
        .bind(tender.url.as_deref())
        .bind(links)
        .bind(tender.normalized_at)
        .bind(tender.normalized_method.map(|m| m.as_str()))
        .bind(tender.processing_time_ms.and_then(|ms| i64::try_from(ms).ok()))
        .bind(tender.source_updated_at)
}

fn tender_from_row(row: &PgRow) -> Result<NormalizedTender, sqlx::Error> {
    let status: Option<String> = row.try_get("status")?;
    let method: Option<String> = row.try_get("normalized_method")?;
    let links: Option<Json<Vec<DocumentLink>>> = row.try_get("document_links")?;
    let processing_time_ms: Option<i64> = row.try_get("processing_time_ms")?;
    let publication_date: Option<NaiveDate> = row.try_get("publication_date")?;
    let deadline_date: Option<NaiveDate> = row.try_get("deadline_date")?;
    let normalized_at: Option<DateTime<Utc>> = row.try_get("normalized_at")?;
    let source_updated_at: Option<DateTime<Utc>> = row.try_get("source_updated_at")?;

    Ok(NormalizedTender {
        source_table: row.try_get("source_table")?,
        source_id: row.try_get("source_id")?,
        notice_id: row.try_get("notice_id")?,
        reference_number: row.try_get("reference_number")?,
        title: row.try_get("title")?,
        title_english: row.try_get("title_english")?,
        description: row.try_get("description")?,
        description_english: row.try_get("description_english")?,
        organization_name: row.try_get("organization_name")?,
        organization_name_english: row.try_get("organization_name_english")?,
        buyer: row.try_get("buyer")?,
        buyer_english: row.try_get("buyer_english")?,
        project_name: row.try_get("project_name")?,
        project_name_english: row.try_get("project_name_english")?,
        tender_type: row.try_get("tender_type")?,
        status: status.as_deref().and_then(TenderStatus::from_canonical),
        sector: row.try_get("sector")?,
        procurement_method: row.try_get("procurement_method")?,
        publication_date,
        deadline_date,
        country: row.try_get("country")?,
        city: row.try_get("city")?,
        estimated_value: row.try_get("estimated_value")?,
        currency: row.try_get("currency")?,
        contact_name: row.try_get("contact_name")?,
        contact_email: row.try_get("contact_email")?,
        contact_phone: row.try_get("contact_phone")?,
        contact_address: row.try_get("contact_address")?,
        url: row.try_get("url")?,
        document_links: links.map(|Json(links)| links).unwrap_or_default(),
        normalized_at,
        normalized_method: method.as_deref().and_then(NormalizedMethod::parse),
        processing_time_ms: processing_time_ms.and_then(|ms| u64::try_from(ms).ok()),
        source_updated_at,
    })
}

#[async_trait]
impl RawRecordSource for PgTenderStore {
    async fn fetch_candidates(
        &self,
        query: CandidateQuery<'_>,
    ) -> Result<Vec<RawTenderRecord>, StoreError> {
        let sql = candidates_sql(query.source_table, query.freshness_field)?;
        // LIMIT NULL is unbounded in Postgres.
        let limit = query.limit.and_then(|l| i64::try_from(l).ok());
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let data: JsonValue = row.try_get("data")?;
            match RawTenderRecord::from_json(data) {
                Some(record) => out.push(record),
                None => warn!(source = query.source_table, "raw row is not a JSON object"),
            }
        }
        debug!(source = query.source_table, count = out.len(), "fetched raw candidates");
        Ok(out)
    }
}

#[async_trait]
impl UnifiedStore for PgTenderStore {
    async fn find(
        &self,
        source_table: &str,
        source_id: &str,
    ) -> Result<Option<NormalizedTender>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE source_table = $1 AND source_id = $2",
            COLUMNS.join(", "),
            self.unified_table
        );
        let row = sqlx::query(&sql)
            .bind(source_table)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(tender_from_row)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn existing_freshness(
        &self,
        source_table: &str,
        source_ids: &[String],
    ) -> Result<FreshnessMap, StoreError> {
        if source_ids.is_empty() {
            return Ok(FreshnessMap::new());
        }
        let sql = format!(
            "SELECT source_id, COALESCE(source_updated_at, normalized_at) AS freshness \
             FROM {} WHERE source_table = $1 AND source_id = ANY($2)",
            self.unified_table
        );
        let rows = sqlx::query(&sql)
            .bind(source_table)
            .bind(source_ids.to_vec())
            .fetch_all(&self.pool)
            .await?;
        let mut out = FreshnessMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("source_id")?;
            let freshness: Option<DateTime<Utc>> = row.try_get("freshness")?;
            out.insert(id, freshness);
        }
        Ok(out)
    }

    async fn insert(&self, tender: &NormalizedTender) -> Result<(), StoreError> {
        let (table, id) = require_key(tender)?;
        let sql = insert_sql(&self.unified_table);
        match bind_tender(sqlx::query(&sql), tender)
            .execute(&self.pool)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict {
                source_table: table.to_string(),
                source_id: id.to_string(),
            }),
            Err(err) => Err(StoreError::Database(err)),
        }
    }

    async fn update(&self, tender: &NormalizedTender) -> Result<bool, StoreError> {
        require_key(tender)?;
        let sql = update_sql(&self.unified_table);
        let result = bind_tender(sqlx::query(&sql), tender)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_query_orders_by_freshness_when_known() {
        let sql = candidates_sql("sam_gov", Some("last_modified")).unwrap();
        assert_eq!(
            sql,
            "SELECT row_to_json(t)::jsonb AS data FROM sam_gov t ORDER BY t.last_modified DESC NULLS LAST LIMIT $1"
        );
        let sql = candidates_sql("ungm", None).unwrap();
        assert!(!sql.contains("ORDER BY"));
    }

    #[test]
    fn candidate_query_rejects_injection() {
        assert!(candidates_sql("ted; DELETE FROM x", None).is_err());
        assert!(candidates_sql("ted", Some("updated_at DESC; --")).is_err());
    }

    #[test]
    fn insert_binds_every_column_once() {
        let sql = insert_sql(UNIFIED_TABLE);
        assert!(sql.starts_with("INSERT INTO unified_tenders (source_table, source_id,"));
        assert!(sql.contains(&format!("${}", COLUMNS.len())));
        assert!(!sql.contains(&format!("${}", COLUMNS.len() + 1)));
        assert!(sql.contains("COALESCE($30, '[]'::jsonb)"));
    }

    #[test]
    fn update_merges_with_coalesce_and_keys_on_compound_id() {
        let sql = update_sql(UNIFIED_TABLE);
        assert!(sql.contains("title = COALESCE($5, title)"));
        assert!(!sql.contains("source_table = COALESCE"));
        assert!(sql.ends_with("WHERE source_table = $1 AND source_id = $2"));
    }
}
