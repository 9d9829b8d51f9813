//! Discovery queue persistence
//!
//! Staged, deduplicated company proposals. The dedupe key is the
//! normalized domain, falling back to the normalized name; conflicting
//! inserts merge newer non-null metadata into the existing row. Claiming
//! moves pending → processing atomically.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{ts_from_db, ts_to_db};
use crate::types::{AtsType, QueueStatus};

/// Retries before an item is parked as failed.
pub const MAX_RETRIES: i64 = 3;

/// A staged company proposal.
#[derive(Debug, Clone, Default)]
pub struct QueueItem {
    pub id: Uuid,
    pub name: String,
    pub domain: Option<String>,
    pub dedupe_key: String,
    pub careers_url: Option<String>,
    pub website_url: Option<String>,
    pub source: String,
    pub source_url: Option<String>,
    pub location: Option<String>,
    pub country: Option<String>,
    pub description: Option<String>,
    pub industry: Option<String>,
    pub employee_count: Option<i64>,
    pub funding_stage: Option<String>,
    pub ats_type: Option<AtsType>,
    pub ats_identifier: Option<String>,
    pub status: QueueStatus,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub company_id: Option<Uuid>,
}

/// Normalize a domain for deduplication: lowercased, `www.` stripped.
pub fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim().to_ascii_lowercase();
    domain.strip_prefix("www.").unwrap_or(&domain).to_string()
}

/// Dedupe key: normalized domain, else normalized name.
pub fn dedupe_key(name: &str, domain: Option<&str>) -> String {
    match domain.filter(|d| !d.trim().is_empty()) {
        Some(domain) => normalize_domain(domain),
        None => format!("name:{}", name.trim().to_ascii_lowercase()),
    }
}

fn from_row(row: &SqliteRow) -> Result<QueueItem> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let ats_type: Option<String> = row.get("ats_type");
    let company_id: Option<String> = row.get("company_id");

    Ok(QueueItem {
        id: Uuid::parse_str(&id)?,
        name: row.get("name"),
        domain: row.get("domain"),
        dedupe_key: row.get("dedupe_key"),
        careers_url: row.get("careers_url"),
        website_url: row.get("website_url"),
        source: row.get("source"),
        source_url: row.get("source_url"),
        location: row.get("location"),
        country: row.get("country"),
        description: row.get("description"),
        industry: row.get("industry"),
        employee_count: row.get("employee_count"),
        funding_stage: row.get("funding_stage"),
        ats_type: ats_type.as_deref().and_then(|s| s.parse().ok()),
        ats_identifier: row.get("ats_identifier"),
        status: status.parse().unwrap_or(QueueStatus::Pending),
        error_message: row.get("error_message"),
        retry_count: row.get("retry_count"),
        created_at: ts_from_db(row.get("created_at")),
        processed_at: ts_from_db(row.get("processed_at")),
        company_id: company_id.as_deref().and_then(|s| Uuid::parse_str(s).ok()),
    })
}

const SELECT_COLUMNS: &str = "id, name, domain, dedupe_key, careers_url, website_url, source, \
    source_url, location, country, description, industry, employee_count, funding_stage, \
    ats_type, ats_identifier, status, error_message, retry_count, created_at, processed_at, \
    company_id";

/// Insert a proposal, merging into the existing row on a dedupe hit.
/// Returns true when a brand-new row was created.
pub async fn insert_or_merge(pool: &SqlitePool, item: &QueueItem) -> Result<bool> {
    let before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM discovery_queue")
        .fetch_one(pool)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO discovery_queue (
            id, name, domain, dedupe_key, careers_url, website_url, source, source_url,
            location, country, description, industry, employee_count, funding_stage,
            ats_type, ats_identifier, status
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending')
        ON CONFLICT(dedupe_key) DO UPDATE SET
            careers_url = COALESCE(excluded.careers_url, discovery_queue.careers_url),
            website_url = COALESCE(excluded.website_url, discovery_queue.website_url),
            location = COALESCE(excluded.location, discovery_queue.location),
            country = COALESCE(excluded.country, discovery_queue.country),
            description = COALESCE(excluded.description, discovery_queue.description),
            industry = COALESCE(excluded.industry, discovery_queue.industry),
            employee_count = COALESCE(excluded.employee_count, discovery_queue.employee_count),
            funding_stage = COALESCE(excluded.funding_stage, discovery_queue.funding_stage),
            ats_type = COALESCE(excluded.ats_type, discovery_queue.ats_type),
            ats_identifier = COALESCE(excluded.ats_identifier, discovery_queue.ats_identifier)
        "#,
    )
    .bind(item.id.to_string())
    .bind(&item.name)
    .bind(item.domain.as_deref().map(normalize_domain))
    .bind(&item.dedupe_key)
    .bind(&item.careers_url)
    .bind(&item.website_url)
    .bind(&item.source)
    .bind(&item.source_url)
    .bind(&item.location)
    .bind(&item.country)
    .bind(&item.description)
    .bind(&item.industry)
    .bind(item.employee_count)
    .bind(&item.funding_stage)
    .bind(item.ats_type.map(|a| a.as_str()))
    .bind(&item.ats_identifier)
    .execute(pool)
    .await?;

    let after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM discovery_queue")
        .fetch_one(pool)
        .await?;

    Ok(after > before)
}

/// Atomically claim up to `limit` pending items, moving them to
/// processing.
pub async fn claim_pending(pool: &SqlitePool, limit: i64) -> Result<Vec<QueueItem>> {
    let rows = sqlx::query(&format!(
        r#"
        UPDATE discovery_queue
        SET status = 'processing'
        WHERE id IN (
            SELECT id FROM discovery_queue
            WHERE status = 'pending'
            ORDER BY created_at
            LIMIT ?
        )
        RETURNING {SELECT_COLUMNS}
        "#
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(from_row).collect()
}

pub async fn mark_completed(pool: &SqlitePool, id: Uuid, company_id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE discovery_queue
         SET status = 'completed', company_id = ?, processed_at = ?, error_message = NULL
         WHERE id = ?",
    )
    .bind(company_id.to_string())
    .bind(ts_to_db(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_skipped(pool: &SqlitePool, id: Uuid, reason: &str) -> Result<()> {
    sqlx::query(
        "UPDATE discovery_queue
         SET status = 'skipped', error_message = ?, processed_at = ?
         WHERE id = ?",
    )
    .bind(reason)
    .bind(ts_to_db(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failure. Items below the retry cap return to pending;
/// otherwise they park as failed.
pub async fn mark_failed(pool: &SqlitePool, id: Uuid, error: &str) -> Result<QueueStatus> {
    sqlx::query(
        r#"
        UPDATE discovery_queue
        SET retry_count = retry_count + 1,
            error_message = ?,
            status = CASE WHEN retry_count + 1 >= ? THEN 'failed' ELSE 'pending' END,
            processed_at = CASE WHEN retry_count + 1 >= ? THEN ? ELSE processed_at END
        WHERE id = ?
        "#,
    )
    .bind(error)
    .bind(MAX_RETRIES)
    .bind(MAX_RETRIES)
    .bind(ts_to_db(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;

    let status: String = sqlx::query_scalar("SELECT status FROM discovery_queue WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(status.parse().unwrap_or(QueueStatus::Failed))
}

/// Per-status counts for the admin surface.
pub async fn status_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query("SELECT status, COUNT(*) FROM discovery_queue GROUP BY status")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| (row.get::<String, _>(0), row.get::<i64, _>(1)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;

    fn item(name: &str, domain: Option<&str>, source: &str) -> QueueItem {
        QueueItem {
            id: Uuid::new_v4(),
            name: name.to_string(),
            domain: domain.map(String::from),
            dedupe_key: dedupe_key(name, domain),
            source: source.to_string(),
            status: QueueStatus::Pending,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn duplicate_domain_merges_metadata() {
        let pool = init_memory_database().await.unwrap();

        let mut first = item("Acme", Some("acme.test"), "seed");
        first.industry = Some("fintech".into());
        assert!(insert_or_merge(&pool, &first).await.unwrap());

        let mut second = item("Acme", Some("www.Acme.test"), "seed");
        second.country = Some("US".into());
        assert!(!insert_or_merge(&pool, &second).await.unwrap());

        let claimed = claim_pending(&pool, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        let merged = &claimed[0];
        assert_eq!(merged.industry.as_deref(), Some("fintech"));
        assert_eq!(merged.country.as_deref(), Some("US"));
    }

    #[tokio::test]
    async fn name_fallback_key_when_no_domain() {
        let pool = init_memory_database().await.unwrap();
        assert!(insert_or_merge(&pool, &item("Acme Labs", None, "seed")).await.unwrap());
        assert!(!insert_or_merge(&pool, &item("acme labs", None, "other")).await.unwrap());
    }

    #[tokio::test]
    async fn claim_moves_pending_to_processing() {
        let pool = init_memory_database().await.unwrap();
        insert_or_merge(&pool, &item("A", Some("a.test"), "seed")).await.unwrap();
        insert_or_merge(&pool, &item("B", Some("b.test"), "seed")).await.unwrap();

        let claimed = claim_pending(&pool, 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, QueueStatus::Processing);

        // Claimed item is no longer pending
        let remaining = claim_pending(&pool, 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_ne!(remaining[0].id, claimed[0].id);
    }

    #[tokio::test]
    async fn failure_retries_until_cap() {
        let pool = init_memory_database().await.unwrap();
        insert_or_merge(&pool, &item("A", Some("a.test"), "seed")).await.unwrap();
        let claimed = claim_pending(&pool, 1).await.unwrap();
        let id = claimed[0].id;

        assert_eq!(mark_failed(&pool, id, "boom").await.unwrap(), QueueStatus::Pending);
        claim_pending(&pool, 1).await.unwrap();
        assert_eq!(mark_failed(&pool, id, "boom").await.unwrap(), QueueStatus::Pending);
        claim_pending(&pool, 1).await.unwrap();
        assert_eq!(mark_failed(&pool, id, "boom").await.unwrap(), QueueStatus::Failed);
    }
}
