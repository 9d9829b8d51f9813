//! Crawl snapshot persistence
//!
//! Immutable once written. The most recent snapshot per URL backs change
//! detection; older snapshots may be garbage-collected outside a retention
//! window.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{ts_from_db, ts_to_db};

/// Stored page snapshot.
#[derive(Debug, Clone)]
pub struct CrawlSnapshot {
    pub id: Uuid,
    pub company_id: Uuid,
    pub url: String,
    pub html_hash: String,
    pub html_content: String,
    pub status_code: i64,
    pub rendered: bool,
    pub crawled_at: DateTime<Utc>,
}

impl CrawlSnapshot {
    /// Build a snapshot; `html_hash` is derived from the content, never
    /// supplied.
    pub fn new(company_id: Uuid, url: String, html_content: String, status_code: i64, rendered: bool) -> Self {
        let html_hash = crate::fetch::content_hash(&html_content);
        Self {
            id: Uuid::new_v4(),
            company_id,
            url,
            html_hash,
            html_content,
            status_code,
            rendered,
            crawled_at: Utc::now(),
        }
    }
}

pub async fn insert_snapshot(pool: &SqlitePool, snapshot: &CrawlSnapshot) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO crawl_snapshots (id, company_id, url, html_hash, html_content, status_code, rendered, crawled_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(snapshot.id.to_string())
    .bind(snapshot.company_id.to_string())
    .bind(&snapshot.url)
    .bind(&snapshot.html_hash)
    .bind(&snapshot.html_content)
    .bind(snapshot.status_code)
    .bind(snapshot.rendered as i64)
    .bind(ts_to_db(snapshot.crawled_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Digest of the most recent snapshot for a URL, if any.
pub async fn latest_hash(pool: &SqlitePool, company_id: Uuid, url: &str) -> Result<Option<String>> {
    let hash = sqlx::query_scalar(
        "SELECT html_hash FROM crawl_snapshots
         WHERE company_id = ? AND url = ?
         ORDER BY crawled_at DESC
         LIMIT 1",
    )
    .bind(company_id.to_string())
    .bind(url)
    .fetch_optional(pool)
    .await?;

    Ok(hash)
}

pub async fn count_for_url(pool: &SqlitePool, company_id: Uuid, url: &str) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM crawl_snapshots WHERE company_id = ? AND url = ?",
    )
    .bind(company_id.to_string())
    .bind(url)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Drop snapshots older than the retention window, always keeping the most
/// recent snapshot per URL.
pub async fn prune_older_than(pool: &SqlitePool, retention_days: i64) -> Result<u64> {
    let cutoff = ts_to_db(Utc::now() - Duration::days(retention_days));
    let result = sqlx::query(
        r#"
        DELETE FROM crawl_snapshots
        WHERE crawled_at < ?
          AND id NOT IN (
              SELECT id FROM (
                  SELECT id, MAX(crawled_at) FROM crawl_snapshots GROUP BY company_id, url
              )
          )
        "#,
    )
    .bind(&cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Load a snapshot's content and metadata by id (admin/debug path).
pub async fn load_snapshot(pool: &SqlitePool, id: Uuid) -> Result<Option<CrawlSnapshot>> {
    let row = sqlx::query(
        "SELECT id, company_id, url, html_hash, html_content, status_code, rendered, crawled_at
         FROM crawl_snapshots WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let id: String = row.get("id");
            let company_id: String = row.get("company_id");
            Ok(Some(CrawlSnapshot {
                id: Uuid::parse_str(&id)?,
                company_id: Uuid::parse_str(&company_id)?,
                url: row.get("url"),
                html_hash: row.get::<Option<String>, _>("html_hash").unwrap_or_default(),
                html_content: row
                    .get::<Option<String>, _>("html_content")
                    .unwrap_or_default(),
                status_code: row.get::<Option<i64>, _>("status_code").unwrap_or(0),
                rendered: row.get::<i64, _>("rendered") != 0,
                crawled_at: ts_from_db(row.get("crawled_at")).unwrap_or_else(Utc::now),
            }))
        }
        None => Ok(None),
    }
}
