//! Raw job persistence
//!
//! Untouched strings as observed at the source. Upserted on every crawl;
//! re-extraction overwrites the raw fields but preserves the row id.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{ts_from_db, ts_to_db};

/// A job record as observed from the source.
#[derive(Debug, Clone, Default)]
pub struct RawJob {
    pub id: Uuid,
    pub company_id: Uuid,
    pub source_url: String,
    pub title_raw: Option<String>,
    pub description_raw: Option<String>,
    pub location_raw: Option<String>,
    pub department_raw: Option<String>,
    pub employment_type_raw: Option<String>,
    pub posted_at_raw: Option<String>,
    pub salary_raw: Option<String>,
    pub extracted_at: Option<DateTime<Utc>>,
}

impl RawJob {
    pub fn new(company_id: Uuid, source_url: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id,
            source_url,
            ..Default::default()
        }
    }
}

fn from_row(row: &SqliteRow) -> Result<RawJob> {
    let id: String = row.get("id");
    let company_id: String = row.get("company_id");
    Ok(RawJob {
        id: Uuid::parse_str(&id)?,
        company_id: Uuid::parse_str(&company_id)?,
        source_url: row.get("source_url"),
        title_raw: row.get("title_raw"),
        description_raw: row.get("description_raw"),
        location_raw: row.get("location_raw"),
        department_raw: row.get("department_raw"),
        employment_type_raw: row.get("employment_type_raw"),
        posted_at_raw: row.get("posted_at_raw"),
        salary_raw: row.get("salary_raw"),
        extracted_at: ts_from_db(row.get("extracted_at")),
    })
}

/// Upsert on (company, source_url) and return the persisted row id (the
/// original id when the row already existed).
pub async fn upsert_raw_job(pool: &SqlitePool, raw: &RawJob) -> Result<Uuid> {
    sqlx::query(
        r#"
        INSERT INTO jobs_raw (
            id, company_id, source_url, title_raw, description_raw, location_raw,
            department_raw, employment_type_raw, posted_at_raw, salary_raw, extracted_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(company_id, source_url) DO UPDATE SET
            title_raw = excluded.title_raw,
            description_raw = excluded.description_raw,
            location_raw = excluded.location_raw,
            department_raw = excluded.department_raw,
            employment_type_raw = excluded.employment_type_raw,
            posted_at_raw = excluded.posted_at_raw,
            salary_raw = excluded.salary_raw,
            extracted_at = excluded.extracted_at
        "#,
    )
    .bind(raw.id.to_string())
    .bind(raw.company_id.to_string())
    .bind(&raw.source_url)
    .bind(&raw.title_raw)
    .bind(&raw.description_raw)
    .bind(&raw.location_raw)
    .bind(&raw.department_raw)
    .bind(&raw.employment_type_raw)
    .bind(&raw.posted_at_raw)
    .bind(&raw.salary_raw)
    .bind(ts_to_db(raw.extracted_at.unwrap_or_else(Utc::now)))
    .execute(pool)
    .await?;

    let id: String =
        sqlx::query_scalar("SELECT id FROM jobs_raw WHERE company_id = ? AND source_url = ?")
            .bind(raw.company_id.to_string())
            .bind(&raw.source_url)
            .fetch_one(pool)
            .await?;

    Ok(Uuid::parse_str(&id)?)
}

pub async fn load_raw_job(pool: &SqlitePool, id: Uuid) -> Result<Option<RawJob>> {
    let row = sqlx::query(
        "SELECT id, company_id, source_url, title_raw, description_raw, location_raw,
                department_raw, employment_type_raw, posted_at_raw, salary_raw, extracted_at
         FROM jobs_raw WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| from_row(&r)).transpose()
}

pub async fn count_raw_jobs(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM jobs_raw")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::companies::{save_company, Company};
    use crate::db::init_memory_database;

    #[tokio::test]
    async fn reextraction_preserves_raw_id() {
        let pool = init_memory_database().await.unwrap();
        let company = Company::new("Acme".into());
        save_company(&pool, &company).await.unwrap();

        let mut raw = RawJob::new(company.id, "https://x/jobs/1".into());
        raw.title_raw = Some("Engineer".into());
        let first_id = upsert_raw_job(&pool, &raw).await.unwrap();

        let mut again = RawJob::new(company.id, "https://x/jobs/1".into());
        again.title_raw = Some("Senior Engineer".into());
        let second_id = upsert_raw_job(&pool, &again).await.unwrap();

        assert_eq!(first_id, second_id);
        assert_eq!(count_raw_jobs(&pool).await.unwrap(), 1);

        let loaded = load_raw_job(&pool, first_id).await.unwrap().unwrap();
        assert_eq!(loaded.title_raw.as_deref(), Some("Senior Engineer"));
    }
}
